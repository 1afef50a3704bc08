use std::{hash::Hash, sync::Arc};

use crate::{any::TypeInfo, errors::RunErrorKind, frame::Frame};

/// Declares how one provider parameter is pulled out of the frame.
///
/// Provider closures take their parameters through the wrapper types below;
/// the wrapper decides whether the value is cloned out of the chain or
/// shared by reference count.
pub trait Extract: Sized + 'static {
    fn extract(frame: &Frame) -> Result<Self, RunErrorKind>;

    fn append_types(types: &mut Vec<TypeInfo>);
}

/// Takes the value by clone. The produced value stays available to later
/// consumers of the same type.
pub struct Cloned<T>(pub T);

impl<T: Clone + Send + Sync + 'static> Extract for Cloned<T> {
    fn extract(frame: &Frame) -> Result<Self, RunErrorKind> {
        frame
            .get::<T>()
            .map(|value| Self((*value).clone()))
            .ok_or(RunErrorKind::MissingValue {
                needed: TypeInfo::of::<T>(),
            })
    }

    fn append_types(types: &mut Vec<TypeInfo>) {
        types.push(TypeInfo::of::<T>());
    }
}

/// Takes the value behind its shared handle, avoiding a clone.
pub struct Shared<T>(pub Arc<T>);

impl<T: Send + Sync + 'static> Extract for Shared<T> {
    fn extract(frame: &Frame) -> Result<Self, RunErrorKind> {
        frame.get::<T>().map(Self).ok_or(RunErrorKind::MissingValue {
            needed: TypeInfo::of::<T>(),
        })
    }

    fn append_types(types: &mut Vec<TypeInfo>) {
        types.push(TypeInfo::of::<T>());
    }
}

macro_rules! impl_extract {
    (
        [$($ty:ident),*]
    ) => {
        #[allow(non_snake_case, unused_variables)]
        impl<$($ty,)*> Extract for ($($ty,)*)
        where
            $( $ty: Extract, )*
        {
            fn extract(frame: &Frame) -> Result<Self, RunErrorKind> {
                Ok(($($ty::extract(frame)?,)*))
            }

            fn append_types(types: &mut Vec<TypeInfo>) {
                $( $ty::append_types(types); )*
            }
        }
    };
}

all_the_tuples!(impl_extract);

/// Extraction whose inner value can key the memoization cache.
///
/// This is the compile-time rendition of "inputs must be usable as map
/// keys": a provider can only be memoized when every parameter yields a
/// `Hash + Eq` key.
pub trait MemoInput: Extract {
    type Key: Hash + Eq + Clone + Send + Sync + 'static;

    fn memo_key(&self) -> Self::Key;
}

impl<T: Clone + Hash + Eq + Send + Sync + 'static> MemoInput for Cloned<T> {
    type Key = T;

    fn memo_key(&self) -> T {
        self.0.clone()
    }
}

impl<T: Hash + Eq + Send + Sync + 'static> MemoInput for Shared<T> {
    type Key = Arc<T>;

    fn memo_key(&self) -> Arc<T> {
        self.0.clone()
    }
}

macro_rules! impl_memo_input {
    (
        [$($ty:ident),*]
    ) => {
        #[allow(non_snake_case, unused_variables)]
        impl<$($ty,)*> MemoInput for ($($ty,)*)
        where
            $( $ty: MemoInput, )*
        {
            type Key = ($($ty::Key,)*);

            fn memo_key(&self) -> Self::Key {
                let ($($ty,)*) = self;
                ($($ty.memo_key(),)*)
            }
        }
    };
}

all_the_tuples!(impl_memo_input);

#[cfg(test)]
mod tests {
    use super::{Cloned, Extract, MemoInput, Shared};
    use crate::{any::TypeInfo, frame::Frame};

    use std::sync::Arc;

    #[test]
    fn test_cloned_and_shared() {
        let mut frame = Frame::new();
        frame.insert_raw(TypeInfo::of::<String>(), Arc::new("abc".to_string()));

        let Cloned(owned) = Cloned::<String>::extract(&frame).unwrap();
        assert_eq!(owned, "abc");

        let Shared(shared) = Shared::<String>::extract(&frame).unwrap();
        assert!(Arc::ptr_eq(&shared, &frame.get::<String>().unwrap()));
    }

    #[test]
    fn test_missing_value() {
        let frame = Frame::new();
        assert!(Cloned::<u8>::extract(&frame).is_err());
    }

    #[test]
    fn test_tuple_types_in_order() {
        let mut types = Vec::new();
        <(Cloned<String>, Shared<u8>)>::append_types(&mut types);
        assert_eq!(types, vec![TypeInfo::of::<String>(), TypeInfo::of::<u8>()]);
    }

    #[test]
    fn test_memo_key() {
        let key = (Cloned(3_i64), Cloned("x".to_string())).memo_key();
        assert_eq!(key, (3_i64, "x".to_string()));
    }
}
