use std::sync::Arc;

use crate::{
    any::{ArcAny, TypeInfo},
    errors::RunErrorKind,
    frame::Frame,
};

/// Ordered list of values a provider pushes into the chain.
///
/// Providers always return a tuple: `()` for no outputs, `(T,)` for one,
/// `(T, U)` for two, and so on. The tuple shape is what gives a provider
/// its ordered output type list.
pub trait Outputs: 'static {
    fn append_types(types: &mut Vec<TypeInfo>);

    fn into_values(self) -> Vec<(TypeInfo, ArcAny)>;
}

macro_rules! impl_outputs {
    (
        [$($ty:ident),*]
    ) => {
        #[allow(non_snake_case, unused_variables, unused_mut)]
        impl<$($ty,)*> Outputs for ($($ty,)*)
        where
            $( $ty: Send + Sync + 'static, )*
        {
            fn append_types(types: &mut Vec<TypeInfo>) {
                $( types.push(TypeInfo::of::<$ty>()); )*
            }

            fn into_values(self) -> Vec<(TypeInfo, ArcAny)> {
                let ($($ty,)*) = self;
                let mut values = Vec::new();
                $( values.push((TypeInfo::of::<$ty>(), Arc::new($ty) as ArcAny)); )*
                values
            }
        }
    };
}

all_the_tuples!(impl_outputs);

/// Tuple shape of an external invoke/init signature, or of the values a
/// wrapper pulls back upward. Elements must be cloneable because the same
/// results can be handed out repeatedly (idempotent initializer, upward
/// extraction plus the caller's return).
pub trait Signature: Outputs {
    /// Extracts the tuple, preferring `primary` and falling back to
    /// `fallback` per element.
    fn from_frames(primary: &Frame, fallback: &Frame) -> Result<Self, RunErrorKind>
    where
        Self: Sized;
}

fn pick<T: Clone + Send + Sync + 'static>(primary: &Frame, fallback: &Frame) -> Result<T, RunErrorKind> {
    primary
        .get::<T>()
        .or_else(|| fallback.get::<T>())
        .map(|value| (*value).clone())
        .ok_or(RunErrorKind::MissingValue {
            needed: TypeInfo::of::<T>(),
        })
}

macro_rules! impl_signature {
    (
        [$($ty:ident),*]
    ) => {
        #[allow(non_snake_case, unused_variables)]
        impl<$($ty,)*> Signature for ($($ty,)*)
        where
            $( $ty: Clone + Send + Sync + 'static, )*
        {
            fn from_frames(primary: &Frame, fallback: &Frame) -> Result<Self, RunErrorKind> {
                Ok(($(pick::<$ty>(primary, fallback)?,)*))
            }
        }
    };
}

all_the_tuples!(impl_signature);
