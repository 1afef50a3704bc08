use crate::{errors::ProvideErrorKind, extract::Extract, outputs::Outputs};

/// A callable that can serve as a provider body.
///
/// Implemented for closures whose parameters are [`Extract`] wrappers and
/// whose return value is `Result<outputs-tuple, E>`.
pub trait Factory<Deps>: Clone + Send + Sync + 'static
where
    Deps: Extract,
{
    type Provides: Outputs;
    type Error: Into<ProvideErrorKind>;

    fn produce(&self, deps: Deps) -> Result<Self::Provides, Self::Error>;
}

macro_rules! impl_factory {
    (
        [$($ty:ident),*]
    ) => {
        #[allow(non_snake_case)]
        impl<F, Out, Err, $($ty,)*> Factory<($($ty,)*)> for F
        where
            F: Fn($($ty,)*) -> Result<Out, Err> + Clone + Send + Sync + 'static,
            Out: Outputs,
            Err: Into<ProvideErrorKind>,
            $( $ty: Extract, )*
        {
            type Provides = Out;
            type Error = Err;

            fn produce(&self, ($($ty,)*): ($($ty,)*)) -> Result<Out, Err> {
                self($($ty),*)
            }
        }
    };
}

all_the_tuples!(impl_factory);
