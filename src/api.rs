use std::sync::Arc;

use tracing::error;

use crate::{
    bind::{Initializer, Invoker},
    collection::Collection,
    errors::BindError,
    outputs::{Outputs, Signature},
    provider::instance,
};

/// Error channel threaded through chains executed with [`run`].
///
/// A terminal (or wrapper) that wants to report failure produces a
/// `ChainError`; [`run`] injects a success value as a fallback so that a
/// chain which never touches the channel still binds.
#[derive(Clone, Default)]
pub struct ChainError(Option<Arc<anyhow::Error>>);

impl ChainError {
    /// The success value.
    #[must_use]
    pub fn ok() -> Self {
        Self(None)
    }

    #[must_use]
    pub fn from_error(err: anyhow::Error) -> Self {
        Self(Some(Arc::new(err)))
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.0.is_none()
    }

    pub fn into_result(self) -> anyhow::Result<()> {
        match self.0 {
            None => Ok(()),
            Some(err) => Err(anyhow::Error::new(ChainFailure(err))),
        }
    }
}

/// Failure reported through the chain's error channel, as returned by
/// [`run`]. The original error stays intact behind its shared handle, so
/// the source chain survives the trip through the frame.
#[derive(Debug, Clone)]
pub struct ChainFailure(Arc<anyhow::Error>);

impl std::fmt::Display for ChainFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl std::error::Error for ChainFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        let inner: &(dyn std::error::Error + 'static) = (*self.0).as_ref();
        inner.source()
    }
}

impl From<anyhow::Error> for ChainError {
    fn from(err: anyhow::Error) -> Self {
        Self::from_error(err)
    }
}

impl std::fmt::Debug for ChainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.0 {
            None => f.write_str("ChainError(ok)"),
            Some(err) => write!(f, "ChainError({err:#})"),
        }
    }
}

/// Binds `collection` to a parameterless invocation with a [`ChainError`]
/// result, calls it once, and returns the chain's outcome.
///
/// The injected fallback success value means the final function is never
/// rejected merely for leaving the error channel untouched.
pub fn run(name: &str, collection: &Collection) -> anyhow::Result<()> {
    let chain = Collection::new(name)
        .with(instance(ChainError::ok()).named("fallback_error"))
        .nest(collection.clone());
    let invoker = chain.bind::<(), (ChainError,)>()?;
    let (outcome,) = invoker.call(())?;
    outcome.into_result()
}

/// [`run`], aborting the process on any failure.
pub fn must_run(name: &str, collection: &Collection) {
    if let Err(err) = run(name, collection) {
        error!(chain = name, error = %format!("{err:#}"), "Run failed");
        panic!("running `{name}` failed: {err:#}");
    }
}

/// [`Collection::bind`], aborting the process on a wiring defect. Intended
/// for chains assembled from static configuration, where a binding failure
/// is a programming error.
#[must_use]
pub fn must_bind<Args, Ret>(collection: &Collection) -> Invoker<Args, Ret>
where
    Args: Outputs,
    Ret: Signature,
{
    match collection.bind() {
        Ok(invoker) => invoker,
        Err(err) => panic!("{err}"),
    }
}

/// Binds `collection` and hands the invoker to `setter`, for callback-style
/// registration surfaces.
pub fn set_callback<Args, Ret, F>(collection: &Collection, setter: F) -> Result<(), BindError>
where
    Args: Outputs,
    Ret: Signature,
    F: FnOnce(Invoker<Args, Ret>),
{
    let invoker = collection.bind()?;
    setter(invoker);
    Ok(())
}

/// Like [`set_callback`], for setters that also take the initializer.
pub fn set_callback_with_init<IArgs, IRet, Args, Ret, F>(collection: &Collection, setter: F) -> Result<(), BindError>
where
    IArgs: Outputs,
    IRet: Signature,
    Args: Outputs,
    Ret: Signature,
    F: FnOnce(Initializer<IArgs, IRet>, Invoker<Args, Ret>),
{
    let (initializer, invoker) = collection.bind_with_init()?;
    setter(initializer, invoker);
    Ok(())
}
