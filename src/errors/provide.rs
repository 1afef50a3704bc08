/// Failure produced by a provider body.
///
/// Provider closures usually return `Ok::<_, ProvideErrorKind>(..)`; anything
/// that converts into [`anyhow::Error`] can be bubbled up with `?`.
#[derive(thiserror::Error, Debug)]
pub enum ProvideErrorKind {
    #[error(transparent)]
    Custom(#[from] anyhow::Error),
}

impl ProvideErrorKind {
    #[inline]
    #[must_use]
    pub fn msg(message: &'static str) -> Self {
        Self::Custom(anyhow::anyhow!(message))
    }
}

impl From<super::run::RunErrorKind> for ProvideErrorKind {
    fn from(err: super::run::RunErrorKind) -> Self {
        Self::Custom(anyhow::Error::new(err))
    }
}

impl From<std::convert::Infallible> for ProvideErrorKind {
    fn from(err: std::convert::Infallible) -> Self {
        match err {}
    }
}
