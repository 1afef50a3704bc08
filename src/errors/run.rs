use std::sync::Arc;

use super::provide::ProvideErrorKind;
use crate::any::TypeInfo;

/// Failure while executing a bound chain.
///
/// Wiring mistakes are caught at bind time; at run time the remaining
/// failure modes are provider bodies erroring out and values that a wrapper
/// chose not to produce by skipping its inner continuation.
#[derive(thiserror::Error, Debug)]
pub enum RunErrorKind {
    #[error("no value of type {needed} is available in the chain")]
    MissingValue { needed: TypeInfo },
    #[error("the chain requires initialization parameters; call the initializer first")]
    NotInitialized,
    #[error("provider `{provider}` failed")]
    Provide {
        provider: Arc<str>,
        #[source]
        source: ProvideErrorKind,
    },
}
