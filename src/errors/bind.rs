use std::{error::Error, fmt, sync::Arc};

use crate::any::TypeInfo;

/// A single wiring defect found while binding a collection.
///
/// Positions refer to the flattened provider pool in declaration order;
/// `None` means the defect is on the caller-supplied invoke/init signature
/// rather than on a provider.
#[derive(thiserror::Error, Debug)]
pub enum BindErrorKind {
    #[error("no producer for {needed} required by `{consumer}`{}", position_suffix(.position))]
    UnmetDependency {
        consumer: Arc<str>,
        position: Option<usize>,
        needed: TypeInfo,
    },
    #[error("ambiguous producers for {needed} required by `{consumer}`: {}", .candidates.join(", "))]
    AmbiguousResolution {
        consumer: Arc<str>,
        needed: TypeInfo,
        candidates: Vec<String>,
    },
    #[error("dependency cycle prevents ordering: {}", .unplaced.join(", "))]
    Cycle { unplaced: Vec<String> },
    #[error("`{provider}` is marked must_cache but cannot run in the static segment")]
    InvalidCachePlacement { provider: Arc<str> },
    #[error("`{provider}` combines must_cache with not_cacheable")]
    ConflictingCacheFlags { provider: Arc<str> },
    #[error("output {output} of `{provider}` is never consumed")]
    UnconsumedOutput { provider: Arc<str>, output: TypeInfo },
    #[error("malformed signature: {detail}")]
    MalformedSignature { detail: String },
}

fn position_suffix(position: &Option<usize>) -> String {
    position.map_or_else(String::new, |index| format!(" (position {index})"))
}

/// Aggregate of every defect found during one `bind` call.
///
/// Binding is all-or-nothing: on any defect no chain is produced and the
/// full list is reported so one round trip fixes all wiring mistakes.
#[derive(Debug)]
pub struct BindError {
    pub chain: Arc<str>,
    pub errors: Vec<BindErrorKind>,
}

impl BindError {
    #[must_use]
    pub(crate) fn new(chain: Arc<str>, errors: Vec<BindErrorKind>) -> Self {
        Self { chain, errors }
    }
}

impl fmt::Display for BindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "binding `{}` failed:", self.chain)?;
        for err in &self.errors {
            write!(f, "\n  - {err}")?;
        }
        Ok(())
    }
}

impl Error for BindError {}
