use std::{collections::HashMap, hash::Hash, sync::Arc};

use parking_lot::Mutex;
use tracing::debug;

use crate::{
    any::{ArcAny, TypeInfo},
    errors::ProvideErrorKind,
};

/// One memoization bucket, owned by a single memoized provider and shared
/// by every collection and bound chain that provider is cloned into.
///
/// Entries live for the process lifetime; nothing is ever evicted. The
/// whole check-compute-store sequence runs under the bucket lock so
/// concurrent calls with an equal key never duplicate work observably.
pub struct MemoCell<K> {
    entries: Mutex<HashMap<K, Vec<(TypeInfo, ArcAny)>>>,
}

impl<K> MemoCell<K>
where
    K: Hash + Eq,
{
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached outputs for `key`, computing and storing them on
    /// first sight. A failed computation is not cached.
    pub fn get_or_compute(
        &self,
        key: K,
        compute: impl FnOnce() -> Result<Vec<(TypeInfo, ArcAny)>, ProvideErrorKind>,
    ) -> Result<Vec<(TypeInfo, ArcAny)>, ProvideErrorKind> {
        let mut entries = self.entries.lock();
        if let Some(values) = entries.get(&key) {
            debug!("Memo hit");
            return Ok(values.clone());
        }
        debug!("Memo miss");

        let values = compute()?;
        entries.insert(key, values.clone());
        Ok(values)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl<K: Hash + Eq> Default for MemoCell<K> {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) type SharedMemoCell<K> = Arc<MemoCell<K>>;
