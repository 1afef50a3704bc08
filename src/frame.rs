use std::{any::TypeId, collections::BTreeMap, sync::Arc};

use crate::any::{ArcAny, TypeInfo};

/// Snapshot of every value produced so far while a chain executes.
///
/// Values are keyed by [`TypeId`] and shared, so cloning a frame is cheap:
/// it copies the map of `Arc` handles, not the values themselves.
#[derive(Clone, Default)]
pub struct Frame {
    map: BTreeMap<TypeId, ArcAny>,
}

impl Frame {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self { map: BTreeMap::new() }
    }

    #[must_use]
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|value| value.clone().downcast().ok())
    }

    #[inline]
    #[must_use]
    pub(crate) fn get_raw(&self, id: &TypeId) -> Option<ArcAny> {
        self.map.get(id).cloned()
    }

    #[inline]
    pub(crate) fn insert_raw(&mut self, info: TypeInfo, value: ArcAny) {
        self.map.insert(info.id, value);
    }
}
