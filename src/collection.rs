use std::sync::Arc;

use crate::{
    extract::Extract,
    factory::Factory,
    provider::{instance, provider, Provider},
};

/// An ordered, immutable list of providers and nested collections.
///
/// Order is meaningful: it is the default execution order, and the final
/// entry is the chain's terminal function. Combinator methods consume the
/// collection and return an extended copy; [`Collection::append`] combines
/// two collections without touching either.
#[derive(Clone)]
pub struct Collection {
    pub(crate) name: Arc<str>,
    pub(crate) items: Vec<Item>,
    pub(crate) is_cluster: bool,
}

#[derive(Clone)]
pub(crate) enum Item {
    Provider(Provider),
    Collection(Collection),
}

/// One provider after flattening: its derived display name plus the
/// innermost-to-outermost cluster it belongs to, if any.
#[derive(Clone)]
pub(crate) struct FlatEntry {
    pub(crate) provider: Provider,
    pub(crate) name: Arc<str>,
    pub(crate) cluster: Option<u64>,
}

impl Collection {
    /// Creates an empty named collection.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            items: Vec::new(),
            is_cluster: false,
        }
    }

    /// Creates an empty cluster: a collection whose members are included in
    /// a chain all together or not at all.
    #[must_use]
    pub fn cluster(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            items: Vec::new(),
            is_cluster: true,
        }
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Appends a function provider built from `f`.
    #[must_use]
    pub fn provide<F, Deps>(mut self, f: F) -> Self
    where
        F: Factory<Deps>,
        Deps: Extract,
    {
        self.items.push(Item::Provider(provider(f)));
        self
    }

    /// Appends a constant provider.
    #[must_use]
    pub fn value<T: Send + Sync + 'static>(mut self, value: T) -> Self {
        self.items.push(Item::Provider(instance(value)));
        self
    }

    /// Appends an already-built provider, keeping its annotations.
    #[must_use]
    pub fn with(mut self, provider: Provider) -> Self {
        self.items.push(Item::Provider(provider));
        self
    }

    /// Appends a whole collection as one item. A nested cluster keeps its
    /// all-or-nothing inclusion behavior.
    #[must_use]
    pub fn nest(mut self, collection: Collection) -> Self {
        self.items.push(Item::Collection(collection));
        self
    }

    /// Combines this collection with another under a new name, leaving both
    /// inputs untouched.
    #[must_use]
    pub fn append(&self, name: &str, other: &Collection) -> Collection {
        Collection {
            name: Arc::from(name),
            items: vec![Item::Collection(self.clone()), Item::Collection(other.clone())],
            is_cluster: false,
        }
    }

    /// Depth-first flattening into the declaration-ordered provider list.
    ///
    /// Unnamed providers get a positional name, `"{collection}[{index}]"`.
    /// Members of nested clusters carry the id of the outermost cluster
    /// containing them.
    pub(crate) fn flatten(&self) -> Vec<FlatEntry> {
        let mut entries = Vec::new();
        let mut next_cluster = 0_u64;
        self.flatten_into(&mut entries, None, &mut next_cluster);
        entries
    }

    fn flatten_into(&self, entries: &mut Vec<FlatEntry>, cluster: Option<u64>, next_cluster: &mut u64) {
        let cluster = if self.is_cluster && cluster.is_none() {
            let id = *next_cluster;
            *next_cluster += 1;
            Some(id)
        } else {
            cluster
        };

        for (index, item) in self.items.iter().enumerate() {
            match item {
                Item::Provider(provider) => {
                    let name = provider
                        .label
                        .clone()
                        .unwrap_or_else(|| Arc::from(format!("{}[{index}]", self.name)));
                    entries.push(FlatEntry {
                        provider: provider.clone(),
                        name,
                        cluster,
                    });
                }
                Item::Collection(inner) => inner.flatten_into(entries, cluster, next_cluster),
            }
        }
    }
}
