//! Per-collection wiring supplied by the application.

use crate::{CollectionName, Item};

/// How a collection maps onto the remote store and the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionDef {
    /// Remote table / resource name
    pub name: CollectionName,
    /// Cache key; may differ from the table name
    pub cache_key: String,
    /// Shown until something has been cached for the scope
    pub seed: Vec<Item>,
}

impl CollectionDef {
    /// A collection cached under its own name, with no seed items.
    pub fn new(name: impl Into<CollectionName>) -> Self {
        let name = name.into();
        Self {
            cache_key: name.clone(),
            name,
            seed: Vec::new(),
        }
    }

    pub fn with_cache_key(mut self, cache_key: impl Into<String>) -> Self {
        self.cache_key = cache_key.into();
        self
    }

    pub fn with_seed(mut self, seed: Vec<Item>) -> Self {
        self.seed = seed;
        self
    }
}
