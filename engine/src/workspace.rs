//! Registry of mounted collections sharing one cache, remote and owner.

use crate::cache::{PersistentCache, ScopeKey};
use crate::collection::CollectionDef;
use crate::config::RemoteConfig;
use crate::engine::SyncEngine;
use crate::error::Result;
use crate::remote::{self, RemoteAdapter};
use crate::{CollectionName, OwnerId};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;

/// Owns at most one [`SyncEngine`] per collection for the current owner.
///
/// Changing the owner tears every instance down; the next
/// [`Workspace::collection`] call mounts a fresh one under the new scope.
pub struct Workspace {
    cache: PersistentCache,
    remote: Arc<dyn RemoteAdapter>,
    owner: RwLock<Option<OwnerId>>,
    engines: DashMap<CollectionName, SyncEngine>,
}

impl Workspace {
    pub fn new(cache: PersistentCache, remote: Arc<dyn RemoteAdapter>) -> Self {
        Self {
            cache,
            remote,
            owner: RwLock::new(None),
            engines: DashMap::new(),
        }
    }

    /// Connect according to `config`, falling back to local-only when it is
    /// incomplete.
    pub fn from_config(config: &RemoteConfig, cache: PersistentCache) -> Result<Self> {
        Ok(Self::new(cache, remote::connect(config)?))
    }

    pub fn is_remote(&self) -> bool {
        self.remote.is_available()
    }

    pub fn owner(&self) -> Option<OwnerId> {
        self.owner.read().clone()
    }

    /// The engine for `def`, mounting it if needed.
    ///
    /// A detached instance, or one mounted under a different scope, is
    /// replaced.
    pub fn collection(&self, def: &CollectionDef) -> SyncEngine {
        let owner = self.owner.read();
        let scope = ScopeKey::new(&def.cache_key, owner.as_ref());

        let mut entry = self
            .engines
            .entry(def.name.clone())
            .or_insert_with(|| self.mount(def, owner.clone()));

        if !entry.is_attached() || entry.scope() != &scope {
            entry.teardown();
            *entry = self.mount(def, owner.clone());
        }

        entry.clone()
    }

    /// Switch the current owner. Returns false if it did not change.
    pub fn set_owner(&self, owner: Option<OwnerId>) -> bool {
        let mut current = self.owner.write();
        if *current == owner {
            return false;
        }

        tracing::info!(
            from = ?*current,
            to = ?owner,
            collections = self.engines.len(),
            "owner changed, remounting collections"
        );
        *current = owner;
        self.teardown();
        true
    }

    /// Tear down and forget every mounted collection.
    pub fn teardown(&self) {
        for engine in self.engines.iter() {
            engine.teardown();
        }
        self.engines.clear();
    }

    /// Number of mounted collections.
    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    fn mount(&self, def: &CollectionDef, owner: Option<OwnerId>) -> SyncEngine {
        SyncEngine::mount(def.clone(), owner, self.cache.clone(), self.remote.clone())
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.teardown();
    }
}
