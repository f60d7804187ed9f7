//! Adapter used when no remote store is configured.

use super::{ChangeCallback, RemoteAdapter, RemoteResult, Subscription};
use crate::error::RemoteError;
use crate::{Item, OwnerId};
use async_trait::async_trait;

/// Stand-in for a missing remote. Never available; every call fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalOnly;

fn not_configured<T>() -> RemoteResult<T> {
    Err(RemoteError::Network("remote store not configured".to_string()))
}

#[async_trait]
impl RemoteAdapter for LocalOnly {
    fn is_available(&self) -> bool {
        false
    }

    async fn fetch(&self, _collection: &str, _owner: Option<&OwnerId>) -> RemoteResult<Vec<Item>> {
        not_configured()
    }

    async fn insert(&self, _collection: &str, _item: &Item) -> RemoteResult<()> {
        not_configured()
    }

    async fn update(&self, _collection: &str, _item: &Item) -> RemoteResult<()> {
        not_configured()
    }

    async fn remove(&self, _collection: &str, _id: &str) -> RemoteResult<()> {
        not_configured()
    }

    fn subscribe(&self, _collection: &str, _on_change: ChangeCallback) -> Subscription {
        Subscription::inert()
    }
}
