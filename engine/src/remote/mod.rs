//! Remote store abstraction.
//!
//! A [`RemoteAdapter`] wraps one remote persistent store: it fetches and
//! writes whole items, classifies every failure into [`RemoteError`], and
//! delivers payload-less change notifications through a [`Subscription`].
//!
//! Adapters:
//! - [`LocalOnly`] - no remote configured; never available
//! - [`MemoryRemote`] - in-process store, also used to drive tests
//! - [`HttpRemote`] - the stash-server HTTP API

mod http;
mod local;
mod memory;
pub mod wire;

pub use http::HttpRemote;
pub use local::LocalOnly;
pub use memory::{MemoryRemote, RemoteOp};

use crate::config::RemoteConfig;
use crate::error::{RemoteError, Result};
use crate::{Item, OwnerId};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Result type for adapter calls.
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Invoked whenever something in a subscribed collection may have changed.
pub type ChangeCallback = Arc<dyn Fn() + Send + Sync>;

/// A remote persistent store.
#[async_trait]
pub trait RemoteAdapter: Send + Sync {
    /// Whether a remote is configured. Fixed for the adapter's lifetime.
    fn is_available(&self) -> bool;

    /// All items of `collection` visible to `owner`, newest first.
    async fn fetch(&self, collection: &str, owner: Option<&OwnerId>) -> RemoteResult<Vec<Item>>;

    /// Insert a new row.
    async fn insert(&self, collection: &str, item: &Item) -> RemoteResult<()>;

    /// Replace the row with `item.id`.
    async fn update(&self, collection: &str, item: &Item) -> RemoteResult<()>;

    /// Remove the row with `id`. Removing a missing row succeeds.
    async fn remove(&self, collection: &str, id: &str) -> RemoteResult<()>;

    /// Call `on_change` on every insert, update or delete in `collection`.
    ///
    /// Must be called from within a Tokio runtime.
    fn subscribe(&self, collection: &str, on_change: ChangeCallback) -> Subscription;
}

/// Handle to a change subscription. Cancelled on [`Subscription::cancel`] or drop.
#[derive(Debug)]
pub struct Subscription {
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Wrap the task that delivers notifications.
    pub fn new(task: JoinHandle<()>) -> Self {
        Self { task: Some(task) }
    }

    /// A subscription that never fires.
    pub fn inert() -> Self {
        Self { task: None }
    }

    /// Stop delivering notifications and release the underlying connection.
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// Whether notifications may still be delivered.
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Build the adapter for `config`.
///
/// Returns [`HttpRemote`] when both endpoint and credential are set, and
/// [`LocalOnly`] otherwise.
pub fn connect(config: &RemoteConfig) -> Result<Arc<dyn RemoteAdapter>> {
    if !config.is_configured() {
        tracing::info!("remote store not configured, running local-only");
        return Ok(Arc::new(LocalOnly));
    }

    let remote = HttpRemote::new(config)?;
    tracing::info!(endpoint = %remote.endpoint(), "using remote store");
    Ok(Arc::new(remote))
}
