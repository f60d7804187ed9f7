//! Read-only projection of a collection for presentation code.

use crate::Item;
use tokio::sync::watch;

/// What a consumer renders: the items, whether a fetch is running, and
/// whether a remote store backs the collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionView {
    pub items: Vec<Item>,
    pub loading: bool,
    pub is_remote: bool,
}

/// Live handle on a [`CollectionView`]. Updated synchronously on every
/// engine state change.
#[derive(Debug, Clone)]
pub struct ViewReceiver {
    rx: watch::Receiver<CollectionView>,
}

impl ViewReceiver {
    pub(crate) fn new(rx: watch::Receiver<CollectionView>) -> Self {
        Self { rx }
    }

    /// The latest view.
    pub fn current(&self) -> CollectionView {
        self.rx.borrow().clone()
    }

    /// Wait for the next change. `None` once the engine is gone.
    pub async fn changed(&mut self) -> Option<CollectionView> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Wait until no fetch is running and return that view.
    pub async fn wait_ready(&mut self) -> CollectionView {
        let ready = self.rx.wait_for(|view| !view.loading).await.map(|v| (*v).clone());
        ready.unwrap_or_else(|_| self.rx.borrow().clone())
    }
}
