//! Change hub.
//!
//! One broadcast channel per collection. Write handlers publish a
//! [`ChangeNotice`] after committing; every open change socket on that
//! collection receives it.

use std::sync::Arc;

use dashmap::DashMap;
use stash_engine::remote::wire::{ChangeKind, ChangeNotice};
use tokio::sync::broadcast;

/// Buffered notices per collection. A socket that falls further behind gets
/// a single resync notice.
const CHANNEL_CAPACITY: usize = 256;

/// Fan-out of change notices, keyed by collection.
///
/// Thread-safe and can be shared across handlers via `Arc`.
#[derive(Debug, Default)]
pub struct ChangeHub {
    channels: DashMap<String, broadcast::Sender<ChangeNotice>>,
}

impl ChangeHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Create a hub wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Open a receiver of notices for `collection`.
    pub fn subscribe(&self, collection: &str) -> broadcast::Receiver<ChangeNotice> {
        let receiver = self
            .channels
            .entry(collection.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();

        tracing::info!(collection = %collection, "change socket subscribed");
        receiver
    }

    /// Announce a write on `collection`.
    ///
    /// Returns the number of sockets that received it.
    pub fn publish(&self, collection: &str, kind: ChangeKind) -> usize {
        let Some(sender) = self.channels.get(collection).map(|s| s.clone()) else {
            return 0;
        };

        let notice = ChangeNotice {
            collection: collection.to_string(),
            kind,
        };
        // Err only means nobody is listening right now.
        let sent = sender.send(notice).unwrap_or(0);

        if sent == 0 {
            self.prune(collection);
        }

        tracing::debug!(collection = %collection, kind = ?kind, recipients = sent, "published change");
        sent
    }

    /// Get the number of open sockets on `collection`.
    pub fn stream_count(&self, collection: &str) -> usize {
        self.channels
            .get(collection)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    fn prune(&self, collection: &str) {
        self.channels
            .remove_if(collection, |_, sender| sender.receiver_count() == 0);
    }
}
