//! In-process remote store.
//!
//! Behaves like a real remote for everything the engine observes: rows are
//! filtered by owner, sorted newest first, optional column sets reject
//! unknown fields, and every change is broadcast on the collection's change
//! channel. Fault injection, call counters and a fetch hold make it usable as
//! a deterministic test double.

use super::{ChangeCallback, RemoteAdapter, RemoteResult, Subscription};
use crate::error::RemoteError;
use crate::item::{sort_newest_first, CREATED_AT_FIELD, ID_FIELD, OWNER_FIELD};
use crate::{CollectionName, Item, OwnerId};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::sync::{broadcast, watch};

/// Capacity of each collection's change channel. Lagging subscribers just
/// see one notification for the whole burst.
const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Adapter calls, for fault injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    Fetch,
    Insert,
    Update,
    Remove,
}

#[derive(Debug, Default)]
struct Table {
    /// Permitted columns; `None` accepts anything
    columns: Option<HashSet<String>>,
    rows: Vec<Item>,
}

impl Table {
    fn check_columns(&self, item: &Item) -> RemoteResult<()> {
        let Some(columns) = &self.columns else {
            return Ok(());
        };

        match item.columns().find(|c| !columns.contains(*c)) {
            Some(field) => Err(RemoteError::Schema {
                field: field.to_string(),
            }),
            None => Ok(()),
        }
    }

    fn scoped_by_owner(&self) -> bool {
        self.columns
            .as_ref()
            .map_or(true, |columns| columns.contains(OWNER_FIELD))
    }
}

/// An in-memory [`RemoteAdapter`].
#[derive(Debug)]
pub struct MemoryRemote {
    tables: DashMap<CollectionName, Table>,
    channels: DashMap<CollectionName, broadcast::Sender<()>>,
    faults: Mutex<HashMap<RemoteOp, VecDeque<RemoteError>>>,
    calls: Mutex<HashMap<RemoteOp, usize>>,
    hold: watch::Sender<bool>,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            tables: DashMap::new(),
            channels: DashMap::new(),
            faults: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            hold: watch::channel(false).0,
        }
    }

    /// Restrict `collection` to the given columns plus `id` and `created_at`.
    pub fn set_columns<I, S>(&self, collection: &str, columns: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set: HashSet<String> = columns.into_iter().map(Into::into).collect();
        set.insert(ID_FIELD.to_string());
        set.insert(CREATED_AT_FIELD.to_string());

        self.tables.entry(collection.to_string()).or_default().columns = Some(set);
    }

    /// Store rows directly, without schema checks or notifications.
    pub fn seed(&self, collection: &str, items: impl IntoIterator<Item = Item>) {
        self.tables
            .entry(collection.to_string())
            .or_default()
            .rows
            .extend(items);
    }

    /// All rows of `collection`, newest first, ignoring owners.
    pub fn rows(&self, collection: &str) -> Vec<Item> {
        let mut rows = self
            .tables
            .get(collection)
            .map(|t| t.rows.clone())
            .unwrap_or_default();
        sort_newest_first(&mut rows);
        rows
    }

    /// Make the next call of kind `op` fail with `error`. Faults queue up.
    pub fn fail_next(&self, op: RemoteOp, error: RemoteError) {
        self.faults.lock().entry(op).or_default().push_back(error);
    }

    /// Number of calls of kind `op` so far, including failed ones.
    pub fn call_count(&self, op: RemoteOp) -> usize {
        self.calls.lock().get(&op).copied().unwrap_or(0)
    }

    /// Park every fetch until [`MemoryRemote::release_fetches`].
    pub fn hold_fetches(&self) {
        self.hold.send_replace(true);
    }

    /// Let parked and future fetches complete.
    pub fn release_fetches(&self) {
        self.hold.send_replace(false);
    }

    /// Fire a change notification on `collection`, as if another client wrote to it.
    pub fn notify_change(&self, collection: &str) {
        // No receivers is fine: nobody is listening.
        let _ = self.channel(collection).send(());
    }

    /// Number of live subscriptions on `collection`.
    pub fn subscriber_count(&self, collection: &str) -> usize {
        self.channels
            .get(collection)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    fn channel(&self, collection: &str) -> broadcast::Sender<()> {
        self.channels
            .entry(collection.to_string())
            .or_insert_with(|| broadcast::channel(CHANGE_CHANNEL_CAPACITY).0)
            .clone()
    }

    fn begin(&self, op: RemoteOp) -> RemoteResult<()> {
        *self.calls.lock().entry(op).or_default() += 1;

        match self.faults.lock().get_mut(&op).and_then(VecDeque::pop_front) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteAdapter for MemoryRemote {
    fn is_available(&self) -> bool {
        true
    }

    async fn fetch(&self, collection: &str, owner: Option<&OwnerId>) -> RemoteResult<Vec<Item>> {
        *self.calls.lock().entry(RemoteOp::Fetch).or_default() += 1;

        let mut held = self.hold.subscribe();
        // The sender lives in self, so this only ends once released.
        let _ = held.wait_for(|held| !*held).await;

        if let Some(error) = self
            .faults
            .lock()
            .get_mut(&RemoteOp::Fetch)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }

        let Some(table) = self.tables.get(collection) else {
            return Ok(Vec::new());
        };

        let filter = owner.filter(|_| table.scoped_by_owner());
        let mut rows: Vec<Item> = table
            .rows
            .iter()
            .filter(|row| filter.is_none() || row.owner_id.as_ref() == filter)
            .cloned()
            .collect();
        drop(table);

        sort_newest_first(&mut rows);
        Ok(rows)
    }

    async fn insert(&self, collection: &str, item: &Item) -> RemoteResult<()> {
        self.begin(RemoteOp::Insert)?;

        {
            let mut table = self.tables.entry(collection.to_string()).or_default();
            table.check_columns(item)?;

            if table.rows.iter().any(|row| row.id == item.id) {
                return Err(RemoteError::Query(format!("duplicate id: {}", item.id)));
            }
            table.rows.push(item.clone());
        }

        self.notify_change(collection);
        Ok(())
    }

    async fn update(&self, collection: &str, item: &Item) -> RemoteResult<()> {
        self.begin(RemoteOp::Update)?;

        {
            let mut table = self
                .tables
                .get_mut(collection)
                .ok_or_else(|| RemoteError::NotFound(item.id.clone()))?;
            table.check_columns(item)?;

            let row = table
                .rows
                .iter_mut()
                .find(|row| row.id == item.id)
                .ok_or_else(|| RemoteError::NotFound(item.id.clone()))?;
            *row = item.clone();
        }

        self.notify_change(collection);
        Ok(())
    }

    async fn remove(&self, collection: &str, id: &str) -> RemoteResult<()> {
        self.begin(RemoteOp::Remove)?;

        let removed = match self.tables.get_mut(collection) {
            Some(mut table) => {
                let before = table.rows.len();
                table.rows.retain(|row| row.id != id);
                table.rows.len() != before
            }
            None => false,
        };

        if removed {
            self.notify_change(collection);
        }
        Ok(())
    }

    fn subscribe(&self, collection: &str, on_change: ChangeCallback) -> Subscription {
        let mut rx = self.channel(collection).subscribe();

        Subscription::new(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => on_change(),
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn item(id: &str, secs: i64) -> Item {
        Item::new(id, Utc.timestamp_opt(secs, 0).unwrap())
    }

    #[tokio::test]
    async fn fetch_filters_by_owner_and_sorts() {
        let remote = MemoryRemote::new();
        remote.seed(
            "books",
            vec![
                item("a", 1).with_owner("alice"),
                item("b", 3).with_owner("bob"),
                item("c", 2).with_owner("alice"),
            ],
        );

        let alice = "alice".to_string();
        let rows = remote.fetch("books", Some(&alice)).await.unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a"]);

        let all = remote.fetch("books", None).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].id, "b");
    }

    #[tokio::test]
    async fn owner_filter_ignored_without_owner_column() {
        let remote = MemoryRemote::new();
        remote.set_columns("music", ["title"]);
        remote.seed("music", vec![item("a", 1)]);

        let rows = remote
            .fetch("music", Some(&"alice".to_string()))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn unknown_column_is_a_schema_error() {
        let remote = MemoryRemote::new();
        remote.set_columns("books", ["title"]);

        let err = remote
            .insert("books", &item("a", 1).with_owner("alice"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            RemoteError::Schema {
                field: "owner_id".into()
            }
        );

        remote
            .insert("books", &item("a", 1).with_field("title", "X"))
            .await
            .unwrap();
        assert_eq!(remote.rows("books").len(), 1);
    }

    #[tokio::test]
    async fn update_missing_row_is_not_found() {
        let remote = MemoryRemote::new();
        let err = remote.update("books", &item("ghost", 1)).await.unwrap_err();
        assert_eq!(err, RemoteError::NotFound("ghost".into()));
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let remote = MemoryRemote::new();
        remote.seed("books", vec![item("a", 1)]);

        remote.remove("books", "a").await.unwrap();
        remote.remove("books", "a").await.unwrap();
        remote.remove("nowhere", "a").await.unwrap();
        assert!(remote.rows("books").is_empty());
        assert_eq!(remote.call_count(RemoteOp::Remove), 3);
    }

    #[tokio::test]
    async fn injected_faults_fire_once_in_order() {
        let remote = MemoryRemote::new();
        remote.fail_next(RemoteOp::Fetch, RemoteError::Network("down".into()));
        remote.fail_next(RemoteOp::Fetch, RemoteError::Query("bad".into()));

        assert!(matches!(
            remote.fetch("books", None).await,
            Err(RemoteError::Network(_))
        ));
        assert!(matches!(
            remote.fetch("books", None).await,
            Err(RemoteError::Query(_))
        ));
        assert!(remote.fetch("books", None).await.is_ok());
        assert_eq!(remote.call_count(RemoteOp::Fetch), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn writes_notify_subscribers_until_cancelled() {
        let remote = MemoryRemote::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let mut sub = remote.subscribe(
            "books",
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        remote.insert("books", &item("a", 1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        sub.cancel();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(remote.subscriber_count("books"), 0);

        remote.notify_change("books");
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn held_fetch_waits_for_release() {
        let remote = Arc::new(MemoryRemote::new());
        remote.hold_fetches();

        let pending = tokio::spawn({
            let remote = remote.clone();
            async move { remote.fetch("books", None).await }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!pending.is_finished());
        assert_eq!(remote.call_count(RemoteOp::Fetch), 1);

        remote.release_fetches();
        assert!(pending.await.unwrap().unwrap().is_empty());
    }
}
