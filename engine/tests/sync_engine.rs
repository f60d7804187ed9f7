//! Behavioural tests for stash-engine
//!
//! These drive whole collections through the in-process remote and the
//! durable cache.

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use serde_json::json;
use stash_engine::{
    CollectionDef, Draft, Error, FileKv, Item, LocalOnly, MemoryRemote, PersistentCache, Phase,
    RemoteError, RemoteOp, ScopeKey, SyncEngine,
};
use std::sync::Arc;
use std::time::Duration;

fn item(id: &str, secs: i64) -> Item {
    Item::new(id, Utc.timestamp_opt(secs, 0).unwrap())
}

fn mount_local(cache: &PersistentCache) -> SyncEngine {
    SyncEngine::mount(
        CollectionDef::new("books"),
        Some("alice".to_string()),
        cache.clone(),
        Arc::new(LocalOnly),
    )
}

async fn mount_remote(remote: &Arc<MemoryRemote>, owner: Option<&str>) -> SyncEngine {
    let engine = SyncEngine::mount(
        CollectionDef::new("books"),
        owner.map(str::to_string),
        PersistentCache::in_memory(),
        remote.clone(),
    );
    engine.subscribe_view().wait_ready().await;
    engine
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

// ============================================================================
// Local-only mode
// ============================================================================

#[derive(Debug, Clone)]
enum LocalOp {
    Add(String),
    Update(usize, String),
    Delete(usize),
}

fn arb_local_op() -> impl Strategy<Value = LocalOp> {
    prop_oneof![
        "[a-z]{0,8}".prop_map(LocalOp::Add),
        (0usize..8, "[a-z]{0,8}").prop_map(|(i, t)| LocalOp::Update(i, t)),
        (0usize..8).prop_map(LocalOp::Delete),
    ]
}

proptest! {
    #[test]
    fn prop_view_matches_cache_offline(ops in prop::collection::vec(arb_local_op(), 1..24)) {
        let cache = PersistentCache::in_memory();
        let engine = mount_local(&cache);

        for op in ops {
            let current = engine.items();
            match op {
                LocalOp::Add(title) => {
                    engine.add_item(Draft::new().with_field("title", title));
                }
                LocalOp::Update(i, title) => {
                    if let Some(existing) = current.get(i % current.len().max(1)) {
                        engine.update_item(existing.clone().with_field("title", title));
                    }
                }
                LocalOp::Delete(i) => {
                    let id = current
                        .get(i % current.len().max(1))
                        .map(|item| item.id.clone())
                        .unwrap_or_else(|| "missing".to_string());
                    engine.delete_item(&id);
                }
            }

            prop_assert_eq!(cache.get(engine.scope()).unwrap_or_default(), engine.view().items);
        }
    }

    #[test]
    fn prop_cache_round_trip(
        entries in prop::collection::vec(("[a-z0-9]{1,12}", 0i64..2_000_000_000, "\\PC{0,16}", any::<i64>()), 0..32)
    ) {
        let cache = PersistentCache::in_memory();
        let scope = ScopeKey::new("books", None);
        let items: Vec<Item> = entries
            .into_iter()
            .map(|(id, secs, text, n)| item(&id, secs).with_field("f_text", text).with_field("f_num", n))
            .collect();

        cache.set(&scope, &items);
        prop_assert_eq!(cache.get(&scope), Some(items));
    }
}

#[test]
fn offline_add_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let cache = PersistentCache::new(Arc::new(FileKv::open(dir.path()).unwrap()));
    let engine = mount_local(&cache);

    engine.add_item(Draft::new().with_field("title", "X"));
    assert_eq!(engine.view().items[0].get("title"), Some(&json!("X")));
    drop(engine);

    let reopened = PersistentCache::new(Arc::new(FileKv::open(dir.path()).unwrap()));
    let engine = mount_local(&reopened);
    let items = engine.items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].get("title"), Some(&json!("X")));
    assert_eq!(items[0].owner_id.as_deref(), Some("alice"));
}

#[test]
fn newest_add_comes_first() {
    let cache = PersistentCache::in_memory();
    let engine = mount_local(&cache);

    engine.add_item(Draft::new().with_field("title", "first"));
    engine.add_item(Draft::new().with_field("title", "second"));

    let titles: Vec<_> = engine.items().iter().map(|i| i.get("title").cloned()).collect();
    assert_eq!(titles, vec![Some(json!("second")), Some(json!("first"))]);
}

#[test]
fn owners_do_not_share_cache() {
    let cache = PersistentCache::in_memory();
    let alice = mount_local(&cache);
    alice.add_item(Draft::new().with_field("title", "mine"));

    let bob = SyncEngine::mount(
        CollectionDef::new("books"),
        Some("bob".to_string()),
        cache.clone(),
        Arc::new(LocalOnly),
    );
    assert!(bob.items().is_empty());
    assert_eq!(cache.get(alice.scope()).unwrap().len(), 1);
}

// ============================================================================
// Remote mode
// ============================================================================

#[tokio::test(start_paused = true)]
async fn add_is_visible_before_remote_answers() {
    let remote = Arc::new(MemoryRemote::new());
    let engine = mount_remote(&remote, Some("alice")).await;

    let handle = engine.add_item(Draft::new().with_field("title", "X"));
    let view = engine.view();
    assert_eq!(view.items.len(), 1);
    assert_eq!(view.items[0].id, handle.id());
    assert!(remote.rows("books").is_empty());

    assert_eq!(handle.await, Ok(()));
    let rows = remote.rows("books");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].owner_id.as_deref(), Some("alice"));
}

#[tokio::test(start_paused = true)]
async fn remote_write_triggers_single_row_after_refetch() {
    let remote = Arc::new(MemoryRemote::new());
    let engine = mount_remote(&remote, None).await;

    engine.add_item(Draft::new().with_field("title", "X")).await.unwrap();
    settle().await;
    engine.subscribe_view().wait_ready().await;

    assert_eq!(engine.items().len(), 1);
    assert!(remote.call_count(RemoteOp::Fetch) >= 2);
}

#[tokio::test(start_paused = true)]
async fn delete_twice_is_same_as_once() {
    let remote = Arc::new(MemoryRemote::new());
    remote.seed("books", vec![item("a", 1), item("b", 2)]);
    let engine = mount_remote(&remote, None).await;

    assert_eq!(engine.delete_item("a").await, Ok(()));
    let once = engine.view().items;
    assert_eq!(engine.delete_item("a").await, Ok(()));

    assert_eq!(engine.view().items, once);
    assert_eq!(once.len(), 1);
    assert_eq!(once[0].id, "b");
}

#[tokio::test(start_paused = true)]
async fn delete_missing_remote_row_is_silent() {
    let cache = PersistentCache::in_memory();
    cache.set(&ScopeKey::new("books", None), &[item("local-only", 1)]);

    let remote = Arc::new(MemoryRemote::new());
    remote.hold_fetches();
    let engine = SyncEngine::mount(CollectionDef::new("books"), None, cache.clone(), remote.clone());
    assert_eq!(engine.items().len(), 1);

    let handle = engine.delete_item("local-only");
    assert!(engine.view().items.is_empty());
    assert!(cache.get(engine.scope()).unwrap().is_empty());

    assert_eq!(handle.await, Ok(()));
    remote.release_fetches();
    assert!(engine.subscribe_view().wait_ready().await.items.is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_remote_delete_keeps_item_removed() {
    let remote = Arc::new(MemoryRemote::new());
    remote.seed("books", vec![item("a", 1)]);
    let engine = mount_remote(&remote, None).await;

    remote.fail_next(RemoteOp::Remove, RemoteError::Network("offline".into()));
    assert_eq!(engine.delete_item("a").await, Ok(()));

    assert!(engine.items().is_empty());
    assert_eq!(
        engine.sync_state().last_error,
        Some(Error::Remote(RemoteError::Network("offline".into())))
    );
}

// ============================================================================
// Schema drift
// ============================================================================

#[tokio::test(start_paused = true)]
async fn missing_owner_column_is_retried_without_owner() {
    let remote = Arc::new(MemoryRemote::new());
    remote.set_columns("books", ["title"]);
    let engine = mount_remote(&remote, Some("alice")).await;

    let handle = engine.add_item(Draft::new().with_field("title", "X"));
    let id = handle.id().to_string();
    assert_eq!(handle.await, Ok(()));
    assert_eq!(remote.call_count(RemoteOp::Insert), 2);

    let rows = remote.rows("books");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, id);
    assert_eq!(rows[0].owner_id, None);

    settle().await;
    let view = engine.subscribe_view().wait_ready().await;
    assert!(view.items.iter().any(|i| i.id == id));
    assert_eq!(engine.sync_state().last_error, None);
}

#[tokio::test(start_paused = true)]
async fn schema_retry_happens_exactly_once() {
    let remote = Arc::new(MemoryRemote::new());
    let engine = mount_remote(&remote, None).await;

    remote.fail_next(RemoteOp::Insert, RemoteError::Schema { field: "rating".into() });
    remote.fail_next(RemoteOp::Insert, RemoteError::Query("still rejected".into()));

    let result = engine
        .add_item(Draft::new().with_field("title", "X").with_field("rating", 5))
        .await;

    assert_eq!(
        result,
        Err(Error::SchemaDrift {
            field: "rating".into(),
            cause: RemoteError::Query("still rejected".into()),
        })
    );
    assert_eq!(remote.call_count(RemoteOp::Insert), 2);
    // The local copy stays.
    assert_eq!(engine.items()[0].get("rating"), Some(&json!(5)));
}

#[tokio::test(start_paused = true)]
async fn schema_retry_drops_only_the_named_field() {
    let remote = Arc::new(MemoryRemote::new());
    let engine = mount_remote(&remote, None).await;

    remote.fail_next(RemoteOp::Insert, RemoteError::Schema { field: "rating".into() });
    engine
        .add_item(Draft::new().with_field("title", "X").with_field("rating", 5))
        .await
        .unwrap();

    let row = &remote.rows("books")[0];
    assert_eq!(row.get("title"), Some(&json!("X")));
    assert_eq!(row.get("rating"), None);
}

// ============================================================================
// Realtime
// ============================================================================

#[tokio::test(start_paused = true)]
async fn notifications_during_fetch_coalesce() {
    let remote = Arc::new(MemoryRemote::new());
    remote.hold_fetches();

    let engine = SyncEngine::mount(
        CollectionDef::new("books"),
        None,
        PersistentCache::in_memory(),
        remote.clone(),
    );
    settle().await;
    assert_eq!(remote.call_count(RemoteOp::Fetch), 1);

    for _ in 0..3 {
        remote.notify_change("books");
    }
    settle().await;
    assert_eq!(remote.call_count(RemoteOp::Fetch), 1);
    assert!(engine.view().loading);

    remote.release_fetches();
    let view = engine.subscribe_view().wait_ready().await;
    settle().await;

    assert!(!view.loading);
    assert_eq!(remote.call_count(RemoteOp::Fetch), 2);
    assert_eq!(engine.sync_state().phase, Phase::Ready);
}

#[tokio::test(start_paused = true)]
async fn notification_picks_up_foreign_writes() {
    let remote = Arc::new(MemoryRemote::new());
    let engine = mount_remote(&remote, None).await;
    assert!(engine.items().is_empty());

    remote.seed("books", vec![item("from-elsewhere", 5)]);
    remote.notify_change("books");
    settle().await;

    let view = engine.subscribe_view().wait_ready().await;
    assert_eq!(view.items.len(), 1);
    assert_eq!(view.items[0].id, "from-elsewhere");
}

#[tokio::test(start_paused = true)]
async fn torn_down_engine_ignores_notifications() {
    let remote = Arc::new(MemoryRemote::new());
    let engine = mount_remote(&remote, None).await;
    let fetches = remote.call_count(RemoteOp::Fetch);

    engine.teardown();
    remote.notify_change("books");
    settle().await;

    assert_eq!(remote.call_count(RemoteOp::Fetch), fetches);
    assert_eq!(remote.subscriber_count("books"), 0);
}
