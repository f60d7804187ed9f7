//! Sync engine - one instance per (collection, owner).
//!
//! The engine keeps three things consistent: the in-memory item list, the
//! [`PersistentCache`] entry for its scope, and the published
//! [`CollectionView`]. With a remote store it additionally fetches, writes
//! through, and refetches on change notifications.
//!
//! ## Phases
//!
//! - Local-only: `Uninitialized -> Ready` inside [`SyncEngine::mount`]
//! - Remote: `Uninitialized -> Loading -> Ready`, and back to `Loading` for
//!   every refetch. A failed fetch returns to `Ready` with `last_error` set
//!   and the previous items left in place.
//!
//! ## Writes
//!
//! Mutations apply locally before they return and hand back a
//! [`WriteHandle`] for the remote half. Awaiting it is optional.
//!
//! | Call | Remote failure |
//! |------|----------------|
//! | [`SyncEngine::add_item`] | unknown field: one retry without it, then [`Error::SchemaDrift`]; otherwise logged |
//! | [`SyncEngine::delete_item`] | logged; the item is never restored |
//! | [`SyncEngine::update_item`] | returned to the caller, except `NotFound` which is logged |
//!
//! [`SyncEngine::set_all`] only persists to the cache in local-only mode;
//! ordering is not stored remotely. With a remote, later writes keep
//! updating the cached order underneath the reordered view.

use crate::cache::{PersistentCache, ScopeKey};
use crate::collection::CollectionDef;
use crate::error::{Error, RemoteError, Result};
use crate::item::sort_newest_first;
use crate::remote::{ChangeCallback, RemoteAdapter, RemoteResult, Subscription};
use crate::view::{CollectionView, ViewReceiver};
use crate::{CollectionName, Draft, Item, ItemId, OwnerId};
use chrono::Utc;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Identity of one mounted engine instance.
pub type InstanceId = u64;

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// Lifecycle phase of an engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Loading,
    Ready,
}

/// Phase plus the most recent remote or storage failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncState {
    pub phase: Phase,
    pub last_error: Option<Error>,
}

#[derive(Debug)]
struct State {
    items: Vec<Item>,
    phase: Phase,
    last_error: Option<Error>,
    /// `Some(id)` while mounted; cleared by teardown
    attached: Option<InstanceId>,
    fetch_running: bool,
    /// At most one follow-up fetch is remembered
    fetch_queued: bool,
    /// Cache contents while a view-only reorder is showing
    cached_order: Option<Vec<Item>>,
}

struct Inner {
    id: InstanceId,
    def: CollectionDef,
    owner: Option<OwnerId>,
    scope: ScopeKey,
    cache: PersistentCache,
    remote: Arc<dyn RemoteAdapter>,
    remote_mode: bool,
    state: Mutex<State>,
    view: watch::Sender<CollectionView>,
    subscription: Mutex<Option<Subscription>>,
}

impl Inner {
    fn publish(&self, state: &State) {
        self.view.send_replace(CollectionView {
            items: state.items.clone(),
            loading: state.phase == Phase::Loading,
            is_remote: self.remote_mode,
        });
    }

    /// Apply one mutation to the local list and store it, then publish.
    ///
    /// After a view-only reorder the mutation is applied to the cached
    /// order as well and only that is stored.
    fn commit(&self, state: &mut State, change: impl Fn(&mut Vec<Item>)) {
        change(&mut state.items);
        match state.cached_order.as_mut() {
            Some(cached) => {
                change(cached);
                self.cache.set(&self.scope, cached);
            }
            None => self.cache.set(&self.scope, &state.items),
        }
        self.publish(state);
    }

    /// Apply one fetch result. Returns true if a queued fetch should run next.
    fn finish_fetch(&self, instance: InstanceId, result: RemoteResult<Vec<Item>>) -> bool {
        let mut state = self.state.lock();
        if state.attached != Some(instance) {
            tracing::debug!(
                collection = %self.def.name,
                instance,
                "discarding fetch result for detached instance"
            );
            return false;
        }

        match result {
            Ok(mut items) => {
                sort_newest_first(&mut items);
                tracing::debug!(
                    collection = %self.def.name,
                    scope = %self.scope,
                    count = items.len(),
                    "fetched collection"
                );
                state.items = items;
                state.cached_order = None;
                state.last_error = None;
                self.cache.set(&self.scope, &state.items);
            }
            Err(e) => {
                tracing::warn!(
                    collection = %self.def.name,
                    scope = %self.scope,
                    error = %e,
                    "fetch failed, keeping last known items"
                );
                state.last_error = Some(e.into());
            }
        }

        let again = std::mem::take(&mut state.fetch_queued);
        if !again {
            state.fetch_running = false;
            state.phase = Phase::Ready;
        }
        self.publish(&state);
        again
    }

    fn record_failure(&self, instance: InstanceId, error: Error) {
        let mut state = self.state.lock();
        if state.attached == Some(instance) {
            state.last_error = Some(error);
        }
    }
}

/// How a failed remote write reaches the caller.
enum Failure {
    /// Returned from the [`WriteHandle`]
    Surface(Error),
    /// Only logged and recorded in [`SyncState::last_error`]
    Logged(Error),
}

/// Local-first sync for one (collection, owner) pair.
///
/// Cheap to clone; clones share the instance. The instance is torn down by
/// [`SyncEngine::teardown`] or when the last clone is dropped.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<Inner>,
}

impl SyncEngine {
    /// Mount an instance: seed from the cache (or the collection's seed
    /// items), then either go ready (local-only) or subscribe and start the
    /// first fetch.
    ///
    /// In remote mode this must run inside a Tokio runtime; without one the
    /// instance serves cached items and records the failure.
    pub fn mount(
        def: CollectionDef,
        owner: Option<OwnerId>,
        cache: PersistentCache,
        remote: Arc<dyn RemoteAdapter>,
    ) -> Self {
        let scope = ScopeKey::new(&def.cache_key, owner.as_ref());
        let remote_mode = remote.is_available();
        let items = cache.get(&scope).unwrap_or_else(|| def.seed.clone());
        let id = NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed);

        let (view, _) = watch::channel(CollectionView {
            items: items.clone(),
            loading: false,
            is_remote: remote_mode,
        });

        tracing::debug!(
            collection = %def.name,
            scope = %scope,
            instance = id,
            remote = remote_mode,
            "mounting collection"
        );

        let engine = Self {
            inner: Arc::new(Inner {
                id,
                def,
                owner,
                scope,
                cache,
                remote,
                remote_mode,
                state: Mutex::new(State {
                    items,
                    phase: Phase::Uninitialized,
                    last_error: None,
                    attached: Some(id),
                    fetch_running: false,
                    fetch_queued: false,
                    cached_order: None,
                }),
                view,
                subscription: Mutex::new(None),
            }),
        };

        if !remote_mode {
            let mut state = engine.inner.state.lock();
            state.phase = Phase::Ready;
            engine.inner.publish(&state);
        } else if Handle::try_current().is_err() {
            tracing::error!(
                collection = %engine.inner.def.name,
                "remote store configured but no Tokio runtime is running, serving cached items"
            );
            let mut state = engine.inner.state.lock();
            state.phase = Phase::Ready;
            state.last_error = Some(no_runtime());
            engine.inner.publish(&state);
        } else {
            engine.subscribe_changes();
            engine.refresh();
        }

        engine
    }

    pub fn id(&self) -> InstanceId {
        self.inner.id
    }

    /// Remote collection name.
    pub fn collection(&self) -> &str {
        &self.inner.def.name
    }

    pub fn owner(&self) -> Option<&OwnerId> {
        self.inner.owner.as_ref()
    }

    pub fn scope(&self) -> &ScopeKey {
        &self.inner.scope
    }

    /// Whether a remote store backs this instance.
    pub fn is_remote(&self) -> bool {
        self.inner.remote_mode
    }

    /// False once torn down.
    pub fn is_attached(&self) -> bool {
        self.inner.state.lock().attached.is_some()
    }

    /// Snapshot of the current view.
    pub fn view(&self) -> CollectionView {
        self.inner.view.borrow().clone()
    }

    /// Live receiver for view updates.
    pub fn subscribe_view(&self) -> ViewReceiver {
        ViewReceiver::new(self.inner.view.subscribe())
    }

    /// Current items, in display order.
    pub fn items(&self) -> Vec<Item> {
        self.inner.state.lock().items.clone()
    }

    pub fn sync_state(&self) -> SyncState {
        let state = self.inner.state.lock();
        SyncState {
            phase: state.phase,
            last_error: state.last_error.clone(),
        }
    }

    /// Fetch from the remote. If a fetch is already running, one more is
    /// queued to run after it; further requests fold into that one.
    pub fn refresh(&self) {
        let inner = &self.inner;
        if !inner.remote_mode {
            return;
        }

        {
            let mut state = inner.state.lock();
            if state.attached.is_none() {
                return;
            }
            if state.fetch_running {
                state.fetch_queued = true;
                tracing::trace!(collection = %inner.def.name, "fetch running, queued a refetch");
                return;
            }
            state.fetch_running = true;
            state.phase = Phase::Loading;
            inner.publish(&state);
        }

        let weak = Arc::downgrade(inner);
        let instance = inner.id;
        let remote = inner.remote.clone();
        let collection = inner.def.name.clone();
        let owner = inner.owner.clone();

        let fetches = async move {
            loop {
                let result = remote.fetch(&collection, owner.as_ref()).await;
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if !inner.finish_fetch(instance, result) {
                    return;
                }
            }
        };

        if spawn(fetches).is_none() {
            let mut state = inner.state.lock();
            state.fetch_running = false;
            state.fetch_queued = false;
            state.phase = Phase::Ready;
            state.last_error = Some(no_runtime());
            inner.publish(&state);
        }
    }

    /// Add an item. It is prepended to the view and cache before this
    /// returns; the remote insert carries the owner scope.
    pub fn add_item(&self, draft: Draft) -> WriteHandle {
        let inner = &self.inner;
        let mut item = draft.into_item(Utc::now());
        item.owner_id = inner.owner.clone();
        let id = item.id.clone();

        {
            let mut state = inner.state.lock();
            if state.attached.is_none() {
                return WriteHandle::finished(id, Err(Error::Detached));
            }
            inner.commit(&mut state, |items| {
                items.retain(|existing| existing.id != item.id);
                items.insert(0, item.clone());
            });
        }
        tracing::debug!(collection = %inner.def.name, id = %id, "item added locally");

        if !inner.remote_mode {
            return WriteHandle::finished(id, Ok(()));
        }

        let remote = inner.remote.clone();
        let collection = inner.def.name.clone();
        self.spawn_write(id, async move {
            insert_with_retry(remote.as_ref(), &collection, item).await
        })
    }

    /// Replace the item with the same id. Remote failures other than
    /// `NotFound` are returned from the handle so the caller can retry or revert.
    pub fn update_item(&self, item: Item) -> WriteHandle {
        let inner = &self.inner;
        let id = item.id.clone();

        {
            let mut state = inner.state.lock();
            if state.attached.is_none() {
                return WriteHandle::finished(id, Err(Error::Detached));
            }
            if !state.items.iter().any(|existing| existing.id == item.id) {
                tracing::debug!(collection = %inner.def.name, id = %id, "updated item not present locally");
            }
            inner.commit(&mut state, |items| {
                if let Some(slot) = items.iter_mut().find(|existing| existing.id == item.id) {
                    *slot = item.clone();
                }
            });
        }

        if !inner.remote_mode {
            return WriteHandle::finished(id, Ok(()));
        }

        let remote = inner.remote.clone();
        let collection = inner.def.name.clone();
        self.spawn_write(id, async move {
            match remote.update(&collection, &item).await {
                Ok(()) => Ok(()),
                Err(RemoteError::NotFound(id)) => {
                    tracing::warn!(collection = %collection, id = %id, "update target missing remotely, keeping local copy");
                    Err(Failure::Logged(RemoteError::NotFound(id).into()))
                }
                Err(e) => {
                    tracing::warn!(collection = %collection, id = %item.id, error = %e, "remote update failed");
                    Err(Failure::Surface(e.into()))
                }
            }
        })
    }

    /// Remove an item. It stays removed locally whatever the remote says.
    pub fn delete_item(&self, id: &str) -> WriteHandle {
        let inner = &self.inner;
        let id = id.to_string();

        {
            let mut state = inner.state.lock();
            if state.attached.is_none() {
                return WriteHandle::finished(id, Err(Error::Detached));
            }
            inner.commit(&mut state, |items| items.retain(|existing| existing.id != id));
        }

        if !inner.remote_mode {
            return WriteHandle::finished(id, Ok(()));
        }

        let remote = inner.remote.clone();
        let collection = inner.def.name.clone();
        let target = id.clone();
        self.spawn_write(id, async move {
            remote.remove(&collection, &target).await.map_err(|e| {
                tracing::warn!(collection = %collection, id = %target, error = %e, "remote delete failed");
                Failure::Logged(e.into())
            })
        })
    }

    /// Replace the whole list, e.g. after a reorder. Persisted to the cache
    /// only in local-only mode; with a remote this is view-only.
    pub fn set_all(&self, items: Vec<Item>) {
        let inner = &self.inner;
        let mut state = inner.state.lock();
        if state.attached.is_none() {
            return;
        }

        if inner.remote_mode {
            if state.cached_order.is_none() {
                state.cached_order = Some(std::mem::take(&mut state.items));
            }
            state.items = items;
            inner.publish(&state);
        } else {
            inner.commit(&mut state, |current| *current = items.clone());
        }
    }

    /// Detach: cancel the change subscription and discard any fetch that
    /// completes afterwards. Idempotent.
    pub fn teardown(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.attached.take().is_none() {
                return;
            }
            state.fetch_queued = false;
        }

        if let Some(mut subscription) = self.inner.subscription.lock().take() {
            subscription.cancel();
        }

        tracing::debug!(
            collection = %self.inner.def.name,
            scope = %self.inner.scope,
            instance = self.inner.id,
            "collection torn down"
        );
    }

    fn subscribe_changes(&self) {
        let weak = Arc::downgrade(&self.inner);
        let on_change: ChangeCallback = Arc::new(move || {
            if let Some(inner) = weak.upgrade() {
                SyncEngine { inner }.refresh();
            }
        });

        let subscription = self.inner.remote.subscribe(&self.inner.def.name, on_change);
        *self.inner.subscription.lock() = Some(subscription);
    }

    fn spawn_write<F>(&self, id: ItemId, write: F) -> WriteHandle
    where
        F: Future<Output = std::result::Result<(), Failure>> + Send + 'static,
    {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let instance = self.inner.id;

        let task = async move {
            let (error, surfaced) = match write.await {
                Ok(()) => return Ok(()),
                Err(Failure::Surface(error)) => (error, true),
                Err(Failure::Logged(error)) => (error, false),
            };

            if let Some(inner) = weak.upgrade() {
                inner.record_failure(instance, error.clone());
            }

            if surfaced {
                Err(error)
            } else {
                Ok(())
            }
        };

        match spawn(task) {
            Some(task) => WriteHandle::running(id, task),
            None => WriteHandle::finished(id, Err(Error::WriteAborted(no_runtime().to_string()))),
        }
    }
}

impl fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncEngine")
            .field("id", &self.inner.id)
            .field("collection", &self.inner.def.name)
            .field("scope", &self.inner.scope)
            .field("remote", &self.inner.remote_mode)
            .finish_non_exhaustive()
    }
}

/// Insert, retrying once without a field the remote schema lacks.
async fn insert_with_retry(
    remote: &dyn RemoteAdapter,
    collection: &CollectionName,
    item: Item,
) -> std::result::Result<(), Failure> {
    let field = match remote.insert(collection, &item).await {
        Ok(()) => return Ok(()),
        Err(RemoteError::Schema { field }) => field,
        Err(e) => {
            tracing::warn!(collection = %collection, id = %item.id, error = %e, "remote insert failed, item kept locally");
            return Err(Failure::Logged(e.into()));
        }
    };

    let Some(stripped) = item.without_field(&field) else {
        return Err(Failure::Surface(Error::SchemaDrift {
            cause: RemoteError::Schema {
                field: field.clone(),
            },
            field,
        }));
    };

    tracing::warn!(collection = %collection, id = %item.id, field = %field, "remote rejected field, retrying without it");

    match remote.insert(collection, &stripped).await {
        Ok(()) => Ok(()),
        Err(cause) => {
            tracing::error!(collection = %collection, id = %item.id, field = %field, error = %cause, "insert failed without field");
            Err(Failure::Surface(Error::SchemaDrift { field, cause }))
        }
    }
}

fn spawn<F>(future: F) -> Option<JoinHandle<F::Output>>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    match Handle::try_current() {
        Ok(handle) => Some(handle.spawn(future)),
        Err(_) => {
            tracing::error!("no Tokio runtime available for remote call");
            None
        }
    }
}

fn no_runtime() -> Error {
    Error::Remote(RemoteError::Network("no Tokio runtime available".to_string()))
}

/// The remote half of a mutation.
///
/// Resolves once the remote call settles. Dropping it detaches the write;
/// it still runs to completion.
#[derive(Debug)]
pub struct WriteHandle {
    id: ItemId,
    state: WriteState,
}

#[derive(Debug)]
enum WriteState {
    Finished(Option<Result<()>>),
    Running(JoinHandle<Result<()>>),
}

impl WriteHandle {
    fn finished(id: ItemId, result: Result<()>) -> Self {
        Self {
            id,
            state: WriteState::Finished(Some(result)),
        }
    }

    fn running(id: ItemId, task: JoinHandle<Result<()>>) -> Self {
        Self {
            id,
            state: WriteState::Running(task),
        }
    }

    /// Id of the affected item.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_finished(&self) -> bool {
        match &self.state {
            WriteState::Finished(_) => true,
            WriteState::Running(task) => task.is_finished(),
        }
    }
}

impl Future for WriteHandle {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.state {
            WriteState::Finished(result) => Poll::Ready(result.take().unwrap_or(Ok(()))),
            WriteState::Running(task) => Pin::new(task)
                .poll(cx)
                .map(|joined| joined.unwrap_or_else(|e| Err(Error::WriteAborted(e.to_string())))),
        }
    }
}
