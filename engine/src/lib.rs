//! # Stash Engine
//!
//! A local-first sync layer for collections of JSON items.
//!
//! Every collection is readable immediately from a durable cache and, when a
//! remote store is configured, kept in sync with it: writes apply locally
//! first and go to the remote in the background, and change notifications
//! from the remote trigger a refetch.
//!
//! ## Design Principles
//!
//! - **Local first**: reads never wait on the network; the cached list is shown
//!   until a fetch replaces it
//! - **Scoped**: each (collection, owner) pair has its own cache entry and
//!   remote filter
//! - **Optional remote**: without configuration everything still works
//!   against the cache alone
//!
//! ## Core Concepts
//!
//! ### Items
//!
//! An [`Item`] is a JSON object with an `id`, a `created_at` timestamp, an
//! optional `owner_id`, and any other fields. Lists are shown newest first.
//!
//! ### Cache
//!
//! [`PersistentCache`] stores one list per [`ScopeKey`] on top of a
//! [`KvStore`]. Storage failures are logged, never raised.
//!
//! ### Remote
//!
//! A [`RemoteAdapter`] fetches, writes and subscribes to one remote store.
//! [`remote::connect`] picks [`HttpRemote`] or [`LocalOnly`] from a
//! [`RemoteConfig`].
//!
//! ### Sync
//!
//! [`SyncEngine`] owns one collection for one owner and publishes a
//! [`CollectionView`]. [`Workspace`] keeps one engine per collection and
//! remounts them when the owner changes.
//!
//! ## Quick Start
//!
//! ```rust
//! use stash_engine::{CollectionDef, Draft, PersistentCache, RemoteConfig, Workspace};
//!
//! let workspace =
//!     Workspace::from_config(&RemoteConfig::local_only(), PersistentCache::in_memory()).unwrap();
//! workspace.set_owner(Some("alice".to_string()));
//!
//! let books = workspace.collection(&CollectionDef::new("books"));
//! books.add_item(Draft::new().with_field("title", "Dune"));
//!
//! let view = books.view();
//! assert_eq!(view.items.len(), 1);
//! assert!(!view.loading);
//! assert!(!view.is_remote);
//! ```

pub mod cache;
pub mod collection;
pub mod config;
pub mod engine;
pub mod error;
pub mod item;
pub mod remote;
pub mod view;
pub mod workspace;

// Re-export main types at crate root
pub use cache::{CacheEntry, FileKv, KvStore, MemoryKv, PersistentCache, ScopeKey};
pub use collection::CollectionDef;
pub use config::RemoteConfig;
pub use engine::{InstanceId, Phase, SyncEngine, SyncState, WriteHandle};
pub use error::{ConfigError, Error, RemoteError, Result, StorageError};
pub use item::{Draft, Item};
pub use remote::{
    ChangeCallback, HttpRemote, LocalOnly, MemoryRemote, RemoteAdapter, RemoteOp, Subscription,
};
pub use view::{CollectionView, ViewReceiver};
pub use workspace::Workspace;

/// Type aliases for clarity
pub type ItemId = String;
pub type OwnerId = String;
pub type CollectionName = String;
