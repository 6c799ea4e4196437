//! # lodestore core
//!
//! The core of an offline-first, reactive, multi-backend entity store:
//! a unified data-access engine between application code and pluggable
//! storage backends.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                     Store<T, K>                      │
//! │  (public facade: CRUD, watch, sync, invalidation)    │
//! └─────────────────────┬───────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────┐
//! │               FetchPolicyHandler                     │
//! │  (cacheFirst … networkOnly, staleness, tags)         │
//! └─────────────────────┬───────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────┐
//! │            [EncryptedBackend wrapper]                │
//! │  (field-level AEAD over the serialized form)         │
//! └─────────────────────┬───────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────┐
//! │               Backend<T, K> (trait)                  │
//! │  (memory, sqlite, crdt, cloud: uniform contract)     │
//! └──────────┬──────────────────────────┬───────────────┘
//!            │                          │
//! ┌──────────▼──────────┐    ┌──────────▼───────────────┐
//! │   WatcherRegistry   │    │    PendingChangeLog      │
//! │  (replay-1 subjects)│    │  (offline-write log)     │
//! └─────────────────────┘    └──────────────────────────┘
//! ```
//!
//! ## Key invariants
//!
//! - **Read-your-writes**: a successful `save` is visible to the next
//!   `get` on the same backend instance.
//! - **Reactive delivery**: watchers of an id observe a successful write
//!   within one scheduling turn; late subscribers replay the last value.
//! - **Lifecycle guards**: every data method fails with a state error
//!   before `initialize` or after `close`; both are idempotent.
//! - **Policy fallbacks**: cache-flavored policies never propagate fetch
//!   failures; only `networkOnly` and `cacheOnly` surface read errors.
//!
//! ## Example
//!
//! ```rust,ignore
//! use lodestore_core::{EntityAdapter, MemoryBackend, Store, StoreConfig};
//!
//! let backend = Arc::new(MemoryBackend::new(adapter.clone()));
//! let store = Store::new(backend, adapter, StoreConfig::new())?;
//! store.initialize().await?;
//!
//! store.save(user).await?;
//! let found = store.get(&id).await?;
//!
//! let mut watcher = store.watch(&id).await?;
//! while let Some(update) = watcher.recv().await { /* react */ }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
pub mod crypto;
mod encrypted;
mod entity;
mod error;
mod memory;
mod pending;
mod policy;
mod query;
mod store;
mod tracker;
mod types;
mod watch;

pub use backend::{Backend, DynBackend, Lifecycle};
pub use crypto::{EncryptionAlgorithm, EncryptionConfig, FieldEncryptionConfig, KeyProvider};
pub use encrypted::EncryptedBackend;
pub use entity::{EntityAdapter, EntityKey, FieldMap};
pub use error::{EncryptionFailure, PoolFailure, StoreError, StoreResult};
pub use memory::{MemoryBackend, SyncHandler};
pub use pending::{PendingChange, PendingChangeLog};
pub use policy::{CacheStats, FetchPolicy, FetchPolicyHandler};
pub use query::{
    apply_query, matches, paginate, Cursor, Filter, FilterOp, PageInfo, PagedResult, Query,
    SortTerm,
};
pub use store::{Store, StoreConfig};
pub use tracker::CacheAccessTracker;
pub use types::{Capabilities, ChangeOperation, ConflictDetails, ConflictKind, SyncStatus};
pub use watch::{Subject, Subscription, WatcherRegistry, ALL_QUERY_KEY};
