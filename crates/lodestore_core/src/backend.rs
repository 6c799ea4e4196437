//! The uniform storage backend contract.
//!
//! Every storage engine (embedded SQL, CRDT-replicated, cloud record
//! store, or an encrypting wrapper over any of them) implements
//! [`Backend`] with the same semantics for reads, writes, watchers, sync
//! status, paging, and the pending-change lifecycle. The core owns all
//! interpretation; backends adapt concrete engines behind this trait.
//!
//! # Invariants
//!
//! - `save(item)` followed by `get(id_of(item))` returns the saved value
//!   against the same backend instance (read-your-writes locally).
//! - Watchers of an id observe a successful write of that id within one
//!   scheduling turn.
//! - Every data method fails with a lifecycle state error before
//!   `initialize` or after `close`; both of those are idempotent.

use crate::entity::EntityKey;
use crate::error::{StoreError, StoreResult};
use crate::pending::PendingChange;
use crate::query::{paginate, PagedResult, Query};
use crate::types::{Capabilities, ConflictDetails, SyncStatus};
use crate::watch::{Subject, Subscription};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;

/// A shared handle to a backend.
pub type DynBackend<T, K> = Arc<dyn Backend<T, K>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LifecycleState {
    Created,
    Ready,
    Closed,
}

/// Tracks a backend's initialize/close lifecycle and guards data methods.
#[derive(Debug)]
pub struct Lifecycle {
    state: RwLock<LifecycleState>,
}

impl Lifecycle {
    /// Creates a guard in the uninitialized state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(LifecycleState::Created),
        }
    }

    /// Fails unless the backend has been initialized and not closed.
    pub fn ensure_ready(&self) -> StoreResult<()> {
        match *self.state.read() {
            LifecycleState::Ready => Ok(()),
            LifecycleState::Created => Err(StoreError::uninitialized()),
            LifecycleState::Closed => Err(StoreError::closed()),
        }
    }

    /// Transitions to ready. Returns false when already ready (no-op).
    ///
    /// Initializing a closed backend is an error; a failed initialization
    /// leaves the guard untouched so a later attempt is permitted.
    pub fn open(&self) -> StoreResult<bool> {
        let mut state = self.state.write();
        match *state {
            LifecycleState::Created => {
                *state = LifecycleState::Ready;
                Ok(true)
            }
            LifecycleState::Ready => Ok(false),
            LifecycleState::Closed => Err(StoreError::closed()),
        }
    }

    /// Transitions to closed. Returns false when already closed (no-op).
    pub fn shut(&self) -> bool {
        let mut state = self.state.write();
        if *state == LifecycleState::Closed {
            false
        } else {
            *state = LifecycleState::Closed;
            true
        }
    }

    /// Returns true while the backend is usable.
    pub fn is_ready(&self) -> bool {
        *self.state.read() == LifecycleState::Ready
    }

    /// Returns true once the backend has been closed.
    pub fn is_closed(&self) -> bool {
        *self.state.read() == LifecycleState::Closed
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// The polymorphic storage contract.
///
/// `T` is the entity type, `K` its key. Backends are driven from a
/// single owning task; watcher emissions are delivered on that task's
/// scheduler.
#[async_trait]
pub trait Backend<T, K>: Send + Sync
where
    T: Clone + Send + Sync + 'static,
    K: EntityKey,
{
    /// Stable short identifier, e.g. `"sqlite"`, `"crdt"`, `"cloud"`.
    fn name(&self) -> &str;

    /// Capability flags for this backend.
    fn capabilities(&self) -> Capabilities;

    /// Acquires underlying resources. Idempotent.
    async fn initialize(&self) -> StoreResult<()>;

    /// Closes all subjects, cancels subscriptions, zeroes key material.
    /// Idempotent.
    async fn close(&self) -> StoreResult<()>;

    /// Returns the current value for `id`, or `None`.
    async fn get(&self, id: &K) -> StoreResult<Option<T>>;

    /// Returns all matching entities in query order.
    async fn get_all(&self, query: Option<&Query>) -> StoreResult<Vec<T>>;

    /// Upserts by id; notifies watchers.
    async fn save(&self, item: T) -> StoreResult<T>;

    /// Batch upsert; transactional where the backend supports it,
    /// otherwise per-item, stopping on the first unrecoverable error.
    async fn save_all(&self, items: Vec<T>) -> StoreResult<Vec<T>> {
        let mut saved = Vec::with_capacity(items.len());
        for item in items {
            saved.push(self.save(item).await?);
        }
        Ok(saved)
    }

    /// Removes the entity. Returns true iff something was removed.
    async fn delete(&self, id: &K) -> StoreResult<bool>;

    /// Deletes the listed ids, returning the count removed.
    /// Empty input returns zero without touching the store.
    async fn delete_all(&self, ids: &[K]) -> StoreResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut deleted = 0;
        for id in ids {
            if self.delete(id).await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Deletes all entities matching the query; refreshes query watchers.
    async fn delete_where(&self, query: &Query) -> StoreResult<usize>;

    /// Watches a single id; replays the last observed value to late
    /// subscribers.
    async fn watch(&self, id: &K) -> StoreResult<Subscription<Option<T>>>;

    /// Watches a query; one shared subject per canonical query key.
    async fn watch_all(&self, query: Option<&Query>) -> StoreResult<Subscription<Vec<T>>>;

    /// Triggers an upload+download round. A no-op for local-only backends.
    async fn sync(&self) -> StoreResult<()>;

    /// Current synchronization status.
    fn sync_status(&self) -> SyncStatus;

    /// Status change stream (replay-1).
    fn sync_status_stream(&self) -> Subscription<SyncStatus>;

    /// Number of unsynced local mutations.
    fn pending_changes_count(&self) -> usize;

    /// Snapshots of the pending-change list, one per mutation.
    fn pending_changes_stream(&self) -> Subscription<Vec<PendingChange<T>>>;

    /// Per-conflict events surfaced during sync.
    fn conflicts_stream(&self) -> Subscription<ConflictDetails<T>>;

    /// Re-attempts a pending change. See the pending-change log for the
    /// bookkeeping contract.
    async fn retry_change(&self, change_id: &str) -> StoreResult<()>;

    /// Cancels a pending change by applying its inverse compensation.
    async fn cancel_change(&self, change_id: &str) -> StoreResult<()>;

    /// Cursor-paged read. The default slices `get_all` through the
    /// offset-cursor window.
    async fn get_all_paged(&self, query: Option<&Query>) -> StoreResult<PagedResult<T>> {
        let items = self.get_all(query).await?;
        Ok(paginate(items, query))
    }

    /// Cursor-paged watch: `watch_all` mapped through the same slicing.
    async fn watch_all_paged(
        &self,
        query: Option<&Query>,
    ) -> StoreResult<Subscription<PagedResult<T>>> {
        let mut inner = self.watch_all(query).await?;
        let subject: Subject<PagedResult<T>> = Subject::new();
        let emitter = subject.clone();
        let query = query.cloned();
        let subscription = subject.subscribe();
        tokio::spawn(async move {
            while let Some(event) = inner.recv().await {
                match event {
                    Ok(items) => emitter.emit(paginate(items, query.as_ref())),
                    Err(error) => emitter.emit_error(error),
                }
            }
            emitter.close();
        });
        Ok(subscription)
    }
}
