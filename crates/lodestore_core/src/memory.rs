//! In-memory backend for testing and ephemeral stores.
//!
//! Rows live in an insertion-ordered list guarded by a lock; queries are
//! evaluated in memory. Sync is a no-op unless a sync handler is
//! installed. The handler models one remote round and returns rows to
//! upsert, which is how tests drive every fetch policy and failure path
//! without a real network.

use crate::backend::{Backend, Lifecycle};
use crate::entity::{EntityAdapter, EntityKey};
use crate::error::{StoreError, StoreResult};
use crate::pending::{PendingChange, PendingChangeLog};
use crate::query::{apply_query, Query};
use crate::types::{Capabilities, ChangeOperation, ConflictDetails, SyncStatus};
use crate::watch::{Subject, Subscription, WatcherRegistry};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Models one remote round for [`MemoryBackend::set_sync_handler`]:
/// returns the rows the "remote" hands back, which the backend upserts.
pub type SyncHandler<T> = Arc<dyn Fn() -> StoreResult<Vec<T>> + Send + Sync>;

/// An in-memory backend over any entity type.
pub struct MemoryBackend<T, K> {
    adapter: EntityAdapter<T, K>,
    rows: RwLock<Vec<(K, T)>>,
    registry: WatcherRegistry<T, K>,
    lifecycle: Lifecycle,
    pending: PendingChangeLog<T>,
    conflicts: Subject<ConflictDetails<T>>,
    status: RwLock<SyncStatus>,
    status_stream: Subject<SyncStatus>,
    sync_handler: RwLock<Option<SyncHandler<T>>>,
    sync_calls: AtomicU64,
}

impl<T, K> MemoryBackend<T, K>
where
    T: Clone + Send + Sync + 'static,
    K: EntityKey,
{
    /// Creates an empty backend.
    #[must_use]
    pub fn new(adapter: EntityAdapter<T, K>) -> Self {
        Self {
            adapter,
            rows: RwLock::new(Vec::new()),
            registry: WatcherRegistry::new(),
            lifecycle: Lifecycle::new(),
            pending: PendingChangeLog::new(),
            conflicts: Subject::without_replay(),
            status: RwLock::new(SyncStatus::Synced),
            status_stream: Subject::new(),
            sync_handler: RwLock::new(None),
            sync_calls: AtomicU64::new(0),
        }
    }

    /// Installs a handler invoked by every `sync()` call.
    pub fn set_sync_handler(&self, handler: impl Fn() -> StoreResult<Vec<T>> + Send + Sync + 'static) {
        *self.sync_handler.write() = Some(Arc::new(handler));
    }

    /// Number of `sync()` calls so far.
    pub fn sync_call_count(&self) -> u64 {
        self.sync_calls.load(Ordering::Relaxed)
    }

    fn set_status(&self, status: SyncStatus) {
        *self.status.write() = status.clone();
        self.status_stream.emit(status);
    }

    fn load_all(&self, query: Option<&Query>) -> Vec<T> {
        let items: Vec<T> = self.rows.read().iter().map(|(_, item)| item.clone()).collect();
        match query {
            Some(q) => apply_query(items, q, |item| self.adapter.to_map(item)),
            None => items,
        }
    }

    fn upsert_row(&self, item: T) -> K {
        let id = self.adapter.id_of(&item);
        let mut rows = self.rows.write();
        match rows.iter_mut().find(|(k, _)| *k == id) {
            Some(slot) => slot.1 = item,
            None => rows.push((id.clone(), item)),
        }
        id
    }

    fn refresh_query_watchers(&self) {
        for (query, subject) in self.registry.query_watchers() {
            subject.emit(self.load_all(query.as_ref()));
        }
    }
}

#[async_trait]
impl<T, K> Backend<T, K> for MemoryBackend<T, K>
where
    T: Clone + Send + Sync + 'static,
    K: EntityKey,
{
    fn name(&self) -> &str {
        "memory"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    async fn initialize(&self) -> StoreResult<()> {
        if self.lifecycle.open()? {
            self.set_status(SyncStatus::Synced);
        }
        Ok(())
    }

    async fn close(&self) -> StoreResult<()> {
        if self.lifecycle.shut() {
            self.registry.close_all();
            self.pending.dispose();
            self.conflicts.close();
            self.status_stream.close();
        }
        Ok(())
    }

    async fn get(&self, id: &K) -> StoreResult<Option<T>> {
        self.lifecycle.ensure_ready()?;
        Ok(self
            .rows
            .read()
            .iter()
            .find(|(k, _)| k == id)
            .map(|(_, item)| item.clone()))
    }

    async fn get_all(&self, query: Option<&Query>) -> StoreResult<Vec<T>> {
        self.lifecycle.ensure_ready()?;
        Ok(self.load_all(query))
    }

    async fn save(&self, item: T) -> StoreResult<T> {
        self.lifecycle.ensure_ready()?;
        let id = self.upsert_row(item.clone());
        self.registry.notify_entity(&id, Some(item.clone()));
        self.refresh_query_watchers();
        Ok(item)
    }

    async fn delete(&self, id: &K) -> StoreResult<bool> {
        self.lifecycle.ensure_ready()?;
        let removed = {
            let mut rows = self.rows.write();
            let before = rows.len();
            rows.retain(|(k, _)| k != id);
            rows.len() != before
        };
        if removed {
            self.registry.notify_entity(id, None);
            self.refresh_query_watchers();
        }
        Ok(removed)
    }

    async fn delete_where(&self, query: &Query) -> StoreResult<usize> {
        self.lifecycle.ensure_ready()?;
        let matching: Vec<K> = {
            let rows = self.rows.read();
            rows.iter()
                .filter(|(_, item)| crate::query::matches(&self.adapter.to_map(item), query))
                .map(|(k, _)| k.clone())
                .collect()
        };
        if !matching.is_empty() {
            self.rows.write().retain(|(k, _)| !matching.contains(k));
            // Per-id subjects are not invalidated proactively here.
            self.refresh_query_watchers();
        }
        Ok(matching.len())
    }

    async fn watch(&self, id: &K) -> StoreResult<Subscription<Option<T>>> {
        self.lifecycle.ensure_ready()?;
        let (subject, created) = self.registry.entity_subject(id);
        if created {
            let current = self
                .rows
                .read()
                .iter()
                .find(|(k, _)| k == id)
                .map(|(_, item)| item.clone());
            subject.emit(current);
        }
        Ok(subject.subscribe())
    }

    async fn watch_all(&self, query: Option<&Query>) -> StoreResult<Subscription<Vec<T>>> {
        self.lifecycle.ensure_ready()?;
        let (subject, created) = self.registry.query_subject(query);
        if created {
            subject.emit(self.load_all(query));
        }
        Ok(subject.subscribe())
    }

    async fn sync(&self) -> StoreResult<()> {
        self.lifecycle.ensure_ready()?;
        self.sync_calls.fetch_add(1, Ordering::Relaxed);

        let handler = self.sync_handler.read().clone();
        let Some(handler) = handler else {
            return Ok(());
        };

        self.set_status(SyncStatus::Syncing);
        match handler() {
            Ok(items) => {
                for item in items {
                    let id = self.upsert_row(item.clone());
                    self.registry.notify_entity(&id, Some(item));
                }
                self.refresh_query_watchers();
                self.set_status(SyncStatus::Synced);
                Ok(())
            }
            Err(error) => {
                self.set_status(SyncStatus::Error(error.to_string()));
                Err(error)
            }
        }
    }

    fn sync_status(&self) -> SyncStatus {
        self.status.read().clone()
    }

    fn sync_status_stream(&self) -> Subscription<SyncStatus> {
        self.status_stream.subscribe()
    }

    fn pending_changes_count(&self) -> usize {
        self.pending.count()
    }

    fn pending_changes_stream(&self) -> Subscription<Vec<PendingChange<T>>> {
        self.pending.stream()
    }

    fn conflicts_stream(&self) -> Subscription<ConflictDetails<T>> {
        self.conflicts.subscribe()
    }

    async fn retry_change(&self, change_id: &str) -> StoreResult<()> {
        self.lifecycle.ensure_ready()?;
        Err(StoreError::validation(format!(
            "no pending change with id {change_id}"
        )))
    }

    async fn cancel_change(&self, change_id: &str) -> StoreResult<()> {
        self.lifecycle.ensure_ready()?;
        Err(StoreError::validation(format!(
            "no pending change with id {change_id}"
        )))
    }
}

impl<T, K> MemoryBackend<T, K>
where
    T: Clone + Send + Sync + 'static,
    K: EntityKey,
{
    /// Records a pending change directly. Test hook for exercising the
    /// pending-change surfaces of the contract.
    pub fn record_pending(
        &self,
        item: T,
        operation: ChangeOperation,
        original_value: Option<T>,
    ) -> String {
        self.pending.record_change(item, operation, original_value)
    }
}
