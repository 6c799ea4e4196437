//! The CRDT backend: the uniform contract over the replicated store.

use crate::changeset::Changeset;
use crate::hlc::Hlc;
use crate::store::CrdtStore;
use async_trait::async_trait;
use lodestore_core::{
    apply_query, matches, Backend, Capabilities, ConflictDetails, ConflictKind, EntityAdapter,
    EntityKey, Lifecycle, PendingChange, PendingChangeLog, Query, StoreError, StoreResult,
    Subject, Subscription, SyncStatus, WatcherRegistry,
};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// A replicated local backend.
///
/// Writes stamp rows with a hybrid logical clock and this node's id;
/// deletes tombstone rows instead of removing them; reads filter
/// tombstones. Peers exchange [`Changeset`] bytes through
/// [`CrdtBackend::get_changeset`] / [`CrdtBackend::apply_changeset`];
/// merge is monotonic, so replaying a changeset is a no-op.
pub struct CrdtBackend<T, K> {
    store: Arc<CrdtStore<K>>,
    adapter: EntityAdapter<T, K>,
    registry: WatcherRegistry<T, K>,
    lifecycle: Lifecycle,
    pending: PendingChangeLog<T>,
    conflicts: Subject<ConflictDetails<T>>,
    status_stream: Subject<SyncStatus>,
}

impl<T, K> CrdtBackend<T, K>
where
    T: Clone + Send + Sync + 'static,
    K: EntityKey,
{
    /// Creates a backend with a fresh random node id.
    #[must_use]
    pub fn new(adapter: EntityAdapter<T, K>) -> Self {
        Self::with_node(adapter, Uuid::new_v4())
    }

    /// Creates a backend for a specific node id.
    #[must_use]
    pub fn with_node(adapter: EntityAdapter<T, K>, node: Uuid) -> Self {
        Self {
            store: Arc::new(CrdtStore::new(node)),
            adapter,
            registry: WatcherRegistry::new(),
            lifecycle: Lifecycle::new(),
            pending: PendingChangeLog::new(),
            conflicts: Subject::without_replay(),
            status_stream: Subject::new(),
        }
    }

    /// This replica's node id.
    pub fn node_id(&self) -> Uuid {
        self.store.node_id()
    }

    /// The highest stamp this replica holds; a peer cursor.
    pub fn latest_hlc(&self) -> Hlc {
        self.store.latest_hlc()
    }

    /// Packages rows stamped after `since` for a peer.
    pub fn get_changeset(&self, since: Option<Hlc>) -> StoreResult<Vec<u8>> {
        self.lifecycle.ensure_ready()?;
        self.store.changeset_since(since).encode()
    }

    /// Merges a peer changeset; returns the number of rows applied.
    ///
    /// Revivals of locally observed tombstones surface on the conflicts
    /// stream.
    pub fn apply_changeset(&self, bytes: &[u8]) -> StoreResult<usize> {
        self.lifecycle.ensure_ready()?;
        let changeset = Changeset::decode(bytes)?;
        let applied = self.store.apply(&changeset);
        let count = applied.len();

        for change in &applied {
            let value = match &change.value {
                Some(fields) => match self.adapter.from_map(fields) {
                    Ok(item) => Some(item),
                    Err(error) => {
                        warn!(%error, "merged row does not decode; watchers not notified");
                        continue;
                    }
                },
                None => None,
            };

            if change.revived_tombstone {
                if let (Some(remote), Some(previous)) = (&value, &change.previous) {
                    if let Ok(local) = self.adapter.from_map(previous) {
                        self.conflicts.emit(ConflictDetails::new(
                            local,
                            remote.clone(),
                            ConflictKind::TombstoneRevival,
                        ));
                    }
                }
            }

            self.registry.notify_entity(&change.key, value);
        }

        if count > 0 {
            self.refresh_query_watchers();
        }
        debug!(applied = count, "changeset merged");
        Ok(count)
    }

    fn load_all(&self, query: Option<&Query>) -> StoreResult<Vec<T>> {
        let items: Vec<T> = self
            .store
            .live_rows()
            .into_iter()
            .map(|(_, fields)| self.adapter.from_map(&fields))
            .collect::<StoreResult<_>>()?;
        Ok(match query {
            Some(q) => apply_query(items, q, |item| self.adapter.to_map(item)),
            None => items,
        })
    }

    fn refresh_query_watchers(&self) {
        for (query, subject) in self.registry.query_watchers() {
            match self.load_all(query.as_ref()) {
                Ok(items) => subject.emit(items),
                Err(error) => subject.emit_error(error),
            }
        }
    }
}

#[async_trait]
impl<T, K> Backend<T, K> for CrdtBackend<T, K>
where
    T: Clone + Send + Sync + 'static,
    K: EntityKey,
{
    fn name(&self) -> &str {
        "crdt"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_offline: true,
            ..Capabilities::default()
        }
    }

    async fn initialize(&self) -> StoreResult<()> {
        if self.lifecycle.open()? {
            self.status_stream.emit(SyncStatus::Synced);
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
        self.store
            .get(id)
            .map(|fields| self.adapter.from_map(&fields))
            .transpose()
    }

    async fn get_all(&self, query: Option<&Query>) -> StoreResult<Vec<T>> {
        self.lifecycle.ensure_ready()?;
        self.load_all(query)
    }

    async fn save(&self, item: T) -> StoreResult<T> {
        self.lifecycle.ensure_ready()?;
        let id = self.adapter.id_of(&item);
        self.store.put(id.clone(), self.adapter.to_map(&item));
        self.registry.notify_entity(&id, Some(item.clone()));
        self.refresh_query_watchers();
        Ok(item)
    }

    async fn delete(&self, id: &K) -> StoreResult<bool> {
        self.lifecycle.ensure_ready()?;
        let removed = self.store.tombstone(id);
        if removed {
            self.registry.notify_entity(id, None);
            self.refresh_query_watchers();
        }
        Ok(removed)
    }

    async fn delete_where(&self, query: &Query) -> StoreResult<usize> {
        self.lifecycle.ensure_ready()?;
        let matching: Vec<K> = self
            .store
            .live_rows()
            .into_iter()
            .filter(|(_, fields)| matches(fields, query))
            .map(|(key, _)| key)
            .collect();

        for key in &matching {
            self.store.tombstone(key);
        }
        if !matching.is_empty() {
            self.refresh_query_watchers();
        }
        Ok(matching.len())
    }

    async fn watch(&self, id: &K) -> StoreResult<Subscription<Option<T>>> {
        self.lifecycle.ensure_ready()?;
        let (subject, created) = self.registry.entity_subject(id);
        if created {
            match self
                .store
                .get(id)
                .map(|fields| self.adapter.from_map(&fields))
                .transpose()
            {
                Ok(current) => subject.emit(current),
                Err(error) => subject.emit_error(error),
            }
        }
        Ok(subject.subscribe())
    }

    async fn watch_all(&self, query: Option<&Query>) -> StoreResult<Subscription<Vec<T>>> {
        self.lifecycle.ensure_ready()?;
        let (subject, created) = self.registry.query_subject(query);
        if created {
            match self.load_all(query) {
                Ok(items) => subject.emit(items),
                Err(error) => subject.emit_error(error),
            }
        }
        Ok(subject.subscribe())
    }

    async fn sync(&self) -> StoreResult<()> {
        // Replication happens through explicit changeset exchange.
        self.lifecycle.ensure_ready()?;
        Ok(())
    }

    fn sync_status(&self) -> SyncStatus {
        SyncStatus::Synced
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
