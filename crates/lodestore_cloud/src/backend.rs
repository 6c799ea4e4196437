//! The cloud record backend.
//!
//! The remote store is authoritative: `sync()` pushes queued local
//! mutations and then pulls the table into the local cache. Writes that
//! cannot reach the remote land in the pending-change log and flip the
//! status to `Disconnected`; reads always serve the local cache, which
//! is what the fetch-policy layer expects of a backend's "local" side.

use crate::client::{map_remote_error, RecordClient};
use crate::realtime::{RealtimeChannel, RecordEvent, RecordEventKind};
use crate::translator::{to_record_query, RecordQuery};
use async_trait::async_trait;
use lodestore_core::{
    apply_query, Backend, Capabilities, ChangeOperation, ConflictDetails, ConflictKind,
    EntityAdapter, EntityKey, FieldMap, Lifecycle, PendingChange, PendingChangeLog, Query,
    StoreError, StoreResult, Subject, Subscription, SyncStatus, WatcherRegistry,
};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, warn};

struct Shared<T, K> {
    adapter: EntityAdapter<T, K>,
    table: String,
    key_field: String,
    cache: RwLock<Vec<(K, T)>>,
    registry: WatcherRegistry<T, K>,
}

impl<T, K> Shared<T, K>
where
    T: Clone + Send + Sync + 'static,
    K: EntityKey,
{
    fn cached(&self, id: &K) -> Option<T> {
        self.cache
            .read()
            .iter()
            .find(|(k, _)| k == id)
            .map(|(_, item)| item.clone())
    }

    fn upsert_cache(&self, item: T) -> K {
        let id = self.adapter.id_of(&item);
        let mut cache = self.cache.write();
        match cache.iter_mut().find(|(k, _)| *k == id) {
            Some(slot) => slot.1 = item,
            None => cache.push((id.clone(), item)),
        }
        id
    }

    fn remove_cache(&self, id: &K) -> bool {
        let mut cache = self.cache.write();
        let before = cache.len();
        cache.retain(|(k, _)| k != id);
        cache.len() != before
    }

    fn load_all(&self, query: Option<&Query>) -> Vec<T> {
        let items: Vec<T> = self.cache.read().iter().map(|(_, item)| item.clone()).collect();
        match query {
            Some(q) => apply_query(items, q, |item| self.adapter.to_map(item)),
            None => items,
        }
    }

    fn refresh_queries(&self) {
        for (query, subject) in self.registry.query_watchers() {
            subject.emit(self.load_all(query.as_ref()));
        }
    }

    fn apply_event(&self, event: RecordEvent) {
        if event.table != self.table {
            return;
        }
        match event.kind {
            RecordEventKind::Insert | RecordEventKind::Update => {
                match self.adapter.from_map(&event.row) {
                    Ok(item) => {
                        let id = self.upsert_cache(item.clone());
                        self.registry.notify_entity(&id, Some(item));
                        self.refresh_queries();
                    }
                    Err(error) => warn!(%error, "realtime row does not decode"),
                }
            }
            RecordEventKind::Delete => {
                let Some(id) = event.row.get(&self.key_field).and_then(K::from_value) else {
                    warn!("realtime delete event lacks the key column");
                    return;
                };
                self.remove_cache(&id);
                self.registry.notify_entity(&id, None);
                self.refresh_queries();
            }
        }
    }

    /// Replaces the cache with the pulled rows, notifying watchers of
    /// every change in visibility.
    fn replace_cache(&self, items: Vec<T>) {
        let old_keys: Vec<K> = self.cache.read().iter().map(|(k, _)| k.clone()).collect();
        let mut fresh: Vec<(K, T)> = Vec::with_capacity(items.len());
        for item in items {
            fresh.push((self.adapter.id_of(&item), item));
        }

        for old in &old_keys {
            if !fresh.iter().any(|(k, _)| k == old) {
                self.registry.notify_entity(old, None);
            }
        }
        for (id, item) in &fresh {
            self.registry.notify_entity(id, Some(item.clone()));
        }

        *self.cache.write() = fresh;
        self.refresh_queries();
    }
}

/// A backend over a remote record store.
pub struct CloudBackend<T, K> {
    client: Arc<dyn RecordClient>,
    realtime: RwLock<Option<RealtimeChannel>>,
    shared: Arc<Shared<T, K>>,
    lifecycle: Lifecycle,
    pending: PendingChangeLog<T>,
    conflicts: Subject<ConflictDetails<T>>,
    status: RwLock<SyncStatus>,
    status_stream: Subject<SyncStatus>,
}

impl<T, K> CloudBackend<T, K>
where
    T: Clone + Send + Sync + 'static,
    K: EntityKey,
{
    /// Creates a backend over `client` for the given table.
    pub fn new(
        client: Arc<dyn RecordClient>,
        table: impl Into<String>,
        adapter: EntityAdapter<T, K>,
    ) -> Self {
        Self {
            client,
            realtime: RwLock::new(None),
            shared: Arc::new(Shared {
                adapter,
                table: table.into(),
                key_field: "id".to_owned(),
                cache: RwLock::new(Vec::new()),
                registry: WatcherRegistry::new(),
            }),
            lifecycle: Lifecycle::new(),
            pending: PendingChangeLog::new(),
            conflicts: Subject::without_replay(),
            status: RwLock::new(SyncStatus::Synced),
            status_stream: Subject::new(),
        }
    }

    /// Attaches a realtime channel; consumed on `initialize`.
    #[must_use]
    pub fn with_realtime(self, channel: RealtimeChannel) -> Self {
        *self.realtime.write() = Some(channel);
        self
    }

    fn set_status(&self, status: SyncStatus) {
        *self.status.write() = status.clone();
        self.status_stream.emit(status);
    }

    fn key_query(&self, id: &K) -> RecordQuery {
        RecordQuery::by_key(self.shared.key_field.clone(), id.to_value())
    }

    fn item_map(&self, item: &T) -> FieldMap {
        self.shared.adapter.to_map(item)
    }

    async fn push_change(&self, change: &PendingChange<T>) -> StoreResult<()> {
        let shared = &self.shared;
        match change.operation {
            ChangeOperation::Create | ChangeOperation::Update => {
                if change.operation == ChangeOperation::Update {
                    if let Some(original) = &change.original_value {
                        self.detect_concurrent_update(change, original).await;
                    }
                }
                self.client
                    .upsert(&shared.table, vec![self.item_map(&change.item)])
                    .await
                    .map(|_| ())
                    .map_err(map_remote_error)
            }
            ChangeOperation::Delete => {
                let id = shared.adapter.id_of(&change.item);
                self.client
                    .delete(&shared.table, &self.key_query(&id))
                    .await
                    .map(|_| ())
                    .map_err(map_remote_error)
            }
        }
    }

    /// Surfaces a conflict when the remote row no longer matches the
    /// value this update was based on. The local write still wins on an
    /// explicit push; the next pull is authoritative.
    async fn detect_concurrent_update(&self, change: &PendingChange<T>, original: &T) {
        let shared = &self.shared;
        let id = shared.adapter.id_of(&change.item);
        let Ok(rows) = self.client.select(&shared.table, &self.key_query(&id)).await else {
            return;
        };
        let Some(remote_row) = rows.first() else {
            return;
        };

        if *remote_row != shared.adapter.to_map(original) {
            if let Ok(remote) = shared.adapter.from_map(remote_row) {
                debug!(change = %change.id, "concurrent remote update detected");
                self.conflicts.emit(ConflictDetails::new(
                    change.item.clone(),
                    remote,
                    ConflictKind::ConcurrentUpdate,
                ));
            }
        }
    }

    fn queue_offline_write(
        &self,
        item: T,
        operation: ChangeOperation,
        original: Option<T>,
        error: &StoreError,
    ) {
        warn!(%error, "remote write failed, queueing pending change");
        self.pending.record_change(item, operation, original);
        self.set_status(SyncStatus::Disconnected);
    }
}

#[async_trait]
impl<T, K> Backend<T, K> for CloudBackend<T, K>
where
    T: Clone + Send + Sync + 'static,
    K: EntityKey,
{
    fn name(&self) -> &str {
        "cloud"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_offline: true,
            supports_realtime: true,
            ..Capabilities::default()
        }
    }

    async fn initialize(&self) -> StoreResult<()> {
        if self.lifecycle.open()? {
            self.set_status(SyncStatus::Synced);
            if let Some(channel) = self.realtime.read().clone() {
                let mut subscription = channel.subscribe();
                let shared = Arc::clone(&self.shared);
                tokio::spawn(async move {
                    while let Some(event) = subscription.recv().await {
                        if let Ok(event) = event {
                            shared.apply_event(event);
                        }
                    }
                });
            }
        }
        Ok(())
    }

    async fn close(&self) -> StoreResult<()> {
        if self.lifecycle.shut() {
            self.shared.registry.close_all();
            self.pending.dispose();
            self.conflicts.close();
            self.status_stream.close();
        }
        Ok(())
    }

    async fn get(&self, id: &K) -> StoreResult<Option<T>> {
        self.lifecycle.ensure_ready()?;
        Ok(self.shared.cached(id))
    }

    async fn get_all(&self, query: Option<&Query>) -> StoreResult<Vec<T>> {
        self.lifecycle.ensure_ready()?;
        Ok(self.shared.load_all(query))
    }

    async fn save(&self, item: T) -> StoreResult<T> {
        self.lifecycle.ensure_ready()?;
        let shared = &self.shared;
        let id = shared.adapter.id_of(&item);

        match self
            .client
            .upsert(&shared.table, vec![self.item_map(&item)])
            .await
        {
            Ok(_) => {
                shared.upsert_cache(item.clone());
                shared.registry.notify_entity(&id, Some(item.clone()));
                shared.refresh_queries();
                Ok(item)
            }
            Err(remote) => {
                let error = map_remote_error(remote);
                if !error.is_retryable() {
                    return Err(error);
                }
                let original = shared.cached(&id);
                let operation = if original.is_some() {
                    ChangeOperation::Update
                } else {
                    ChangeOperation::Create
                };
                self.queue_offline_write(item.clone(), operation, original, &error);

                shared.upsert_cache(item.clone());
                shared.registry.notify_entity(&id, Some(item.clone()));
                shared.refresh_queries();
                Ok(item)
            }
        }
    }

    async fn delete(&self, id: &K) -> StoreResult<bool> {
        self.lifecycle.ensure_ready()?;
        let shared = &self.shared;

        match self.client.delete(&shared.table, &self.key_query(id)).await {
            Ok(count) => {
                let removed_locally = shared.remove_cache(id);
                if removed_locally || count > 0 {
                    shared.registry.notify_entity(id, None);
                    shared.refresh_queries();
                }
                Ok(count > 0 || removed_locally)
            }
            Err(remote) => {
                let error = map_remote_error(remote);
                if !error.is_retryable() {
                    return Err(error);
                }
                let Some(original) = shared.cached(id) else {
                    return Ok(false);
                };
                self.queue_offline_write(
                    original.clone(),
                    ChangeOperation::Delete,
                    Some(original),
                    &error,
                );

                shared.remove_cache(id);
                shared.registry.notify_entity(id, None);
                shared.refresh_queries();
                Ok(true)
            }
        }
    }

    async fn delete_where(&self, query: &Query) -> StoreResult<usize> {
        self.lifecycle.ensure_ready()?;
        let shared = &self.shared;
        let matching: Vec<(K, T)> = shared
            .cache
            .read()
            .iter()
            .filter(|(_, item)| {
                lodestore_core::matches(&shared.adapter.to_map(item), query)
            })
            .cloned()
            .collect();

        match self
            .client
            .delete(&shared.table, &to_record_query(Some(query)))
            .await
        {
            Ok(count) => {
                for (id, _) in &matching {
                    shared.remove_cache(id);
                }
                shared.refresh_queries();
                Ok(count as usize)
            }
            Err(remote) => {
                let error = map_remote_error(remote);
                if !error.is_retryable() {
                    return Err(error);
                }
                for (id, item) in &matching {
                    self.pending.record_change(
                        item.clone(),
                        ChangeOperation::Delete,
                        Some(item.clone()),
                    );
                    shared.remove_cache(id);
                }
                if !matching.is_empty() {
                    self.set_status(SyncStatus::Disconnected);
                    shared.refresh_queries();
                }
                Ok(matching.len())
            }
        }
    }

    async fn watch(&self, id: &K) -> StoreResult<Subscription<Option<T>>> {
        self.lifecycle.ensure_ready()?;
        let (subject, created) = self.shared.registry.entity_subject(id);
        if created {
            subject.emit(self.shared.cached(id));
        }
        Ok(subject.subscribe())
    }

    async fn watch_all(&self, query: Option<&Query>) -> StoreResult<Subscription<Vec<T>>> {
        self.lifecycle.ensure_ready()?;
        let (subject, created) = self.shared.registry.query_subject(query);
        if created {
            subject.emit(self.shared.load_all(query));
        }
        Ok(subject.subscribe())
    }

    async fn sync(&self) -> StoreResult<()> {
        self.lifecycle.ensure_ready()?;
        self.set_status(SyncStatus::Syncing);

        let changes = self.pending.snapshot();
        if !changes.is_empty() {
            self.set_status(SyncStatus::Uploading);
            for change in changes {
                match self.push_change(&change).await {
                    Ok(()) => {
                        self.pending.remove_change(&change.id);
                    }
                    Err(error) => {
                        let cause = error.to_string();
                        self.pending
                            .update_change(&change.id, |c| c.cause = Some(cause.clone()));
                        self.set_status(SyncStatus::Error(error.to_string()));
                        return Err(error);
                    }
                }
            }
        }

        match self
            .client
            .select(&self.shared.table, &RecordQuery::all())
            .await
        {
            Ok(rows) => {
                let mut items = Vec::with_capacity(rows.len());
                for row in &rows {
                    match self.shared.adapter.from_map(row) {
                        Ok(item) => items.push(item),
                        Err(error) => warn!(%error, "pulled row does not decode"),
                    }
                }
                self.shared.replace_cache(items);
                self.set_status(SyncStatus::Synced);
                debug!(rows = rows.len(), "sync pull complete");
                Ok(())
            }
            Err(remote) => {
                let error = map_remote_error(remote);
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
        let change = self
            .pending
            .get_change(change_id)
            .ok_or_else(|| StoreError::validation(format!("no pending change with id {change_id}")))?;
        self.pending.mark_attempt(change_id);

        match self.push_change(&change).await {
            Ok(()) => {
                self.pending.remove_change(change_id);
                if self.pending.count() == 0 {
                    self.set_status(SyncStatus::Synced);
                }
                Ok(())
            }
            Err(error) => {
                let cause = error.to_string();
                self.pending
                    .update_change(change_id, |c| c.cause = Some(cause.clone()));
                Err(error)
            }
        }
    }

    async fn cancel_change(&self, change_id: &str) -> StoreResult<()> {
        self.lifecycle.ensure_ready()?;
        let change = self
            .pending
            .get_change(change_id)
            .ok_or_else(|| StoreError::validation(format!("no pending change with id {change_id}")))?;

        let shared = &self.shared;
        match (&change.operation, &change.original_value) {
            (ChangeOperation::Update, Some(original))
            | (ChangeOperation::Delete, Some(original)) => {
                let id = shared.upsert_cache(original.clone());
                shared.registry.notify_entity(&id, Some(original.clone()));
            }
            (ChangeOperation::Create, _) => {
                let id = shared.adapter.id_of(&change.item);
                shared.remove_cache(&id);
                shared.registry.notify_entity(&id, None);
            }
            _ => {}
        }

        self.pending.remove_change(change_id);
        shared.refresh_queries();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MemoryRecordClient;
    use serde_json::{json, Value};

    #[derive(Debug, Clone, PartialEq)]
    struct Contact {
        id: String,
        name: String,
        email: String,
    }

    fn contact(id: &str, name: &str, email: &str) -> Contact {
        Contact {
            id: id.into(),
            name: name.into(),
            email: email.into(),
        }
    }

    fn contact_adapter() -> EntityAdapter<Contact, String> {
        EntityAdapter::new(
            |c: &Contact| c.id.clone(),
            |c: &Contact| {
                let mut map = FieldMap::new();
                map.insert("id".into(), json!(c.id));
                map.insert("name".into(), json!(c.name));
                map.insert("email".into(), json!(c.email));
                map
            },
            |map: &FieldMap| {
                Ok(Contact {
                    id: map
                        .get("id")
                        .and_then(Value::as_str)
                        .ok_or_else(|| StoreError::validation("missing id"))?
                        .to_owned(),
                    name: map
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_owned(),
                    email: map
                        .get("email")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_owned(),
                })
            },
        )
    }

    async fn online_backend() -> (CloudBackend<Contact, String>, Arc<MemoryRecordClient>) {
        let client = Arc::new(MemoryRecordClient::new());
        let backend = CloudBackend::new(
            client.clone() as Arc<dyn RecordClient>,
            "contacts",
            contact_adapter(),
        );
        backend.initialize().await.unwrap();
        (backend, client)
    }

    #[tokio::test]
    async fn online_save_reaches_remote() {
        let (backend, client) = online_backend().await;
        backend.save(contact("c1", "Alice", "a@x.io")).await.unwrap();

        assert_eq!(client.rows("contacts").len(), 1);
        assert_eq!(backend.pending_changes_count(), 0);
        assert_eq!(
            backend.get(&"c1".to_owned()).await.unwrap().map(|c| c.name),
            Some("Alice".to_owned())
        );
    }

    #[tokio::test]
    async fn offline_save_queues_and_serves_locally() {
        let (backend, client) = online_backend().await;
        client.set_offline(true);

        backend.save(contact("c1", "Alice", "a@x.io")).await.unwrap();

        // Read-your-writes holds even while the remote is unreachable.
        assert!(backend.get(&"c1".to_owned()).await.unwrap().is_some());
        assert_eq!(backend.pending_changes_count(), 1);
        assert_eq!(backend.sync_status(), SyncStatus::Disconnected);
        assert!(client.rows("contacts").is_empty());
    }

    #[tokio::test]
    async fn sync_drains_pending_and_pulls() {
        let (backend, client) = online_backend().await;
        client.set_offline(true);
        backend.save(contact("c1", "Alice", "a@x.io")).await.unwrap();

        client.set_offline(false);
        // Another device wrote a row we have not seen.
        client.seed("contacts", {
            let mut row = FieldMap::new();
            row.insert("id".into(), json!("c2"));
            row.insert("name".into(), json!("Bob"));
            row.insert("email".into(), json!("b@x.io"));
            row
        });

        backend.sync().await.unwrap();

        assert_eq!(backend.pending_changes_count(), 0);
        assert_eq!(client.rows("contacts").len(), 2);
        assert_eq!(backend.get_all(None).await.unwrap().len(), 2);
        assert_eq!(backend.sync_status(), SyncStatus::Synced);
    }

    #[tokio::test]
    async fn sync_offline_fails_and_keeps_pending() {
        let (backend, client) = online_backend().await;
        client.set_offline(true);
        backend.save(contact("c1", "Alice", "a@x.io")).await.unwrap();

        let result = backend.sync().await;
        assert!(result.is_err());
        assert_eq!(backend.pending_changes_count(), 1);
        assert!(matches!(backend.sync_status(), SyncStatus::Error(_)));

        let change = backend.pending.snapshot().pop().unwrap();
        assert!(change.cause.is_some());
    }

    #[tokio::test]
    async fn cancel_update_restores_original() {
        let (backend, client) = online_backend().await;
        let original = contact("c1", "Alice", "a@x.io");
        backend.save(original.clone()).await.unwrap();

        client.set_offline(true);
        backend.save(contact("c1", "Alice Edited", "a@x.io")).await.unwrap();
        assert_eq!(backend.pending_changes_count(), 1);

        let change_id = backend.pending.snapshot()[0].id.clone();
        backend.cancel_change(&change_id).await.unwrap();

        assert_eq!(
            backend.get(&"c1".to_owned()).await.unwrap(),
            Some(original)
        );
        assert_eq!(backend.pending_changes_count(), 0);
    }

    #[tokio::test]
    async fn cancel_create_removes_item() {
        let (backend, client) = online_backend().await;
        client.set_offline(true);
        backend.save(contact("c1", "Alice", "a@x.io")).await.unwrap();

        let change_id = backend.pending.snapshot()[0].id.clone();
        backend.cancel_change(&change_id).await.unwrap();

        assert_eq!(backend.get(&"c1".to_owned()).await.unwrap(), None);
        assert_eq!(backend.pending_changes_count(), 0);
    }

    #[tokio::test]
    async fn cancel_delete_restores_item() {
        let (backend, client) = online_backend().await;
        let original = contact("c1", "Alice", "a@x.io");
        backend.save(original.clone()).await.unwrap();

        client.set_offline(true);
        assert!(backend.delete(&"c1".to_owned()).await.unwrap());
        assert_eq!(backend.get(&"c1".to_owned()).await.unwrap(), None);

        let change_id = backend.pending.snapshot()[0].id.clone();
        backend.cancel_change(&change_id).await.unwrap();

        assert_eq!(
            backend.get(&"c1".to_owned()).await.unwrap(),
            Some(original)
        );
    }

    #[tokio::test]
    async fn retry_change_bookkeeping() {
        let (backend, client) = online_backend().await;
        client.set_offline(true);
        backend.save(contact("c1", "Alice", "a@x.io")).await.unwrap();
        let change_id = backend.pending.snapshot()[0].id.clone();

        // Still offline: the retry fails and the log keeps the change
        // with updated bookkeeping.
        assert!(backend.retry_change(&change_id).await.is_err());
        let change = backend.pending.get_change(&change_id).unwrap();
        assert_eq!(change.retry_count, 1);
        assert!(change.last_attempt.is_some());
        assert!(change.cause.is_some());

        // Back online: the retry lands and clears the log.
        client.set_offline(false);
        backend.retry_change(&change_id).await.unwrap();
        assert_eq!(backend.pending_changes_count(), 0);
        assert_eq!(client.rows("contacts").len(), 1);
        assert_eq!(backend.sync_status(), SyncStatus::Synced);
    }

    #[tokio::test]
    async fn retry_unknown_change_fails() {
        let (backend, _) = online_backend().await;
        assert!(matches!(
            backend.retry_change("pc-404").await,
            Err(StoreError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn concurrent_update_surfaces_conflict() {
        let (backend, client) = online_backend().await;
        backend.save(contact("c1", "Alice", "a@x.io")).await.unwrap();

        // Go offline and edit locally.
        client.set_offline(true);
        backend
            .save(contact("c1", "Alice Local", "a@x.io"))
            .await
            .unwrap();

        // Meanwhile another device rewrote the remote row.
        client.set_offline(false);
        client
            .upsert("contacts", {
                let mut row = FieldMap::new();
                row.insert("id".into(), json!("c1"));
                row.insert("name".into(), json!("Alice Remote"));
                row.insert("email".into(), json!("a@x.io"));
                vec![row]
            })
            .await
            .unwrap();

        let mut conflicts = backend.conflicts_stream();
        backend.sync().await.unwrap();

        let conflict = conflicts.recv().await.unwrap().unwrap();
        assert_eq!(conflict.kind, ConflictKind::ConcurrentUpdate);
        assert_eq!(conflict.local.name, "Alice Local");
        assert_eq!(conflict.remote.name, "Alice Remote");
    }

    #[tokio::test]
    async fn non_retryable_save_error_propagates() {
        let (backend, client) = online_backend().await;
        client.fail_next_upsert(
            crate::client::RemoteError::status(409, "duplicate key").with_code("23505"),
        );

        let result = backend.save(contact("c1", "Alice", "a@x.io")).await;
        assert!(matches!(result, Err(StoreError::Validation { .. })));
        // Constraint violations are not queued for later.
        assert_eq!(backend.pending_changes_count(), 0);
        assert_eq!(backend.get(&"c1".to_owned()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn realtime_events_update_cache_and_watchers() {
        let client = Arc::new(MemoryRecordClient::new());
        let backend = CloudBackend::new(
            client.clone() as Arc<dyn RecordClient>,
            "contacts",
            contact_adapter(),
        )
        .with_realtime(client.channel());
        backend.initialize().await.unwrap();

        let mut sub = backend.watch(&"c1".to_owned()).await.unwrap();
        assert_eq!(sub.recv().await.unwrap().unwrap(), None);

        // A mutation from elsewhere arrives over the channel.
        client
            .upsert("contacts", {
                let mut row = FieldMap::new();
                row.insert("id".into(), json!("c1"));
                row.insert("name".into(), json!("Pushed"));
                row.insert("email".into(), json!("p@x.io"));
                vec![row]
            })
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(
            sub.recv().await.unwrap().unwrap().map(|c| c.name),
            Some("Pushed".to_owned())
        );
        assert!(backend.get(&"c1".to_owned()).await.unwrap().is_some());

        client
            .delete("contacts", &RecordQuery::by_key("id", json!("c1")))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(sub.recv().await.unwrap().unwrap(), None);
    }

    #[tokio::test]
    async fn pull_removes_remotely_deleted_rows() {
        let (backend, client) = online_backend().await;
        backend.save(contact("c1", "Alice", "a@x.io")).await.unwrap();

        // Another device deletes the row directly on the remote.
        client
            .delete("contacts", &RecordQuery::by_key("id", json!("c1")))
            .await
            .unwrap();

        backend.sync().await.unwrap();
        assert_eq!(backend.get(&"c1".to_owned()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_where_offline_queues_deletes() {
        let (backend, client) = online_backend().await;
        backend.save(contact("c1", "Alice", "a@x.io")).await.unwrap();
        backend.save(contact("c2", "Bob", "b@x.io")).await.unwrap();

        client.set_offline(true);
        let q = Query::new().filter(
            "name",
            lodestore_core::FilterOp::Equals,
            json!("Alice"),
        );
        assert_eq!(backend.delete_where(&q).await.unwrap(), 1);
        assert_eq!(backend.pending_changes_count(), 1);
        assert_eq!(backend.get_all(None).await.unwrap().len(), 1);
    }
}
