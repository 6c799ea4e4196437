//! The public store facade.
//!
//! Wires a backend, the fetch-policy handler, and optional field-level
//! encryption behind one typed surface. All application code talks to
//! [`Store`]; the backend choice is a construction-time detail.

use crate::backend::DynBackend;
use crate::crypto::{EncryptionConfig, FieldEncryptor};
use crate::encrypted::EncryptedBackend;
use crate::entity::{EntityAdapter, EntityKey};
use crate::error::StoreResult;
use crate::pending::PendingChange;
use crate::policy::{CacheStats, FetchPolicy, FetchPolicyHandler};
use crate::query::{PagedResult, Query};
use crate::types::{Capabilities, ConflictDetails, SyncStatus};
use crate::watch::Subscription;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Store-level configuration.
#[derive(Debug, Clone, Default)]
pub struct StoreConfig {
    /// Encryption mode.
    pub encryption: EncryptionConfig,
    /// Default fetch policy for reads.
    pub fetch_policy: FetchPolicy,
    /// Entries older than this are considered stale. `None` disables
    /// time-based staleness.
    pub stale_duration: Option<Duration>,
    /// When false, paged reads return everything as a single page.
    pub pagination_enabled: bool,
}

impl StoreConfig {
    /// Creates a configuration with defaults: no encryption, cacheFirst,
    /// no stale window, pagination enabled.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pagination_enabled: true,
            ..Self::default()
        }
    }

    /// Sets the encryption mode.
    #[must_use]
    pub fn encryption(mut self, encryption: EncryptionConfig) -> Self {
        self.encryption = encryption;
        self
    }

    /// Sets the default fetch policy.
    #[must_use]
    pub fn fetch_policy(mut self, policy: FetchPolicy) -> Self {
        self.fetch_policy = policy;
        self
    }

    /// Sets the staleness window.
    #[must_use]
    pub fn stale_duration(mut self, duration: Duration) -> Self {
        self.stale_duration = Some(duration);
        self
    }

    /// Enables or disables cursor pagination.
    #[must_use]
    pub fn pagination_enabled(mut self, enabled: bool) -> Self {
        self.pagination_enabled = enabled;
        self
    }
}

/// The typed data-access facade.
pub struct Store<T, K: EntityKey> {
    handler: FetchPolicyHandler<T, K>,
    adapter: EntityAdapter<T, K>,
    pagination_enabled: bool,
}

impl<T, K> Store<T, K>
where
    T: Clone + Send + Sync + 'static,
    K: EntityKey,
{
    /// Builds a store over `backend`.
    ///
    /// With field-level encryption configured, the backend is wrapped in
    /// an [`EncryptedBackend`] first. Database-level encryption is
    /// opaque to the core; the provider is consumed by the backend at
    /// its own construction time.
    pub fn new(
        backend: DynBackend<T, K>,
        adapter: EntityAdapter<T, K>,
        config: StoreConfig,
    ) -> StoreResult<Self> {
        let backend = match &config.encryption {
            EncryptionConfig::FieldLevel(field_config) => {
                let encryptor = FieldEncryptor::new(field_config.clone())?;
                Arc::new(EncryptedBackend::new(backend, adapter.clone(), encryptor))
                    as DynBackend<T, K>
            }
            _ => backend,
        };

        let handler = FetchPolicyHandler::new(
            backend,
            adapter.clone(),
            config.fetch_policy,
            config.stale_duration,
        );

        Ok(Self {
            handler,
            adapter,
            pagination_enabled: config.pagination_enabled,
        })
    }

    /// The backend's stable identifier.
    pub fn backend_name(&self) -> &str {
        self.handler.backend().name()
    }

    /// The backend's capability flags.
    pub fn capabilities(&self) -> Capabilities {
        self.handler.backend().capabilities()
    }

    /// Initializes the backend. Idempotent.
    pub async fn initialize(&self) -> StoreResult<()> {
        self.handler.backend().initialize().await
    }

    /// Closes the backend and releases subjects. Idempotent.
    pub async fn close(&self) -> StoreResult<()> {
        self.handler.backend().close().await
    }

    /// Reads one entity under the default policy.
    pub async fn get(&self, id: &K) -> StoreResult<Option<T>> {
        self.handler.get(id, None).await
    }

    /// Reads one entity under an explicit policy.
    pub async fn get_with_policy(
        &self,
        id: &K,
        policy: FetchPolicy,
    ) -> StoreResult<Option<T>> {
        self.handler.get(id, Some(policy)).await
    }

    /// Reads matching entities under the default policy.
    pub async fn get_all(&self, query: Option<&Query>) -> StoreResult<Vec<T>> {
        self.handler.get_all(query, None).await
    }

    /// Reads matching entities under an explicit policy.
    pub async fn get_all_with_policy(
        &self,
        query: Option<&Query>,
        policy: FetchPolicy,
    ) -> StoreResult<Vec<T>> {
        self.handler.get_all(query, Some(policy)).await
    }

    /// Upserts an entity and marks its cache entry fresh.
    pub async fn save(&self, item: T) -> StoreResult<T> {
        let saved = self.handler.backend().save(item).await?;
        let id = self.adapter.id_of(&saved);
        self.handler.record_cached_item(&id, None);
        Ok(saved)
    }

    /// Batch upsert.
    pub async fn save_all(&self, items: Vec<T>) -> StoreResult<Vec<T>> {
        let saved = self.handler.backend().save_all(items).await?;
        for item in &saved {
            let id = self.adapter.id_of(item);
            self.handler.record_cached_item(&id, None);
        }
        Ok(saved)
    }

    /// Deletes an entity and forgets its cache entry.
    pub async fn delete(&self, id: &K) -> StoreResult<bool> {
        let removed = self.handler.backend().delete(id).await?;
        if removed {
            self.handler.remove_entry(id);
        }
        Ok(removed)
    }

    /// Deletes the listed ids.
    pub async fn delete_all(&self, ids: &[K]) -> StoreResult<usize> {
        let deleted = self.handler.backend().delete_all(ids).await?;
        for id in ids {
            self.handler.remove_entry(id);
        }
        Ok(deleted)
    }

    /// Deletes matching entities.
    pub async fn delete_where(&self, query: &Query) -> StoreResult<usize> {
        self.handler.backend().delete_where(query).await
    }

    /// Watches one id.
    pub async fn watch(&self, id: &K) -> StoreResult<Subscription<Option<T>>> {
        self.handler.backend().watch(id).await
    }

    /// Watches a query.
    pub async fn watch_all(&self, query: Option<&Query>) -> StoreResult<Subscription<Vec<T>>> {
        self.handler.backend().watch_all(query).await
    }

    /// Cursor-paged read. With pagination disabled, returns a single
    /// page containing every matching item.
    pub async fn get_all_paged(&self, query: Option<&Query>) -> StoreResult<PagedResult<T>> {
        if self.pagination_enabled {
            self.handler.backend().get_all_paged(query).await
        } else {
            let items = self.handler.backend().get_all(query).await?;
            Ok(PagedResult::single_page(items))
        }
    }

    /// Cursor-paged watch.
    pub async fn watch_all_paged(
        &self,
        query: Option<&Query>,
    ) -> StoreResult<Subscription<PagedResult<T>>> {
        self.handler.backend().watch_all_paged(query).await
    }

    /// Triggers a sync round.
    pub async fn sync(&self) -> StoreResult<()> {
        self.handler.backend().sync().await
    }

    /// Current sync status.
    pub fn sync_status(&self) -> SyncStatus {
        self.handler.backend().sync_status()
    }

    /// Sync status change stream.
    pub fn sync_status_stream(&self) -> Subscription<SyncStatus> {
        self.handler.backend().sync_status_stream()
    }

    /// Number of unsynced local mutations.
    pub fn pending_changes_count(&self) -> usize {
        self.handler.backend().pending_changes_count()
    }

    /// Pending-change list snapshots.
    pub fn pending_changes_stream(&self) -> Subscription<Vec<PendingChange<T>>> {
        self.handler.backend().pending_changes_stream()
    }

    /// Conflict events.
    pub fn conflicts_stream(&self) -> Subscription<ConflictDetails<T>> {
        self.handler.backend().conflicts_stream()
    }

    /// Retries a pending change.
    pub async fn retry_change(&self, change_id: &str) -> StoreResult<()> {
        self.handler.backend().retry_change(change_id).await
    }

    /// Cancels a pending change with inverse compensation.
    pub async fn cancel_change(&self, change_id: &str) -> StoreResult<()> {
        self.handler.backend().cancel_change(change_id).await
    }

    /// Replaces the default fetch policy.
    pub fn set_policy(&self, policy: FetchPolicy) {
        self.handler.set_policy(policy);
    }

    /// Current default fetch policy.
    pub fn policy(&self) -> FetchPolicy {
        self.handler.policy()
    }

    /// Whether the entry is currently considered stale.
    pub fn is_stale(&self, id: &K) -> bool {
        self.handler.is_stale(id)
    }

    /// Records a fresh cache entry, optionally overwriting its tags.
    pub fn record_cached_item(&self, id: &K, tags: Option<HashSet<String>>) {
        self.handler.record_cached_item(id, tags);
    }

    /// Adds tags to a cache entry.
    pub fn add_tags(&self, id: &K, tags: impl IntoIterator<Item = String>) {
        self.handler.add_tags(id, tags);
    }

    /// Removes tags from a cache entry.
    pub fn remove_tags(&self, id: &K, tags: &HashSet<String>) {
        self.handler.remove_tags(id, tags);
    }

    /// Tags on a cache entry.
    pub fn get_tags(&self, id: &K) -> HashSet<String> {
        self.handler.get_tags(id)
    }

    /// Marks one entry stale.
    pub fn invalidate(&self, id: &K) {
        self.handler.invalidate(id);
    }

    /// Marks every known entry stale.
    pub fn invalidate_all(&self) {
        self.handler.invalidate_all();
    }

    /// Marks the listed entries stale.
    pub fn invalidate_by_ids(&self, ids: impl IntoIterator<Item = K>) {
        self.handler.invalidate_by_ids(ids);
    }

    /// Marks stale every entry carrying any of the tags.
    pub fn invalidate_by_tags(&self, tags: &HashSet<String>) {
        self.handler.invalidate_by_tags(tags);
    }

    /// Marks stale every entry whose entity matches the query.
    pub async fn invalidate_where(&self, query: &Query) -> StoreResult<usize> {
        let adapter = self.adapter.clone();
        self.handler
            .invalidate_where(query, move |item| adapter.to_map(item))
            .await
    }

    /// Cache statistics.
    pub fn get_cache_stats(&self) -> CacheStats {
        self.handler.get_cache_stats()
    }
}
