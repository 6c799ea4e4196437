//! A backend wrapper that applies field-level encryption.
//!
//! Delegates every operation to an inner backend, encrypting configured
//! fields of the serialized form before writes and decrypting them after
//! reads and watch emissions. The inner backend only ever sees
//! ciphertext in those fields.

use crate::backend::{Backend, DynBackend};
use crate::crypto::FieldEncryptor;
use crate::entity::{EntityAdapter, EntityKey};
use crate::error::{StoreError, StoreResult};
use crate::pending::PendingChange;
use crate::query::{PagedResult, Query};
use crate::types::{Capabilities, ConflictDetails, SyncStatus};
use crate::watch::{Subject, Subscription};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Wraps any backend with field-level encryption.
pub struct EncryptedBackend<T, K> {
    inner: DynBackend<T, K>,
    adapter: EntityAdapter<T, K>,
    encryptor: Arc<FieldEncryptor>,
    cleared: AtomicBool,
}

impl<T, K> EncryptedBackend<T, K>
where
    T: Clone + Send + Sync + 'static,
    K: EntityKey,
{
    /// Wraps `inner`, encrypting through `encryptor`.
    pub fn new(
        inner: DynBackend<T, K>,
        adapter: EntityAdapter<T, K>,
        encryptor: FieldEncryptor,
    ) -> Self {
        Self {
            inner,
            adapter,
            encryptor: Arc::new(encryptor),
            cleared: AtomicBool::new(false),
        }
    }

    /// Clears the cipher cache after the underlying key provider has
    /// rotated; the next operation derives the new key.
    pub fn rotate_key(&self) {
        self.encryptor.clear_cache();
    }

    fn ensure_usable(&self) -> StoreResult<()> {
        if self.cleared.load(Ordering::Acquire) {
            Err(StoreError::closed())
        } else {
            Ok(())
        }
    }

    fn encrypt_item(&self, item: &T) -> StoreResult<T> {
        let map = self.adapter.to_map(item);
        let encrypted = self.encryptor.encrypt_fields(&map)?;
        self.adapter.from_map(&encrypted)
    }

    fn decrypt_item(&self, item: &T) -> StoreResult<T> {
        let map = self.adapter.to_map(item);
        let decrypted = self.encryptor.decrypt_fields(&map)?;
        self.adapter.from_map(&decrypted)
    }

    fn decrypt_items(&self, items: Vec<T>) -> StoreResult<Vec<T>> {
        items.iter().map(|item| self.decrypt_item(item)).collect()
    }
}

#[async_trait]
impl<T, K> Backend<T, K> for EncryptedBackend<T, K>
where
    T: Clone + Send + Sync + 'static,
    K: EntityKey,
{
    fn name(&self) -> &str {
        "encrypted"
    }

    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }

    async fn initialize(&self) -> StoreResult<()> {
        self.inner.initialize().await
    }

    async fn close(&self) -> StoreResult<()> {
        self.inner.close().await?;
        self.encryptor.clear_cache();
        self.cleared.store(true, Ordering::Release);
        Ok(())
    }

    async fn get(&self, id: &K) -> StoreResult<Option<T>> {
        self.ensure_usable()?;
        match self.inner.get(id).await? {
            Some(item) => Ok(Some(self.decrypt_item(&item)?)),
            None => Ok(None),
        }
    }

    async fn get_all(&self, query: Option<&Query>) -> StoreResult<Vec<T>> {
        self.ensure_usable()?;
        let items = self.inner.get_all(query).await?;
        self.decrypt_items(items)
    }

    async fn save(&self, item: T) -> StoreResult<T> {
        self.ensure_usable()?;
        let encrypted = self.encrypt_item(&item)?;
        let saved = self.inner.save(encrypted).await?;
        self.decrypt_item(&saved)
    }

    async fn save_all(&self, items: Vec<T>) -> StoreResult<Vec<T>> {
        self.ensure_usable()?;
        let encrypted: Vec<T> = items
            .iter()
            .map(|item| self.encrypt_item(item))
            .collect::<StoreResult<_>>()?;
        let saved = self.inner.save_all(encrypted).await?;
        self.decrypt_items(saved)
    }

    async fn delete(&self, id: &K) -> StoreResult<bool> {
        self.ensure_usable()?;
        self.inner.delete(id).await
    }

    async fn delete_all(&self, ids: &[K]) -> StoreResult<usize> {
        self.ensure_usable()?;
        self.inner.delete_all(ids).await
    }

    async fn delete_where(&self, query: &Query) -> StoreResult<usize> {
        self.ensure_usable()?;
        self.inner.delete_where(query).await
    }

    async fn watch(&self, id: &K) -> StoreResult<Subscription<Option<T>>> {
        self.ensure_usable()?;
        let mut inner = self.inner.watch(id).await?;
        let subject: Subject<Option<T>> = Subject::new();
        let emitter = subject.clone();
        let subscription = subject.subscribe();

        let adapter = self.adapter.clone();
        let encryptor = Arc::clone(&self.encryptor);
        tokio::spawn(async move {
            while let Some(event) = inner.recv().await {
                match event {
                    Ok(Some(item)) => {
                        match decrypt_with(&adapter, &encryptor, &item) {
                            Ok(decrypted) => emitter.emit(Some(decrypted)),
                            Err(error) => emitter.emit_error(error),
                        }
                    }
                    Ok(None) => emitter.emit(None),
                    Err(error) => emitter.emit_error(error),
                }
            }
            emitter.close();
        });
        Ok(subscription)
    }

    async fn watch_all(&self, query: Option<&Query>) -> StoreResult<Subscription<Vec<T>>> {
        self.ensure_usable()?;
        let mut inner = self.inner.watch_all(query).await?;
        let subject: Subject<Vec<T>> = Subject::new();
        let emitter = subject.clone();
        let subscription = subject.subscribe();

        let adapter = self.adapter.clone();
        let encryptor = Arc::clone(&self.encryptor);
        tokio::spawn(async move {
            while let Some(event) = inner.recv().await {
                match event {
                    Ok(items) => {
                        let decrypted: StoreResult<Vec<T>> = items
                            .iter()
                            .map(|item| decrypt_with(&adapter, &encryptor, item))
                            .collect();
                        match decrypted {
                            Ok(items) => emitter.emit(items),
                            Err(error) => emitter.emit_error(error),
                        }
                    }
                    Err(error) => emitter.emit_error(error),
                }
            }
            emitter.close();
        });
        Ok(subscription)
    }

    async fn sync(&self) -> StoreResult<()> {
        self.ensure_usable()?;
        self.inner.sync().await
    }

    fn sync_status(&self) -> SyncStatus {
        self.inner.sync_status()
    }

    fn sync_status_stream(&self) -> Subscription<SyncStatus> {
        self.inner.sync_status_stream()
    }

    fn pending_changes_count(&self) -> usize {
        self.inner.pending_changes_count()
    }

    fn pending_changes_stream(&self) -> Subscription<Vec<PendingChange<T>>> {
        let mut inner = self.inner.pending_changes_stream();
        let subject: Subject<Vec<PendingChange<T>>> = Subject::new();
        let emitter = subject.clone();
        let subscription = subject.subscribe();

        let adapter = self.adapter.clone();
        let encryptor = Arc::clone(&self.encryptor);
        tokio::spawn(async move {
            while let Some(event) = inner.recv().await {
                match event {
                    Ok(changes) => {
                        let decrypted: StoreResult<Vec<PendingChange<T>>> = changes
                            .into_iter()
                            .map(|change| decrypt_change_with(&adapter, &encryptor, change))
                            .collect();
                        match decrypted {
                            Ok(changes) => emitter.emit(changes),
                            Err(error) => emitter.emit_error(error),
                        }
                    }
                    Err(error) => emitter.emit_error(error),
                }
            }
            emitter.close();
        });
        subscription
    }

    fn conflicts_stream(&self) -> Subscription<ConflictDetails<T>> {
        self.inner.conflicts_stream()
    }

    async fn retry_change(&self, change_id: &str) -> StoreResult<()> {
        self.ensure_usable()?;
        self.inner.retry_change(change_id).await
    }

    async fn cancel_change(&self, change_id: &str) -> StoreResult<()> {
        self.ensure_usable()?;
        self.inner.cancel_change(change_id).await
    }

    async fn get_all_paged(&self, query: Option<&Query>) -> StoreResult<PagedResult<T>> {
        self.ensure_usable()?;
        let page = self.inner.get_all_paged(query).await?;
        Ok(PagedResult {
            items: self.decrypt_items(page.items)?,
            page_info: page.page_info,
        })
    }
}

fn decrypt_with<T, K>(
    adapter: &EntityAdapter<T, K>,
    encryptor: &FieldEncryptor,
    item: &T,
) -> StoreResult<T> {
    let map = adapter.to_map(item);
    let decrypted = encryptor.decrypt_fields(&map)?;
    adapter.from_map(&decrypted)
}

fn decrypt_change_with<T: Clone, K>(
    adapter: &EntityAdapter<T, K>,
    encryptor: &FieldEncryptor,
    change: PendingChange<T>,
) -> StoreResult<PendingChange<T>> {
    let item = decrypt_with(adapter, encryptor, &change.item)?;
    let original_value = match &change.original_value {
        Some(original) => Some(decrypt_with(adapter, encryptor, original)?),
        None => None,
    };
    Ok(PendingChange {
        item,
        original_value,
        ..change
    })
}
