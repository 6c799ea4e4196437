//! The fetch-policy handler: cache/network read coordination.
//!
//! Layers the six fetch policies over any backend, tracking per-entity
//! staleness, cache tags, and invalidation. Background revalidation runs
//! on detached tasks and its failures are swallowed; only `networkOnly`
//! and `cacheOnly` propagate read errors directly.

use crate::backend::DynBackend;
use crate::entity::{EntityAdapter, EntityKey, FieldMap};
use crate::error::StoreResult;
use crate::query::{matches, Query};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// The decision rule for whether a read consults local, remote, or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchPolicy {
    /// Return fresh local data; fetch when missing or stale.
    #[default]
    CacheFirst,
    /// Fetch first; fall back to local data on failure.
    NetworkFirst,
    /// Return local data immediately and refresh in the background.
    CacheAndNetwork,
    /// Local data only; never fetch.
    CacheOnly,
    /// Always fetch; propagate fetch failures.
    NetworkOnly,
    /// Return local data immediately, revalidate in the background;
    /// await the fetch only when there is nothing local.
    StaleWhileRevalidate,
}

/// Aggregate cache observability numbers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Number of tracked entries.
    pub total_count: usize,
    /// Number of tracked entries currently considered stale.
    pub stale_count: usize,
    /// Entry count per tag.
    pub tag_counts: HashMap<String, usize>,
}

#[derive(Debug)]
struct CacheState<K> {
    last_fetch: HashMap<K, Instant>,
    invalidated: HashSet<K>,
    tags: HashMap<K, HashSet<String>>,
}

impl<K: EntityKey> CacheState<K> {
    fn new() -> Self {
        Self {
            last_fetch: HashMap::new(),
            invalidated: HashSet::new(),
            tags: HashMap::new(),
        }
    }

    fn known_ids(&self) -> HashSet<K> {
        self.last_fetch
            .keys()
            .chain(self.tags.keys())
            .cloned()
            .collect()
    }

    fn record_fetch(&mut self, id: &K) {
        self.last_fetch.insert(id.clone(), Instant::now());
        self.invalidated.remove(id);
    }

    fn is_stale(&self, id: &K, stale_duration: Option<Duration>) -> bool {
        if self.invalidated.contains(id) {
            return true;
        }
        match self.last_fetch.get(id) {
            None => true,
            Some(fetched) => match stale_duration {
                Some(window) => fetched.elapsed() > window,
                None => false,
            },
        }
    }
}

/// Coordinates reads between the local backend and its remote via the
/// policy matrix, and owns the staleness/tag bookkeeping.
pub struct FetchPolicyHandler<T, K: EntityKey> {
    backend: DynBackend<T, K>,
    adapter: EntityAdapter<T, K>,
    default_policy: RwLock<FetchPolicy>,
    stale_duration: Option<Duration>,
    state: Arc<RwLock<CacheState<K>>>,
}

impl<T, K> FetchPolicyHandler<T, K>
where
    T: Clone + Send + Sync + 'static,
    K: EntityKey,
{
    /// Creates a handler over `backend`.
    pub fn new(
        backend: DynBackend<T, K>,
        adapter: EntityAdapter<T, K>,
        default_policy: FetchPolicy,
        stale_duration: Option<Duration>,
    ) -> Self {
        Self {
            backend,
            adapter,
            default_policy: RwLock::new(default_policy),
            stale_duration,
            state: Arc::new(RwLock::new(CacheState::new())),
        }
    }

    /// The wrapped backend.
    pub fn backend(&self) -> &DynBackend<T, K> {
        &self.backend
    }

    /// The current default policy.
    pub fn policy(&self) -> FetchPolicy {
        *self.default_policy.read()
    }

    /// Replaces the default policy.
    pub fn set_policy(&self, policy: FetchPolicy) {
        *self.default_policy.write() = policy;
    }

    /// Reads one entity under the effective policy.
    pub async fn get(&self, id: &K, policy: Option<FetchPolicy>) -> StoreResult<Option<T>> {
        let policy = policy.unwrap_or_else(|| self.policy());
        match policy {
            FetchPolicy::CacheOnly => self.backend.get(id).await,
            FetchPolicy::CacheFirst => {
                if let Some(local) = self.backend.get(id).await? {
                    if !self.is_stale(id) {
                        return Ok(Some(local));
                    }
                }
                match self.backend.sync().await {
                    Ok(()) => {
                        self.state.write().record_fetch(id);
                        self.backend.get(id).await
                    }
                    Err(error) => {
                        debug!(%error, "cacheFirst fetch failed, falling back to local");
                        self.backend.get(id).await
                    }
                }
            }
            FetchPolicy::NetworkFirst => match self.backend.sync().await {
                Ok(()) => {
                    self.state.write().record_fetch(id);
                    self.backend.get(id).await
                }
                Err(error) => {
                    debug!(%error, "networkFirst fetch failed, falling back to local");
                    self.backend.get(id).await
                }
            },
            FetchPolicy::NetworkOnly => {
                self.backend.sync().await?;
                self.state.write().record_fetch(id);
                self.backend.get(id).await
            }
            FetchPolicy::CacheAndNetwork => {
                let local = self.backend.get(id).await?;
                self.spawn_revalidate(Some(id.clone()));
                Ok(local)
            }
            FetchPolicy::StaleWhileRevalidate => {
                let local = self.backend.get(id).await?;
                if local.is_some() {
                    self.spawn_revalidate(Some(id.clone()));
                    Ok(local)
                } else {
                    if self.backend.sync().await.is_ok() {
                        self.state.write().record_fetch(id);
                    }
                    self.backend.get(id).await
                }
            }
        }
    }

    /// Reads a list under the effective policy; no per-id staleness.
    pub async fn get_all(
        &self,
        query: Option<&Query>,
        policy: Option<FetchPolicy>,
    ) -> StoreResult<Vec<T>> {
        let policy = policy.unwrap_or_else(|| self.policy());
        match policy {
            FetchPolicy::CacheOnly => self.backend.get_all(query).await,
            FetchPolicy::CacheFirst => {
                let local = self.backend.get_all(query).await?;
                if !local.is_empty() {
                    return Ok(local);
                }
                match self.backend.sync().await {
                    Ok(()) => self.backend.get_all(query).await,
                    Err(error) => {
                        debug!(%error, "cacheFirst list fetch failed, returning local");
                        Ok(local)
                    }
                }
            }
            FetchPolicy::NetworkFirst => match self.backend.sync().await {
                Ok(()) => self.backend.get_all(query).await,
                Err(error) => {
                    debug!(%error, "networkFirst list fetch failed, falling back to local");
                    self.backend.get_all(query).await
                }
            },
            FetchPolicy::NetworkOnly => {
                self.backend.sync().await?;
                self.backend.get_all(query).await
            }
            FetchPolicy::CacheAndNetwork => {
                let local = self.backend.get_all(query).await?;
                self.spawn_revalidate(None);
                Ok(local)
            }
            FetchPolicy::StaleWhileRevalidate => {
                let local = self.backend.get_all(query).await?;
                if local.is_empty() {
                    let _ = self.backend.sync().await;
                    self.backend.get_all(query).await
                } else {
                    self.spawn_revalidate(None);
                    Ok(local)
                }
            }
        }
    }

    fn spawn_revalidate(&self, id: Option<K>) {
        let backend = Arc::clone(&self.backend);
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            match backend.sync().await {
                Ok(()) => {
                    if let Some(id) = id {
                        state.write().record_fetch(&id);
                    }
                }
                Err(error) => {
                    debug!(%error, "background revalidation failed");
                }
            }
        });
    }

    /// Staleness rule: invalidated, never fetched, or fetched longer ago
    /// than the stale window.
    pub fn is_stale(&self, id: &K) -> bool {
        self.state.read().is_stale(id, self.stale_duration)
    }

    /// Records a fresh cache entry: refreshes its fetch time, clears the
    /// stale flag, and overwrites its tags when supplied.
    pub fn record_cached_item(&self, id: &K, tags: Option<HashSet<String>>) {
        let mut state = self.state.write();
        state.record_fetch(id);
        if let Some(tags) = tags {
            state.tags.insert(id.clone(), tags);
        }
    }

    /// Adds tags to an entry.
    pub fn add_tags(&self, id: &K, tags: impl IntoIterator<Item = String>) {
        self.state
            .write()
            .tags
            .entry(id.clone())
            .or_default()
            .extend(tags);
    }

    /// Removes tags from an entry.
    pub fn remove_tags(&self, id: &K, tags: &HashSet<String>) {
        if let Some(entry) = self.state.write().tags.get_mut(id) {
            entry.retain(|t| !tags.contains(t));
        }
    }

    /// The entry's tags.
    pub fn get_tags(&self, id: &K) -> HashSet<String> {
        self.state.read().tags.get(id).cloned().unwrap_or_default()
    }

    /// Marks the entry stale. Tags and fetch times are preserved.
    pub fn invalidate(&self, id: &K) {
        self.state.write().invalidated.insert(id.clone());
    }

    /// Marks every known entry stale.
    pub fn invalidate_all(&self) {
        let mut state = self.state.write();
        let ids = state.known_ids();
        state.invalidated.extend(ids);
    }

    /// Marks each listed entry stale.
    pub fn invalidate_by_ids(&self, ids: impl IntoIterator<Item = K>) {
        self.state.write().invalidated.extend(ids);
    }

    /// Marks stale every entry carrying at least one of `tags`.
    pub fn invalidate_by_tags(&self, tags: &HashSet<String>) {
        let mut state = self.state.write();
        let matching: Vec<K> = state
            .tags
            .iter()
            .filter(|(_, entry_tags)| !entry_tags.is_disjoint(tags))
            .map(|(id, _)| id.clone())
            .collect();
        state.invalidated.extend(matching);
    }

    /// Loads current items and marks stale those matching `query`, as
    /// evaluated through the caller-provided accessor. Returns the
    /// number of entries invalidated.
    pub async fn invalidate_where(
        &self,
        query: &Query,
        accessor: impl Fn(&T) -> FieldMap,
    ) -> StoreResult<usize> {
        let items = self.backend.get_all(None).await?;
        let matching: Vec<K> = items
            .iter()
            .filter(|item| matches(&accessor(item), query))
            .map(|item| self.adapter.id_of(item))
            .collect();
        let count = matching.len();
        self.state.write().invalidated.extend(matching);
        Ok(count)
    }

    /// Aggregate cache statistics.
    pub fn get_cache_stats(&self) -> CacheStats {
        let state = self.state.read();
        let known = state.known_ids();
        let stale_count = known
            .iter()
            .filter(|id| state.is_stale(id, self.stale_duration))
            .count();
        let mut tag_counts: HashMap<String, usize> = HashMap::new();
        for tags in state.tags.values() {
            for tag in tags {
                *tag_counts.entry(tag.clone()).or_default() += 1;
            }
        }
        CacheStats {
            total_count: known.len(),
            stale_count,
            tag_counts,
        }
    }

    /// Forgets the entry's tags, fetch time, and stale flag.
    pub fn remove_entry(&self, id: &K) {
        let mut state = self.state.write();
        state.last_fetch.remove(id);
        state.invalidated.remove(id);
        state.tags.remove(id);
    }
}
