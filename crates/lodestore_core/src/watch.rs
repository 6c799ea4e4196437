//! Reactive subjects and the per-backend watcher registry.
//!
//! A [`Subject`] is an explicit stream object with `emit`, `emit_error`,
//! and `close`, owned by a single writer (the backend's task) and read by
//! any number of subscribers. Late subscribers replay the most recent
//! value (replay-1). Emissions after `close` are ignored: a subject may
//! be disposed while a refresh is still in flight during teardown.
//!
//! The registry keeps one subject per watched id and one per canonical
//! query key, so repeated `watch_all` calls with equal queries share a
//! subject.

use crate::entity::EntityKey;
use crate::error::{StoreError, StoreResult};
use crate::query::Query;
use parking_lot::Mutex;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Sentinel query key for `watch_all` with no query.
pub const ALL_QUERY_KEY: &str = "_all_";

enum StreamEvent<V> {
    Item(V),
    Error(StoreError),
}

struct SubjectInner<V> {
    last: Option<V>,
    senders: Vec<UnboundedSender<StreamEvent<V>>>,
    closed: bool,
    replay: bool,
}

/// A replayable broadcast stream with an explicit owner.
///
/// Cloning shares the same underlying stream.
pub struct Subject<V> {
    inner: Arc<Mutex<SubjectInner<V>>>,
}

impl<V> Clone for Subject<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V: Clone> Subject<V> {
    /// Creates a subject with replay-1 semantics.
    #[must_use]
    pub fn new() -> Self {
        Self::with_replay(true)
    }

    /// Creates a subject that does not replay to late subscribers.
    ///
    /// Used for pure event streams such as conflicts.
    #[must_use]
    pub fn without_replay() -> Self {
        Self::with_replay(false)
    }

    fn with_replay(replay: bool) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SubjectInner {
                last: None,
                senders: Vec::new(),
                closed: false,
                replay,
            })),
        }
    }

    /// Subscribes to the stream.
    ///
    /// If the subject holds a replay value, it is delivered first. A
    /// subscription to a closed subject yields nothing.
    pub fn subscribe(&self) -> Subscription<V> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();
        if !inner.closed {
            if inner.replay {
                if let Some(last) = &inner.last {
                    let _ = tx.send(StreamEvent::Item(last.clone()));
                }
            }
            inner.senders.push(tx);
        }
        Subscription { rx }
    }

    /// Emits a value to all subscribers and stores it for replay.
    ///
    /// Ignored after `close`.
    pub fn emit(&self, value: V) {
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        if inner.replay {
            inner.last = Some(value.clone());
        }
        inner
            .senders
            .retain(|tx| tx.send(StreamEvent::Item(value.clone())).is_ok());
    }

    /// Emits an error to all subscribers.
    ///
    /// The stream remains usable for further emissions; the replay value
    /// is unchanged.
    pub fn emit_error(&self, error: StoreError) {
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        inner
            .senders
            .retain(|tx| tx.send(StreamEvent::Error(error.clone())).is_ok());
    }

    /// Closes the stream; all subscriptions end after draining.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.senders.clear();
    }

    /// Returns the most recent value, if any.
    pub fn latest(&self) -> Option<V> {
        self.inner.lock().last.clone()
    }

    /// Returns true once `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().senders.len()
    }
}

impl<V: Clone> Default for Subject<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// A read handle onto a [`Subject`].
pub struct Subscription<V> {
    rx: UnboundedReceiver<StreamEvent<V>>,
}

impl<V> Subscription<V> {
    /// Waits for the next emission.
    ///
    /// Returns `None` once the subject is closed and the backlog drained.
    pub async fn recv(&mut self) -> Option<StoreResult<V>> {
        self.rx.recv().await.map(|event| match event {
            StreamEvent::Item(value) => Ok(value),
            StreamEvent::Error(error) => Err(error),
        })
    }

    /// Returns the next emission if one is already buffered.
    pub fn try_recv(&mut self) -> Option<StoreResult<V>> {
        self.rx.try_recv().ok().map(|event| match event {
            StreamEvent::Item(value) => Ok(value),
            StreamEvent::Error(error) => Err(error),
        })
    }
}

/// Per-backend registry of entity and query watchers.
pub struct WatcherRegistry<T, K> {
    entities: RwLock<HashMap<K, Subject<Option<T>>>>,
    queries: RwLock<HashMap<String, (Option<Query>, Subject<Vec<T>>)>>,
}

impl<T: Clone, K: EntityKey> WatcherRegistry<T, K> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entities: RwLock::new(HashMap::new()),
            queries: RwLock::new(HashMap::new()),
        }
    }

    /// Canonical key for a query watcher.
    pub fn query_key(query: Option<&Query>) -> String {
        query.map_or_else(|| ALL_QUERY_KEY.to_owned(), Query::cache_key)
    }

    /// Returns the subject for `id`, creating it if absent.
    ///
    /// The boolean is true when the subject was just created; the caller
    /// then performs the initial load and pushes the result.
    pub fn entity_subject(&self, id: &K) -> (Subject<Option<T>>, bool) {
        let mut entities = self.entities.write();
        match entities.get(id) {
            Some(subject) => (subject.clone(), false),
            None => {
                let subject = Subject::new();
                entities.insert(id.clone(), subject.clone());
                (subject, true)
            }
        }
    }

    /// Returns the subject for a query, creating it if absent.
    pub fn query_subject(&self, query: Option<&Query>) -> (Subject<Vec<T>>, bool) {
        let key = Self::query_key(query);
        let mut queries = self.queries.write();
        match queries.get(&key) {
            Some((_, subject)) => (subject.clone(), false),
            None => {
                let subject = Subject::new();
                queries.insert(key, (query.cloned(), subject.clone()));
                (subject, true)
            }
        }
    }

    /// Pushes a value to the watcher for `id`, if one exists.
    pub fn notify_entity(&self, id: &K, value: Option<T>) {
        if let Some(subject) = self.entities.read().get(id) {
            subject.emit(value);
        }
    }

    /// Snapshot of all query watchers for refresh after a write.
    pub fn query_watchers(&self) -> Vec<(Option<Query>, Subject<Vec<T>>)> {
        self.queries.read().values().cloned().collect()
    }

    /// Number of live entity watchers.
    pub fn entity_watcher_count(&self) -> usize {
        self.entities.read().len()
    }

    /// Number of live query watchers.
    pub fn query_watcher_count(&self) -> usize {
        self.queries.read().len()
    }

    /// Closes every subject and forgets them.
    pub fn close_all(&self) {
        for subject in self.entities.write().drain().map(|(_, s)| s) {
            subject.close();
        }
        for (_, subject) in self.queries.write().drain().map(|(_, pair)| pair) {
            subject.close();
        }
    }
}

impl<T: Clone, K: EntityKey> Default for WatcherRegistry<T, K> {
    fn default() -> Self {
        Self::new()
    }
}
