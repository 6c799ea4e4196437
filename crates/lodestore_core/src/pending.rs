//! The offline-write log: pending changes awaiting sync.
//!
//! Sync-capable backends append a [`PendingChange`] when a write cannot
//! reach the authoritative store. Entries stay in the log until a retry
//! succeeds or the change is cancelled; every mutation publishes a fresh
//! snapshot of the whole list to the snapshot stream.

use crate::types::ChangeOperation;
use crate::watch::{Subject, Subscription};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

/// Change ids are unique for the lifetime of the process.
static NEXT_CHANGE_ID: AtomicU64 = AtomicU64::new(1);

fn next_change_id() -> String {
    let n = NEXT_CHANGE_ID.fetch_add(1, Ordering::Relaxed);
    format!("pc-{n}")
}

/// A local mutation that has not been confirmed by the authoritative store.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingChange<T> {
    /// Process-unique, monotonically assigned identifier.
    pub id: String,
    /// The value the mutation wrote (for deletes, the value removed).
    pub item: T,
    /// What kind of mutation this is.
    pub operation: ChangeOperation,
    /// The value before the mutation, when known. Required to compensate
    /// an `Update` or `Delete` on cancellation.
    pub original_value: Option<T>,
    /// When the mutation was first attempted.
    pub attempted_at: SystemTime,
    /// When the mutation was last retried.
    pub last_attempt: Option<SystemTime>,
    /// Number of retries so far.
    pub retry_count: u32,
    /// Why the last attempt failed.
    pub cause: Option<String>,
}

/// Ordered log of pending changes with a snapshot stream.
pub struct PendingChangeLog<T> {
    changes: RwLock<Vec<PendingChange<T>>>,
    stream: Subject<Vec<PendingChange<T>>>,
}

impl<T: Clone> PendingChangeLog<T> {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self {
            changes: RwLock::new(Vec::new()),
            stream: Subject::new(),
        }
    }

    /// Appends a change and emits a new snapshot. Returns the assigned id.
    pub fn record_change(
        &self,
        item: T,
        operation: ChangeOperation,
        original_value: Option<T>,
    ) -> String {
        let change = PendingChange {
            id: next_change_id(),
            item,
            operation,
            original_value,
            attempted_at: SystemTime::now(),
            last_attempt: None,
            retry_count: 0,
            cause: None,
        };
        let id = change.id.clone();
        let snapshot = {
            let mut changes = self.changes.write();
            changes.push(change);
            changes.clone()
        };
        self.stream.emit(snapshot);
        id
    }

    /// Returns the change with the given id.
    pub fn get_change(&self, id: &str) -> Option<PendingChange<T>> {
        self.changes.read().iter().find(|c| c.id == id).cloned()
    }

    /// Returns the current list in record order.
    pub fn snapshot(&self) -> Vec<PendingChange<T>> {
        self.changes.read().clone()
    }

    /// Number of unsynced changes.
    pub fn count(&self) -> usize {
        self.changes.read().len()
    }

    /// Subscribes to list snapshots (replay-1).
    pub fn stream(&self) -> Subscription<Vec<PendingChange<T>>> {
        self.stream.subscribe()
    }

    /// Replaces the change with an updated copy produced by `update`.
    ///
    /// Returns the updated change, or `None` if the id is unknown.
    pub fn update_change(
        &self,
        id: &str,
        update: impl FnOnce(&mut PendingChange<T>),
    ) -> Option<PendingChange<T>> {
        let (updated, snapshot) = {
            let mut changes = self.changes.write();
            let slot = changes.iter_mut().find(|c| c.id == id)?;
            let mut copy = slot.clone();
            update(&mut copy);
            copy.id = slot.id.clone();
            *slot = copy.clone();
            (copy, changes.clone())
        };
        self.stream.emit(snapshot);
        Some(updated)
    }

    /// Stamps a retry attempt: bumps the count, sets `last_attempt` to now.
    pub fn mark_attempt(&self, id: &str) -> Option<PendingChange<T>> {
        self.update_change(id, |change| {
            change.retry_count += 1;
            change.last_attempt = Some(SystemTime::now());
        })
    }

    /// Removes the change and emits a new snapshot. Returns the removed entry.
    pub fn remove_change(&self, id: &str) -> Option<PendingChange<T>> {
        let (removed, snapshot) = {
            let mut changes = self.changes.write();
            let index = changes.iter().position(|c| c.id == id)?;
            let removed = changes.remove(index);
            (removed, changes.clone())
        };
        self.stream.emit(snapshot);
        Some(removed)
    }

    /// Releases the snapshot stream. The log itself stays readable.
    pub fn dispose(&self) {
        self.stream.close();
    }
}

impl<T: Clone> Default for PendingChangeLog<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic_and_unique() {
        let log: PendingChangeLog<i32> = PendingChangeLog::new();
        let a = log.record_change(1, ChangeOperation::Create, None);
        let b = log.record_change(2, ChangeOperation::Update, Some(1));

        assert_ne!(a, b);
        let an: u64 = a.trim_start_matches("pc-").parse().unwrap();
        let bn: u64 = b.trim_start_matches("pc-").parse().unwrap();
        assert!(bn > an);
    }

    #[test]
    fn record_and_get() {
        let log: PendingChangeLog<i32> = PendingChangeLog::new();
        let id = log.record_change(7, ChangeOperation::Update, Some(6));

        let change = log.get_change(&id).unwrap();
        assert_eq!(change.item, 7);
        assert_eq!(change.original_value, Some(6));
        assert_eq!(change.operation, ChangeOperation::Update);
        assert_eq!(change.retry_count, 0);
        assert!(change.last_attempt.is_none());
        assert_eq!(log.count(), 1);
    }

    #[test]
    fn mark_attempt_bumps_bookkeeping() {
        let log: PendingChangeLog<i32> = PendingChangeLog::new();
        let id = log.record_change(7, ChangeOperation::Create, None);

        let updated = log.mark_attempt(&id).unwrap();
        assert_eq!(updated.retry_count, 1);
        assert!(updated.last_attempt.is_some());

        let updated = log.mark_attempt(&id).unwrap();
        assert_eq!(updated.retry_count, 2);
    }

    #[test]
    fn update_change_preserves_id() {
        let log: PendingChangeLog<i32> = PendingChangeLog::new();
        let id = log.record_change(7, ChangeOperation::Create, None);

        let updated = log
            .update_change(&id, |c| {
                c.cause = Some("remote unreachable".into());
                c.id = "hijacked".into();
            })
            .unwrap();

        assert_eq!(updated.id, id);
        assert_eq!(updated.cause.as_deref(), Some("remote unreachable"));
    }

    #[test]
    fn remove_returns_entry() {
        let log: PendingChangeLog<i32> = PendingChangeLog::new();
        let id = log.record_change(7, ChangeOperation::Delete, Some(7));

        let removed = log.remove_change(&id).unwrap();
        assert_eq!(removed.item, 7);
        assert_eq!(log.count(), 0);
        assert!(log.remove_change(&id).is_none());
    }

    #[tokio::test]
    async fn snapshots_flow_on_every_mutation() {
        let log: PendingChangeLog<i32> = PendingChangeLog::new();
        let mut stream = log.stream();

        let id = log.record_change(1, ChangeOperation::Create, None);
        assert_eq!(stream.recv().await.unwrap().unwrap().len(), 1);

        log.record_change(2, ChangeOperation::Create, None);
        assert_eq!(stream.recv().await.unwrap().unwrap().len(), 2);

        log.remove_change(&id);
        let snapshot = stream.recv().await.unwrap().unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].item, 2);
    }

    #[tokio::test]
    async fn late_subscriber_sees_current_snapshot() {
        let log: PendingChangeLog<i32> = PendingChangeLog::new();
        log.record_change(1, ChangeOperation::Create, None);
        log.record_change(2, ChangeOperation::Create, None);

        let mut stream = log.stream();
        assert_eq!(stream.recv().await.unwrap().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn dispose_closes_stream() {
        let log: PendingChangeLog<i32> = PendingChangeLog::new();
        let mut stream = log.stream();
        log.dispose();
        assert!(stream.recv().await.is_none());
    }
}
