//! The realtime channel: remote row events pushed into watchers.

use lodestore_core::{FieldMap, Subject, Subscription};

/// The kind of remote mutation an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordEventKind {
    /// A row was inserted.
    Insert,
    /// A row was updated.
    Update,
    /// A row was deleted.
    Delete,
}

/// One remote mutation event.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordEvent {
    /// What happened.
    pub kind: RecordEventKind,
    /// The affected table.
    pub table: String,
    /// The row after the mutation (for deletes, at least the key column).
    pub row: FieldMap,
}

impl RecordEvent {
    /// Creates an insert event.
    pub fn insert(table: impl Into<String>, row: FieldMap) -> Self {
        Self {
            kind: RecordEventKind::Insert,
            table: table.into(),
            row,
        }
    }

    /// Creates an update event.
    pub fn update(table: impl Into<String>, row: FieldMap) -> Self {
        Self {
            kind: RecordEventKind::Update,
            table: table.into(),
            row,
        }
    }

    /// Creates a delete event.
    pub fn delete(table: impl Into<String>, row: FieldMap) -> Self {
        Self {
            kind: RecordEventKind::Delete,
            table: table.into(),
            row,
        }
    }
}

/// A fan-out channel of remote mutation events.
///
/// The wire client publishes; backends subscribe and fold events into
/// their cache and watchers. Events are not replayed to late
/// subscribers.
#[derive(Clone)]
pub struct RealtimeChannel {
    subject: Subject<RecordEvent>,
}

impl Default for RealtimeChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl RealtimeChannel {
    /// Creates an idle channel.
    #[must_use]
    pub fn new() -> Self {
        Self {
            subject: Subject::without_replay(),
        }
    }

    /// Publishes an event to every subscriber.
    pub fn publish(&self, event: RecordEvent) {
        self.subject.emit(event);
    }

    /// Subscribes to future events.
    pub fn subscribe(&self) -> Subscription<RecordEvent> {
        self.subject.subscribe()
    }

    /// Closes the channel; subscriber loops end.
    pub fn close(&self) {
        self.subject.close();
    }
}
