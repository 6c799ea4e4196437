//! Shared value types: sync status, capabilities, conflicts, change kinds.

/// The synchronization state of a backend, with a free-form cause on error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    /// Local and remote state agree.
    Synced,
    /// A sync round is in progress.
    Syncing,
    /// Local changes are being pushed.
    Uploading,
    /// The remote is unreachable; writes queue locally.
    Disconnected,
    /// The last sync round failed.
    Error(String),
}

impl SyncStatus {
    /// Returns true if a sync round is currently in flight.
    pub fn is_active(&self) -> bool {
        matches!(self, SyncStatus::Syncing | SyncStatus::Uploading)
    }

    /// Returns true if the backend is in a healthy, settled state.
    pub fn is_healthy(&self) -> bool {
        matches!(self, SyncStatus::Synced)
    }
}

/// Capability flags advertised by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// Writes succeed while the remote is unreachable.
    pub supports_offline: bool,
    /// The backend pushes remote changes as they happen.
    pub supports_realtime: bool,
    /// Batch writes are atomic.
    pub supports_transactions: bool,
    /// Cursor pagination is native rather than emulated.
    pub supports_pagination: bool,
    /// Field-level operations (partial updates) are available.
    pub supports_field_operations: bool,
}

/// The kind of mutation a pending change represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOperation {
    /// The entity did not exist before.
    Create,
    /// The entity existed and was replaced.
    Update,
    /// The entity was removed.
    Delete,
}

/// Why two versions of an entity are in conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// Both sides updated the entity since the common ancestor.
    ConcurrentUpdate,
    /// A deleted entity was written again.
    TombstoneRevival,
    /// The remote rejected the write with a constraint violation.
    Constraint,
}

/// A conflict between a local and a remote version of an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictDetails<T> {
    /// The local version.
    pub local: T,
    /// The remote version.
    pub remote: T,
    /// The specific field in conflict, when known.
    pub field: Option<String>,
    /// The conflict classification.
    pub kind: ConflictKind,
}

impl<T> ConflictDetails<T> {
    /// Creates a conflict over whole entities.
    pub fn new(local: T, remote: T, kind: ConflictKind) -> Self {
        Self {
            local,
            remote,
            field: None,
            kind,
        }
    }

    /// Narrows the conflict to a single field.
    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}
