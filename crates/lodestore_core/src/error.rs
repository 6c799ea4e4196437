//! Error types for lodestore.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Classification of an encryption failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionFailure {
    /// The ciphertext was produced under a different key version.
    VersionMismatch,
    /// The authentication tag did not verify.
    AuthFailure,
    /// The ciphertext was structurally malformed.
    Format,
}

/// Classification of a connection-pool failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolFailure {
    /// The pool was used before initialization.
    NotInitialized,
    /// The pool has been disposed.
    Disposed,
    /// Acquiring a connection timed out.
    AcquireTimeout,
    /// The pool is closed.
    Closed,
    /// All connections are in use.
    Exhausted,
    /// Establishing a connection failed.
    Connection,
}

/// Errors raised by backends, the fetch-policy handler, and the store facade.
///
/// Backends map native failures to these kinds at the call site that raises
/// them; the core propagates them unchanged. Every value carries a message
/// and, where useful, the underlying cause folded into it. Retryability is
/// intrinsic to the kind (see [`StoreError::is_retryable`]).
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Generic remote or local synchronization failure.
    #[error("sync error: {message}")]
    Sync {
        /// Description of the failure.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The remote host is unreachable.
    #[error("network error: {message}")]
    Network {
        /// Description of the failure.
        message: String,
    },

    /// An I/O deadline was exceeded.
    #[error("timeout: {message}")]
    Timeout {
        /// Description of the failure.
        message: String,
    },

    /// Credentials are invalid or expired.
    #[error("authentication failed: {message}")]
    Authentication {
        /// Description of the failure.
        message: String,
    },

    /// The caller is not permitted to perform the operation.
    #[error("authorization failed: {message}")]
    Authorization {
        /// Description of the failure.
        message: String,
    },

    /// A constraint was violated or a value had an invalid shape.
    #[error("validation error: {message}")]
    Validation {
        /// Description of the failure.
        message: String,
    },

    /// A transactional conflict, lock, or busy condition.
    #[error("transaction error: {message}")]
    Transaction {
        /// Description of the failure.
        message: String,
    },

    /// An operation was issued in the wrong lifecycle state.
    #[error("invalid state: current={current}, expected={expected}")]
    State {
        /// The state the component was in.
        current: String,
        /// The state the operation requires.
        expected: String,
    },

    /// A cryptographic operation failed.
    #[error("encryption error ({kind:?}): {message}")]
    Encryption {
        /// What went wrong.
        kind: EncryptionFailure,
        /// Description of the failure.
        message: String,
    },

    /// A connection-pool operation failed.
    #[error("pool error ({kind:?}): {message}")]
    Pool {
        /// What went wrong.
        kind: PoolFailure,
        /// Description of the failure.
        message: String,
    },
}

impl StoreError {
    /// Creates a retryable sync error.
    pub fn sync(message: impl Into<String>) -> Self {
        Self::Sync {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable sync error.
    pub fn sync_fatal(message: impl Into<String>) -> Self {
        Self::Sync {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Creates an authentication error.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    /// Creates an authorization error.
    pub fn authorization(message: impl Into<String>) -> Self {
        Self::Authorization {
            message: message.into(),
        }
    }

    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a transaction error.
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    /// Creates a lifecycle state error.
    pub fn state(current: impl Into<String>, expected: impl Into<String>) -> Self {
        Self::State {
            current: current.into(),
            expected: expected.into(),
        }
    }

    /// Creates the state error for an uninitialized component.
    pub fn uninitialized() -> Self {
        Self::state("uninitialized", "initialized")
    }

    /// Creates the state error for a closed component.
    pub fn closed() -> Self {
        Self::state("closed", "initialized")
    }

    /// Creates an encryption error.
    pub fn encryption(kind: EncryptionFailure, message: impl Into<String>) -> Self {
        Self::Encryption {
            kind,
            message: message.into(),
        }
    }

    /// Creates a pool error.
    pub fn pool(kind: PoolFailure, message: impl Into<String>) -> Self {
        Self::Pool {
            kind,
            message: message.into(),
        }
    }

    /// Returns true if retrying the failed operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Sync { retryable, .. } => *retryable,
            StoreError::Network { .. } | StoreError::Timeout { .. } => true,
            StoreError::Transaction { .. } => true,
            StoreError::Pool { kind, .. } => matches!(
                kind,
                PoolFailure::AcquireTimeout | PoolFailure::Exhausted | PoolFailure::Connection
            ),
            StoreError::Authentication { .. }
            | StoreError::Authorization { .. }
            | StoreError::Validation { .. }
            | StoreError::State { .. }
            | StoreError::Encryption { .. } => false,
        }
    }
}
