//! Error types for the sync engine.

use mirrorsync_protocol::ProtocolError;
use std::time::Duration;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while publishing or applying sync messages.
///
/// Stale messages and organic dependency timeouts are not errors; they are
/// ordinary outcomes reported through `DispatchOutcome`.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The snapshot does not carry the whitelisted fields in the expected shape.
    #[error("malformed snapshot for {kind}/{entity_id}: {}", .reasons.join("; "))]
    MalformedSnapshot {
        /// Entity kind.
        kind: String,
        /// Source entity id.
        entity_id: String,
        /// Every problem found.
        reasons: Vec<String>,
    },

    /// The mirror store failed.
    #[error("storage error: {message}")]
    Storage {
        /// Error message.
        message: String,
        /// Whether reprocessing may succeed.
        retryable: bool,
    },

    /// A force-sync message gave up waiting for a dependency.
    #[error("dependency {missing} for {kind}/{entity_id} did not arrive within {waited:?}")]
    DependencyTimeout {
        /// Entity kind of the message.
        kind: String,
        /// Source entity id of the message.
        entity_id: String,
        /// The dependency that never appeared.
        missing: String,
        /// How long the consumer waited.
        waited: Duration,
    },

    /// Wire payload could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Message transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The delivery channel was closed.
    #[error("delivery channel closed")]
    Closed,
}

impl SyncError {
    /// Creates a malformed snapshot error.
    pub fn malformed(
        kind: impl Into<String>,
        entity_id: impl Into<String>,
        reasons: Vec<String>,
    ) -> Self {
        Self::MalformedSnapshot {
            kind: kind.into(),
            entity_id: entity_id.into(),
            reasons,
        }
    }

    /// Creates a retryable storage error.
    pub fn storage_retryable(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable storage error.
    pub fn storage_fatal(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Returns true if redelivering the message may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Storage { retryable, .. } | SyncError::Transport { retryable, .. } => {
                *retryable
            }
            _ => false,
        }
    }

    /// Returns true if the message can never be applied as sent.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            SyncError::MalformedSnapshot { .. } | SyncError::Protocol(_)
        )
    }
}
