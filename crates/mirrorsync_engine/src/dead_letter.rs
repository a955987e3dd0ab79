//! Holding area for messages that need an operator.

use async_trait::async_trait;
use mirrorsync_protocol::{SyncMessage, Timestamp};
use parking_lot::RwLock;
use std::fmt;

/// Why a message was set aside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeadLetterReason {
    /// The snapshot could not be read with the mirror's schema.
    MalformedSnapshot,
    /// A force-sync message gave up waiting for a dependency.
    DependencyTimeout,
    /// A non-retryable failure other than a malformed snapshot.
    PermanentFailure,
    /// Redelivery attempts were exhausted.
    RetriesExhausted,
}

impl fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeadLetterReason::MalformedSnapshot => "malformed-snapshot",
            DeadLetterReason::DependencyTimeout => "dependency-timeout",
            DeadLetterReason::PermanentFailure => "permanent-failure",
            DeadLetterReason::RetriesExhausted => "retries-exhausted",
        };
        f.write_str(name)
    }
}

/// A message set aside for manual inspection.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter {
    /// The message as received.
    pub message: SyncMessage,
    /// Classification.
    pub reason: DeadLetterReason,
    /// Human readable error.
    pub error: String,
    /// When the message was set aside.
    pub recorded_at: Timestamp,
}

impl DeadLetter {
    /// Creates a dead letter stamped with the current time.
    pub fn new(message: SyncMessage, reason: DeadLetterReason, error: impl Into<String>) -> Self {
        Self {
            message,
            reason,
            error: error.into(),
            recorded_at: Timestamp::now(),
        }
    }
}

/// Destination for dead letters, normally the transport's dead-letter queue.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// Records a dead letter. Must not fail; sinks log their own trouble.
    async fn dead_letter(&self, letter: DeadLetter);
}

/// Logs dead letters and drops them.
#[derive(Debug, Default)]
pub struct LogDeadLetters;

#[async_trait]
impl DeadLetterSink for LogDeadLetters {
    async fn dead_letter(&self, letter: DeadLetter) {
        tracing::error!(
            entity_kind = %letter.message.entity_kind,
            entity_id = %letter.message.entity_id,
            emitted_at = %letter.message.emitted_at,
            reason = %letter.reason,
            error = %letter.error,
            "message dead-lettered"
        );
    }
}

/// Keeps dead letters in memory.
#[derive(Debug, Default)]
pub struct MemoryDeadLetters {
    letters: RwLock<Vec<DeadLetter>>,
}

impl MemoryDeadLetters {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all letters in arrival order.
    pub fn letters(&self) -> Vec<DeadLetter> {
        self.letters.read().clone()
    }

    /// Returns the number of letters.
    pub fn len(&self) -> usize {
        self.letters.read().len()
    }

    /// Returns true if no message was dead-lettered.
    pub fn is_empty(&self) -> bool {
        self.letters.read().is_empty()
    }

    /// Removes and returns all letters.
    pub fn drain(&self) -> Vec<DeadLetter> {
        std::mem::take(&mut *self.letters.write())
    }
}

#[async_trait]
impl DeadLetterSink for MemoryDeadLetters {
    async fn dead_letter(&self, letter: DeadLetter) {
        self.letters.write().push(letter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirrorsync_protocol::Snapshot;

    #[tokio::test]
    async fn memory_sink_collects_and_drains() {
        let sink = MemoryDeadLetters::new();
        let msg = SyncMessage::created("company", "c-1", Snapshot::new(), Timestamp::from_micros(1));

        sink.dead_letter(DeadLetter::new(
            msg.clone(),
            DeadLetterReason::MalformedSnapshot,
            "missing required field `name`",
        ))
        .await;

        assert_eq!(sink.len(), 1);
        assert_eq!(sink.letters()[0].message, msg);

        let drained = sink.drain();
        assert_eq!(drained.len(), 1);
        assert!(sink.is_empty());
    }

    #[test]
    fn reason_display() {
        assert_eq!(
            DeadLetterReason::DependencyTimeout.to_string(),
            "dependency-timeout"
        );
    }
}
