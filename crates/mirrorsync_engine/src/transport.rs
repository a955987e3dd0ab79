//! Transport abstraction and an in-memory bus.
//!
//! Real deployments plug a message broker in behind `MessageSink` on the
//! publishing side and feed `Delivery` values into `Consumer::run` on the
//! subscribing side. `MemoryBus` provides the same at-least-once contract in
//! process, for tests and tooling.

use crate::config::RetryConfig;
use crate::dead_letter::{DeadLetter, DeadLetterReason, DeadLetterSink};
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use mirrorsync_protocol::SyncMessage;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Notify};

/// Outbound side of the transport.
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Hands a message to the transport.
    async fn send(&self, message: SyncMessage) -> SyncResult<()>;
}

/// Consumer verdict for one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    /// Processing finished; do not redeliver.
    Ack,
    /// Processing failed transiently; redeliver later.
    Nack,
}

impl Ack {
    /// Maps a dispatch result to a verdict: only errors are redelivered.
    pub fn from_result<T>(result: &SyncResult<T>) -> Self {
        match result {
            Ok(_) => Ack::Ack,
            Err(_) => Ack::Nack,
        }
    }
}

/// One delivery of a message to a consumer.
#[derive(Debug)]
pub struct Delivery {
    /// The message.
    pub message: SyncMessage,
    /// Delivery attempt, starting at 0.
    pub attempt: u32,
    reply: Option<oneshot::Sender<Ack>>,
}

impl Delivery {
    /// Creates a delivery and the receiver on which its verdict arrives.
    pub fn new(message: SyncMessage, attempt: u32) -> (Self, oneshot::Receiver<Ack>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                message,
                attempt,
                reply: Some(tx),
            },
            rx,
        )
    }

    /// Creates a delivery nobody waits on.
    pub fn detached(message: SyncMessage) -> Self {
        Self {
            message,
            attempt: 0,
            reply: None,
        }
    }

    /// Reports the verdict to the transport.
    pub fn settle(mut self, ack: Ack) {
        if let Some(reply) = self.reply.take() {
            // The transport may have given up on this delivery already.
            let _ = reply.send(ack);
        }
    }
}

#[derive(Debug, Default)]
struct Outstanding {
    count: AtomicUsize,
    idle: Notify,
}

impl Outstanding {
    fn begin(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn finish(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// In-process at-least-once bus.
///
/// Every message sent is delivered to the receiver returned by `new`. A
/// delivery settled with `Nack`, or dropped without a verdict, is redelivered
/// after the retry backoff; once `max_attempts` is used up the message goes to
/// the dead-letter sink.
#[derive(Clone)]
pub struct MemoryBus {
    sender: mpsc::Sender<Delivery>,
    retry: RetryConfig,
    dead_letters: Arc<dyn DeadLetterSink>,
    outstanding: Arc<Outstanding>,
}

impl MemoryBus {
    /// Creates a bus with the given channel capacity.
    pub fn new(
        capacity: usize,
        retry: RetryConfig,
        dead_letters: Arc<dyn DeadLetterSink>,
    ) -> (Self, mpsc::Receiver<Delivery>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                sender,
                retry,
                dead_letters,
                outstanding: Arc::new(Outstanding::default()),
            },
            receiver,
        )
    }

    /// Number of messages not yet acknowledged or dead-lettered.
    pub fn outstanding(&self) -> usize {
        self.outstanding.count.load(Ordering::SeqCst)
    }

    /// Waits until every message sent so far is acknowledged or
    /// dead-lettered.
    pub async fn settled(&self) {
        loop {
            let idle = self.outstanding.idle.notified();
            if self.outstanding() == 0 {
                return;
            }
            idle.await;
        }
    }

    async fn deliver(
        sender: mpsc::Sender<Delivery>,
        retry: RetryConfig,
        dead_letters: Arc<dyn DeadLetterSink>,
        message: SyncMessage,
    ) {
        for attempt in 0..retry.max_attempts {
            let delay = retry.delay_before_attempt(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let (delivery, verdict) = Delivery::new(message.clone(), attempt);
            if sender.send(delivery).await.is_err() {
                tracing::warn!(
                    entity_kind = %message.entity_kind,
                    entity_id = %message.entity_id,
                    "bus receiver closed; message lost"
                );
                return;
            }

            match verdict.await {
                Ok(Ack::Ack) => return,
                Ok(Ack::Nack) | Err(_) => {
                    tracing::debug!(
                        entity_kind = %message.entity_kind,
                        entity_id = %message.entity_id,
                        attempt,
                        "delivery not acknowledged"
                    );
                }
            }
        }

        let error = format!("not acknowledged after {} attempts", retry.max_attempts);
        dead_letters
            .dead_letter(DeadLetter::new(
                message,
                DeadLetterReason::RetriesExhausted,
                error,
            ))
            .await;
    }
}

#[async_trait]
impl MessageSink for MemoryBus {
    async fn send(&self, message: SyncMessage) -> SyncResult<()> {
        if self.sender.is_closed() {
            return Err(SyncError::Closed);
        }

        self.outstanding.begin();
        let sender = self.sender.clone();
        let retry = self.retry.clone();
        let dead_letters = Arc::clone(&self.dead_letters);
        let outstanding = Arc::clone(&self.outstanding);
        tokio::spawn(async move {
            Self::deliver(sender, retry, dead_letters, message).await;
            outstanding.finish();
        });
        Ok(())
    }
}
