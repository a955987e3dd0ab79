//! The consumer dispatch loop.
//!
//! Each inbound message moves through a small state machine:
//!
//! ```text
//! Received -> Filtered
//!          -> Eligible -> DependenciesTimedOut
//!                      -> DependenciesSatisfied -> Applied
//!                                               -> Failed
//! ```
//!
//! Dispatch is idempotent. Replaying a message after a crash converges on the
//! same mirror state because the resolver compares stamps; no delivery-level
//! deduplication is involved.

use crate::config::ConsumerConfig;
use crate::dead_letter::{DeadLetter, DeadLetterReason, DeadLetterSink, LogDeadLetters};
use crate::dependency::{DependencyProbe, StoreProbe};
use crate::error::{SyncError, SyncResult};
use crate::registry::{HandlerRegistry, MirrorHandler};
use crate::resolver::{resolve, ChangeKind, Resolution};
use crate::store::{MirrorStore, UpsertOutcome};
use crate::transport::{Ack, Delivery};
use crate::wait::try_wait_until;
use mirrorsync_protocol::{EntityKey, SyncMessage};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::Instant;

/// Processing states of a single message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    /// Just handed to the consumer.
    Received,
    /// Not relevant to this subscriber; discarded without side effects.
    Filtered,
    /// Relevant; dependencies not yet checked.
    Eligible,
    /// All dependencies exist locally.
    DependenciesSatisfied,
    /// A dependency did not arrive within the wait budget.
    DependenciesTimedOut,
    /// Merge finished (including stale and no-op merges).
    Applied,
    /// Permanent failure; the message was dead-lettered.
    Failed,
}

/// Terminal result of dispatching one message.
///
/// Every variant is acknowledged. Transient failures are returned as `Err`
/// instead, so the transport redelivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Unknown kind or rejected by the handler filter.
    Filtered,
    /// The mirror changed.
    Applied(ChangeKind),
    /// The mirror already held this or a newer version.
    Stale,
    /// Deletion of an entity that was never mirrored. Only a tombstone is
    /// stored.
    NoOp,
    /// Organic message dropped after waiting for a dependency.
    Dropped {
        /// The dependency that never arrived.
        missing: EntityKey,
    },
    /// Force-sync message escalated after waiting for a dependency.
    Escalated {
        /// The dependency that never arrived.
        missing: EntityKey,
    },
    /// Set aside for an operator.
    DeadLettered(DeadLetterReason),
}

impl DispatchOutcome {
    /// Returns the terminal state this outcome corresponds to.
    pub fn state(&self) -> MessageState {
        match self {
            DispatchOutcome::Filtered => MessageState::Filtered,
            DispatchOutcome::Applied(_) | DispatchOutcome::Stale | DispatchOutcome::NoOp => {
                MessageState::Applied
            }
            DispatchOutcome::Dropped { .. } | DispatchOutcome::Escalated { .. } => {
                MessageState::DependenciesTimedOut
            }
            DispatchOutcome::DeadLettered(_) => MessageState::Failed,
        }
    }

    /// Returns true if the mirror was written.
    pub fn is_applied(&self) -> bool {
        matches!(self, DispatchOutcome::Applied(_))
    }
}

/// Counters kept by a consumer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    /// Messages handed to `dispatch`.
    pub received: u64,
    /// Messages filtered out.
    pub filtered: u64,
    /// Messages that changed the mirror.
    pub applied: u64,
    /// Stale or duplicate messages.
    pub stale: u64,
    /// Deletions of never-mirrored entities.
    pub noop: u64,
    /// Organic messages dropped on dependency timeout.
    pub dropped: u64,
    /// Force-sync messages escalated on dependency timeout.
    pub escalated: u64,
    /// Messages dead-lettered for permanent failures.
    pub dead_lettered: u64,
    /// Transient failures handed back for redelivery.
    pub transient_failures: u64,
    /// Last error message.
    pub last_error: Option<String>,
}

enum Dependencies {
    Satisfied,
    TimedOut { missing: EntityKey, waited: Duration },
}

/// Applies inbound sync messages to the local mirror.
pub struct Consumer<S: MirrorStore> {
    config: ConsumerConfig,
    registry: HandlerRegistry,
    store: Arc<S>,
    probe: Arc<dyn DependencyProbe>,
    dead_letters: Arc<dyn DeadLetterSink>,
    stats: RwLock<ConsumerStats>,
}

impl<S: MirrorStore + 'static> Consumer<S> {
    /// Creates a consumer whose dependencies are checked against `store` and
    /// whose dead letters are logged.
    pub fn new(config: ConsumerConfig, registry: HandlerRegistry, store: Arc<S>) -> Self {
        let probe: Arc<dyn DependencyProbe> = Arc::new(StoreProbe::new(Arc::clone(&store)));
        Self {
            config,
            registry,
            store,
            probe,
            dead_letters: Arc::new(LogDeadLetters),
            stats: RwLock::new(ConsumerStats::default()),
        }
    }

    /// Replaces the dependency probe.
    pub fn with_probe(mut self, probe: Arc<dyn DependencyProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Replaces the dead-letter sink.
    pub fn with_dead_letters(mut self, sink: Arc<dyn DeadLetterSink>) -> Self {
        self.dead_letters = sink;
        self
    }

    /// Returns the mirror store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Returns the handler table.
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Returns a copy of the counters.
    pub fn stats(&self) -> ConsumerStats {
        self.stats.read().clone()
    }

    /// Processes one message.
    ///
    /// Returns `Err` only for transient failures that the transport should
    /// redeliver. Everything else, including permanent failures, is reported
    /// as an acknowledged `DispatchOutcome`.
    pub async fn dispatch(&self, message: SyncMessage) -> SyncResult<DispatchOutcome> {
        self.stats.write().received += 1;
        tracing::debug!(
            entity_kind = %message.entity_kind,
            entity_id = %message.entity_id,
            action = %message.crud_action,
            emitted_at = %message.emitted_at,
            force_sync = message.is_force_sync,
            "message received"
        );

        let handler = match self.registry.get(&message.entity_kind) {
            Some(handler) if handler.accepts(&message) => handler,
            _ => {
                self.stats.write().filtered += 1;
                tracing::debug!(
                    entity_kind = %message.entity_kind,
                    entity_id = %message.entity_id,
                    "message filtered"
                );
                return Ok(DispatchOutcome::Filtered);
            }
        };

        match self.await_dependencies(handler, &message).await {
            Ok(Dependencies::Satisfied) => {}
            Ok(Dependencies::TimedOut { missing, waited }) => {
                return Ok(self.on_dependency_timeout(message, missing, waited).await);
            }
            Err(err) => return self.on_failure(message, err).await,
        }

        match self.apply(handler, &message).await {
            Ok(outcome) => {
                self.record_applied(&outcome);
                Ok(outcome)
            }
            Err(err) => self.on_failure(message, err).await,
        }
    }

    /// Dispatches deliveries until the channel closes, running up to
    /// `max_concurrency` messages at once.
    ///
    /// Each delivery is settled with `Ack` unless dispatch returned a
    /// transient error.
    pub async fn run(self: Arc<Self>, mut deliveries: mpsc::Receiver<Delivery>) {
        let limit = self.config.max_concurrency.max(1);
        let permits = Arc::new(Semaphore::new(limit));

        while let Some(delivery) = deliveries.recv().await {
            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                break;
            };
            let consumer = Arc::clone(&self);
            tokio::spawn(async move {
                let result = consumer.dispatch(delivery.message.clone()).await;
                delivery.settle(Ack::from_result(&result));
                drop(permit);
            });
        }

        // Wait for in-flight messages before returning.
        let all = u32::try_from(limit).unwrap_or(u32::MAX);
        let _ = permits.acquire_many(all).await;
    }

    async fn await_dependencies(
        &self,
        handler: &MirrorHandler,
        message: &SyncMessage,
    ) -> SyncResult<Dependencies> {
        // Deletions never wait, whether explicit or carried as the soft-delete
        // flag: the dependency may itself be deleted by now.
        if message.crud_action.is_deletion()
            || handler.schema().is_soft_deleted(&message.snapshot)
            || handler.requirements().is_empty()
        {
            return Ok(Dependencies::Satisfied);
        }

        // A malformed snapshot cannot succeed after waiting either.
        handler
            .schema()
            .check(&message.snapshot, true)
            .into_result()
            .map_err(|reasons| {
                SyncError::malformed(&message.entity_kind, &message.entity_id, reasons)
            })?;

        let mut keys = Vec::with_capacity(handler.requirements().len());
        let mut problems = Vec::new();
        for requirement in handler.requirements() {
            match requirement.reference(&message.snapshot) {
                Ok(Some(key)) => keys.push(key),
                Ok(None) => {}
                Err(reason) => problems.push(reason),
            }
        }
        if !problems.is_empty() {
            return Err(SyncError::malformed(
                &message.entity_kind,
                &message.entity_id,
                problems,
            ));
        }

        let budget = self.config.wait.max_wait_for(message.is_force_sync);
        let start = Instant::now();
        let deadline = start + budget;

        for key in keys {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let probe = &self.probe;
            let outcome = try_wait_until(
                || probe.exists(&key),
                remaining,
                &self.config.wait.backoff,
            )
            .await?;

            if !outcome.found {
                return Ok(Dependencies::TimedOut {
                    missing: key,
                    waited: start.elapsed(),
                });
            }
            tracing::trace!(
                dependency = %key,
                probes = outcome.probes,
                "dependency present"
            );
        }

        Ok(Dependencies::Satisfied)
    }

    async fn apply(
        &self,
        handler: &MirrorHandler,
        message: &SyncMessage,
    ) -> SyncResult<DispatchOutcome> {
        let current = self.store.load(&message.key()).await?;

        match resolve(message, current.as_ref(), handler.schema())? {
            Resolution::Tombstone { record } => {
                match self.store.upsert_if_newer(record).await? {
                    UpsertOutcome::Stale { .. } => Ok(DispatchOutcome::Stale),
                    _ => Ok(DispatchOutcome::NoOp),
                }
            }
            Resolution::Stale { .. } => Ok(DispatchOutcome::Stale),
            Resolution::Write { record, change } => {
                match self.store.upsert_if_newer(record).await? {
                    UpsertOutcome::Inserted | UpsertOutcome::Replaced => {
                        Ok(DispatchOutcome::Applied(change))
                    }
                    // A newer message landed between our read and our write.
                    UpsertOutcome::Stale { .. } => Ok(DispatchOutcome::Stale),
                }
            }
        }
    }

    fn record_applied(&self, outcome: &DispatchOutcome) {
        let mut stats = self.stats.write();
        match outcome {
            DispatchOutcome::Applied(change) => {
                stats.applied += 1;
                tracing::debug!(?change, "mirror updated");
            }
            DispatchOutcome::Stale => {
                stats.stale += 1;
                tracing::debug!("stale message discarded");
            }
            DispatchOutcome::NoOp => stats.noop += 1,
            _ => {}
        }
    }

    async fn on_dependency_timeout(
        &self,
        message: SyncMessage,
        missing: EntityKey,
        waited: Duration,
    ) -> DispatchOutcome {
        if !message.is_force_sync {
            self.stats.write().dropped += 1;
            tracing::warn!(
                entity_kind = %message.entity_kind,
                entity_id = %message.entity_id,
                dependency = %missing,
                ?waited,
                "dependency missing; dropping organic message"
            );
            return DispatchOutcome::Dropped { missing };
        }

        let error = SyncError::DependencyTimeout {
            kind: message.entity_kind.clone(),
            entity_id: message.entity_id.clone(),
            missing: missing.to_string(),
            waited,
        };
        {
            let mut stats = self.stats.write();
            stats.escalated += 1;
            stats.last_error = Some(error.to_string());
        }
        tracing::error!(
            entity_kind = %message.entity_kind,
            entity_id = %message.entity_id,
            dependency = %missing,
            ?waited,
            "dependency missing for force-sync message"
        );
        self.dead_letters
            .dead_letter(DeadLetter::new(
                message,
                DeadLetterReason::DependencyTimeout,
                error.to_string(),
            ))
            .await;
        DispatchOutcome::Escalated { missing }
    }

    async fn on_failure(
        &self,
        message: SyncMessage,
        error: SyncError,
    ) -> SyncResult<DispatchOutcome> {
        if error.is_retryable() {
            {
                let mut stats = self.stats.write();
                stats.transient_failures += 1;
                stats.last_error = Some(error.to_string());
            }
            tracing::warn!(
                entity_kind = %message.entity_kind,
                entity_id = %message.entity_id,
                error = %error,
                "transient failure; leaving message unacknowledged"
            );
            return Err(error);
        }

        let reason = match error {
            SyncError::MalformedSnapshot { .. } | SyncError::Protocol(_) => {
                DeadLetterReason::MalformedSnapshot
            }
            SyncError::DependencyTimeout { .. } => DeadLetterReason::DependencyTimeout,
            _ => DeadLetterReason::PermanentFailure,
        };
        {
            let mut stats = self.stats.write();
            stats.dead_lettered += 1;
            stats.last_error = Some(error.to_string());
        }
        tracing::error!(
            entity_kind = %message.entity_kind,
            entity_id = %message.entity_id,
            error = %error,
            %reason,
            "permanent failure"
        );
        self.dead_letters
            .dead_letter(DeadLetter::new(message, reason, error.to_string()))
            .await;
        Ok(DispatchOutcome::DeadLettered(reason))
    }
}
