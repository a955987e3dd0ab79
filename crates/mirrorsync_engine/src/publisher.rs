//! The change publisher.
//!
//! Code that writes an owned entity builds an [`EntityEvent`] and hands it to
//! [`ChangePublisher::publish`]. The publisher filters the event with the rule
//! registered for its kind, builds the snapshot synchronously, stamps it with a
//! monotonic clock and sends it. Notification trouble never fails the write
//! that triggered it.

use crate::transport::MessageSink;
use mirrorsync_protocol::{CrudAction, MonotonicClock, Snapshot, SyncMessage};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// A lifecycle event of an owned entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityEvent {
    /// Entity kind.
    pub kind: String,
    /// Entity id.
    pub entity_id: String,
    /// What happened.
    pub action: CrudAction,
    /// Entity state after the write (before it, for deletions).
    pub state: Snapshot,
    /// Whether the entity is test or seed data.
    pub is_test_data: bool,
}

impl EntityEvent {
    /// Creates an event.
    pub fn new(
        kind: impl Into<String>,
        entity_id: impl Into<String>,
        action: CrudAction,
        state: Snapshot,
    ) -> Self {
        Self {
            kind: kind.into(),
            entity_id: entity_id.into(),
            action,
            state,
            is_test_data: false,
        }
    }

    /// Creates a `Created` event.
    pub fn created(kind: impl Into<String>, entity_id: impl Into<String>, state: Snapshot) -> Self {
        Self::new(kind, entity_id, CrudAction::Created, state)
    }

    /// Creates an `Updated` event.
    pub fn updated(kind: impl Into<String>, entity_id: impl Into<String>, state: Snapshot) -> Self {
        Self::new(kind, entity_id, CrudAction::Updated, state)
    }

    /// Creates a `Deleted` event.
    pub fn deleted(kind: impl Into<String>, entity_id: impl Into<String>, state: Snapshot) -> Self {
        Self::new(kind, entity_id, CrudAction::Deleted, state)
    }

    /// Marks the event as test or seed data.
    pub fn with_test_data(mut self, is_test_data: bool) -> Self {
        self.is_test_data = is_test_data;
        self
    }
}

/// Publishing policy for one entity kind.
///
/// Both methods run inside the entity's write path and must not block.
pub trait PublishRule: Send + Sync {
    /// Entity kind this rule covers.
    fn kind(&self) -> &str;

    /// Returns true if the event should be published.
    ///
    /// Deletions are published whatever this returns.
    fn handle_when(&self, _event: &EntityEvent) -> bool {
        true
    }

    /// Builds the outbound snapshot from the event state.
    fn build_snapshot(&self, event: &EntityEvent) -> Snapshot {
        event.state.clone()
    }
}

/// A rule configured with data: an optional field whitelist for the outbound
/// snapshot and optional relevant-state checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRule {
    kind: String,
    fields: Option<Vec<String>>,
    relevant_states: BTreeMap<String, BTreeSet<String>>,
}

impl FieldRule {
    /// Publishes every event of `kind` with its full state.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            fields: None,
            relevant_states: BTreeMap::new(),
        }
    }

    /// Restricts the outbound snapshot to the given fields.
    pub fn with_fields<I, N>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Publishes only while `field` holds one of `values`.
    pub fn when_in_state<I, V>(mut self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.relevant_states
            .entry(field.into())
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    fn state_matches(state: Option<&Value>, allowed: &BTreeSet<String>) -> bool {
        match state {
            Some(Value::String(s)) => allowed.contains(s),
            Some(Value::Bool(b)) => allowed.contains(&b.to_string()),
            Some(Value::Number(n)) => allowed.contains(&n.to_string()),
            _ => false,
        }
    }
}

impl PublishRule for FieldRule {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn handle_when(&self, event: &EntityEvent) -> bool {
        self.relevant_states
            .iter()
            .all(|(field, allowed)| Self::state_matches(event.state.get(field), allowed))
    }

    fn build_snapshot(&self, event: &EntityEvent) -> Snapshot {
        match &self.fields {
            Some(fields) => event.state.project(fields.iter().map(String::as_str)),
            None => event.state.clone(),
        }
    }
}

/// Publisher settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherConfig {
    /// Drop events flagged as test or seed data.
    pub skip_test_data: bool,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            skip_test_data: true,
        }
    }
}

/// What happened to a published event.
#[derive(Debug, Clone, PartialEq)]
pub enum PublishOutcome {
    /// The message was handed to the sink.
    Published(SyncMessage),
    /// The event was test data or rejected by its rule.
    Filtered,
    /// No rule is registered for the event's kind.
    NoRule,
    /// The sink refused the message. The write that triggered the event is
    /// unaffected; reconciliation has to catch up.
    SendFailed(String),
}

impl PublishOutcome {
    /// Returns true if a message was handed to the sink.
    pub fn is_published(&self) -> bool {
        matches!(self, PublishOutcome::Published(_))
    }
}

/// Publisher counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublisherStats {
    /// Messages handed to the sink.
    pub published: u64,
    /// Events filtered out.
    pub filtered: u64,
    /// Events without a rule.
    pub unrouted: u64,
    /// Sends that failed.
    pub send_failures: u64,
}

/// Emits sync messages for lifecycle events of owned entities.
pub struct ChangePublisher<K: MessageSink> {
    rules: BTreeMap<String, Arc<dyn PublishRule>>,
    sink: Arc<K>,
    clock: MonotonicClock,
    config: PublisherConfig,
    stats: RwLock<PublisherStats>,
}

impl<K: MessageSink + 'static> ChangePublisher<K> {
    /// Creates a publisher with no rules.
    pub fn new(sink: Arc<K>) -> Self {
        Self::with_config(sink, PublisherConfig::default())
    }

    /// Creates a publisher with explicit settings.
    pub fn with_config(sink: Arc<K>, config: PublisherConfig) -> Self {
        Self {
            rules: BTreeMap::new(),
            sink,
            clock: MonotonicClock::new(),
            config,
            stats: RwLock::new(PublisherStats::default()),
        }
    }

    /// Adds a rule, builder style.
    pub fn with_rule(mut self, rule: impl PublishRule + 'static) -> Self {
        self.register(Arc::new(rule));
        self
    }

    /// Adds a rule, replacing any rule for the same kind.
    pub fn register(&mut self, rule: Arc<dyn PublishRule>) {
        self.rules.insert(rule.kind().to_string(), rule);
    }

    /// Returns the sink.
    pub fn sink(&self) -> &Arc<K> {
        &self.sink
    }

    /// Returns a copy of the counters.
    pub fn stats(&self) -> PublisherStats {
        self.stats.read().clone()
    }

    /// Applies the filters and builds the message, without sending it.
    pub fn build_message(&self, event: &EntityEvent) -> Result<SyncMessage, PublishOutcome> {
        if self.config.skip_test_data && event.is_test_data {
            return Err(PublishOutcome::Filtered);
        }
        let rule = self.rules.get(&event.kind).ok_or(PublishOutcome::NoRule)?;
        if !event.action.is_deletion() && !rule.handle_when(event) {
            return Err(PublishOutcome::Filtered);
        }

        Ok(SyncMessage::new(
            event.kind.clone(),
            event.entity_id.clone(),
            event.action,
            rule.build_snapshot(event),
            self.clock.now(),
        ))
    }

    /// Publishes one event. Never fails.
    pub async fn publish(&self, event: EntityEvent) -> PublishOutcome {
        match self.build_message(&event) {
            Ok(message) => self.send(message).await,
            Err(outcome) => {
                self.record_skipped(&event, &outcome);
                outcome
            }
        }
    }

    /// Builds the message in the caller's task and sends it in the background.
    ///
    /// Returns the message that will be sent, if any.
    pub fn spawn_publish(self: &Arc<Self>, event: EntityEvent) -> Option<SyncMessage> {
        match self.build_message(&event) {
            Ok(message) => {
                let publisher = Arc::clone(self);
                let outbound = message.clone();
                tokio::spawn(async move {
                    publisher.send(outbound).await;
                });
                Some(message)
            }
            Err(outcome) => {
                self.record_skipped(&event, &outcome);
                None
            }
        }
    }

    /// Re-emits the current state of entities as force-sync messages.
    ///
    /// Used by reconciliation jobs to repair mirrors that missed organic
    /// messages. Filters still apply; test data is never resynced.
    pub async fn resync<I>(&self, events: I) -> Vec<PublishOutcome>
    where
        I: IntoIterator<Item = EntityEvent>,
    {
        let mut outcomes = Vec::new();
        for event in events {
            let outcome = match self.build_message(&event) {
                Ok(message) => self.send(message.with_force_sync(true)).await,
                Err(outcome) => {
                    self.record_skipped(&event, &outcome);
                    outcome
                }
            };
            outcomes.push(outcome);
        }
        tracing::info!(
            published = outcomes.iter().filter(|o| o.is_published()).count(),
            total = outcomes.len(),
            "resync finished"
        );
        outcomes
    }

    async fn send(&self, message: SyncMessage) -> PublishOutcome {
        match self.sink.send(message.clone()).await {
            Ok(()) => {
                self.stats.write().published += 1;
                tracing::debug!(
                    entity_kind = %message.entity_kind,
                    entity_id = %message.entity_id,
                    action = %message.crud_action,
                    emitted_at = %message.emitted_at,
                    force_sync = message.is_force_sync,
                    "message published"
                );
                PublishOutcome::Published(message)
            }
            Err(err) => {
                self.stats.write().send_failures += 1;
                tracing::warn!(
                    entity_kind = %message.entity_kind,
                    entity_id = %message.entity_id,
                    error = %err,
                    "failed to publish message"
                );
                PublishOutcome::SendFailed(err.to_string())
            }
        }
    }

    fn record_skipped(&self, event: &EntityEvent, outcome: &PublishOutcome) {
        let mut stats = self.stats.write();
        match outcome {
            PublishOutcome::NoRule => {
                stats.unrouted += 1;
                tracing::trace!(entity_kind = %event.kind, "no publish rule");
            }
            _ => {
                stats.filtered += 1;
                tracing::trace!(
                    entity_kind = %event.kind,
                    entity_id = %event.entity_id,
                    "event filtered"
                );
            }
        }
    }
}
