//! Replay command implementation.
//!
//! Feeds a message file through an in-memory bus into a consumer configured
//! from a subscriber config, then prints the resulting mirror.

use super::{read_messages, MessageLine};
use crate::config::SubscriberConfig;
use mirrorsync_engine::{
    Consumer, ConsumerConfig, ConsumerStats, HandlerRegistry, MemoryBus, MemoryDeadLetters,
    MemoryMirrorStore, MessageSink, MirrorStore, RetryConfig,
};
use mirrorsync_protocol::{Snapshot, Timestamp};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Replay options.
#[derive(Debug, Clone, Default)]
pub struct ReplayOptions {
    /// Include soft-deleted records in the output.
    pub include_deleted: bool,
    /// Settle each message before sending the next, in file order.
    pub sequential: bool,
    /// Override for the organic wait budget.
    pub organic_wait: Option<Duration>,
    /// Override for the force-sync wait budget.
    pub force_sync_wait: Option<Duration>,
}

/// One mirror record in the report.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordView {
    /// Entity kind.
    pub entity_kind: String,
    /// Source entity id.
    pub source_entity_id: String,
    /// Stamp of the last applied message.
    pub last_synced_at: Timestamp,
    /// Soft-delete marker.
    pub is_deleted: bool,
    /// Mirrored fields.
    pub fields: Snapshot,
}

/// One dead letter in the report.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterView {
    /// Entity kind.
    pub entity_kind: String,
    /// Source entity id.
    pub entity_id: String,
    /// Stamp of the message.
    pub emitted_at: Timestamp,
    /// Classification.
    pub reason: String,
    /// Error text.
    pub error: String,
}

/// Consumer counters in the report.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsView {
    /// Messages read from the file.
    pub lines: usize,
    /// Lines that could not be decoded.
    pub undecodable: usize,
    /// Messages dispatched.
    pub received: u64,
    /// Messages filtered out.
    pub filtered: u64,
    /// Messages that changed the mirror.
    pub applied: u64,
    /// Stale or duplicate messages.
    pub stale: u64,
    /// Organic messages dropped on dependency timeout.
    pub dropped: u64,
    /// Force-sync messages escalated on dependency timeout.
    pub escalated: u64,
    /// Messages dead-lettered.
    pub dead_lettered: u64,
    /// Transient failures.
    pub transient_failures: u64,
}

impl StatsView {
    fn from_stats(lines: usize, undecodable: usize, stats: &ConsumerStats) -> Self {
        Self {
            lines,
            undecodable,
            received: stats.received,
            filtered: stats.filtered,
            applied: stats.applied,
            stale: stats.stale,
            dropped: stats.dropped,
            escalated: stats.escalated,
            dead_lettered: stats.dead_lettered,
            transient_failures: stats.transient_failures,
        }
    }
}

/// Replay result.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayReport {
    /// Mirror contents after the replay.
    pub records: Vec<RecordView>,
    /// Messages set aside.
    pub dead_letters: Vec<DeadLetterView>,
    /// Counters.
    pub stats: StatsView,
}

/// Runs the replay command.
pub fn run(
    input: &Path,
    config_path: &Path,
    options: &ReplayOptions,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = SubscriberConfig::load(config_path)?;
    let lines = read_messages(input)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let report = runtime.block_on(replay(lines, &config, options))?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => {
            print_text_output(&report);
        }
    }

    Ok(())
}

/// Replays decoded lines and collects the report.
pub async fn replay(
    lines: Vec<MessageLine>,
    config: &SubscriberConfig,
    options: &ReplayOptions,
) -> Result<ReplayReport, Box<dyn std::error::Error>> {
    let registry = config.registry();
    let consumer_config = apply_overrides(config.consumer_config(), options);

    let total = lines.len();
    let mut messages = Vec::with_capacity(total);
    for line in lines {
        match line.message {
            Ok(message) => messages.push(message),
            Err(err) => tracing::warn!(line = line.line, error = %err, "skipping line"),
        }
    }
    let undecodable = total - messages.len();

    let dead = Arc::new(MemoryDeadLetters::new());
    let (bus, deliveries) = MemoryBus::new(256, RetryConfig::default(), dead.clone());
    let store = Arc::new(MemoryMirrorStore::new());
    let consumer = Arc::new(
        Consumer::new(consumer_config, registry.clone(), Arc::clone(&store))
            .with_dead_letters(dead.clone()),
    );
    let running = tokio::spawn(Arc::clone(&consumer).run(deliveries));

    for message in messages {
        bus.send(message).await?;
        if options.sequential {
            bus.settled().await;
        }
    }
    bus.settled().await;
    drop(bus);
    running.await?;

    let records = collect_records(store.as_ref(), &registry, options.include_deleted).await?;
    let dead_letters = dead
        .drain()
        .into_iter()
        .map(|letter| DeadLetterView {
            entity_kind: letter.message.entity_kind,
            entity_id: letter.message.entity_id,
            emitted_at: letter.message.emitted_at,
            reason: letter.reason.to_string(),
            error: letter.error,
        })
        .collect();

    Ok(ReplayReport {
        records,
        dead_letters,
        stats: StatsView::from_stats(total, undecodable, &consumer.stats()),
    })
}

fn apply_overrides(mut config: ConsumerConfig, options: &ReplayOptions) -> ConsumerConfig {
    if let Some(wait) = options.organic_wait {
        config.wait.organic_max_wait = wait;
    }
    if let Some(wait) = options.force_sync_wait {
        config.wait.force_sync_max_wait = wait;
    }
    config
}

async fn collect_records(
    store: &MemoryMirrorStore,
    registry: &HandlerRegistry,
    include_deleted: bool,
) -> Result<Vec<RecordView>, Box<dyn std::error::Error>> {
    let mut records = Vec::new();
    for kind in registry.kinds() {
        for record in store.list(kind, include_deleted).await? {
            records.push(RecordView {
                entity_kind: record.entity_kind,
                source_entity_id: record.source_entity_id,
                last_synced_at: record.last_synced_at,
                is_deleted: record.is_deleted,
                fields: record.fields,
            });
        }
    }
    Ok(records)
}

fn print_text_output(report: &ReplayReport) {
    println!("Mirror ({} records)", report.records.len());
    for record in &report.records {
        let marker = if record.is_deleted { " [deleted]" } else { "" };
        let fields = serde_json::to_string(&record.fields).unwrap_or_default();
        println!(
            "  {}/{} @ {}{}  {}",
            record.entity_kind, record.source_entity_id, record.last_synced_at, marker, fields
        );
    }

    if !report.dead_letters.is_empty() {
        println!();
        println!("Dead letters ({})", report.dead_letters.len());
        for letter in &report.dead_letters {
            println!(
                "  {}/{} @ {}  {}: {}",
                letter.entity_kind, letter.entity_id, letter.emitted_at, letter.reason, letter.error
            );
        }
    }

    let stats = &report.stats;
    println!();
    println!("Lines:        {}", stats.lines);
    println!("Undecodable:  {}", stats.undecodable);
    println!("Applied:      {}", stats.applied);
    println!("Stale:        {}", stats.stale);
    println!("Filtered:     {}", stats.filtered);
    println!("Dropped:      {}", stats.dropped);
    println!("Escalated:    {}", stats.escalated);
    println!("Dead-letters: {}", stats.dead_lettered);
}
