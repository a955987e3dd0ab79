//! # MirrorSync Engine
//!
//! Publisher and consumer for cross-service entity mirrors.
//!
//! This crate provides:
//! - Dependency wait with exponential backoff
//! - Last-writer-wins merge into mirror records
//! - Consumer dispatch loop with soft-delete and dead-letter handling
//! - Change publisher with filter rules
//! - In-memory store, bus and dead-letter queue
//!
//! ## Architecture
//!
//! The owning service publishes a [`SyncMessage`](mirrorsync_protocol::SyncMessage)
//! for every relevant lifecycle event. The transport delivers it at least
//! once, in no particular order, to each subscribing service, where a
//! [`Consumer`]:
//! 1. Filters out kinds and messages it does not mirror
//! 2. Waits for referenced entities to arrive locally
//! 3. Merges the snapshot into the mirror if it is newer
//!
//! ## Key Invariants
//!
//! - The message with the greatest `emitted_at` always wins
//! - Equal stamps are duplicates
//! - Mirror records are never physically deleted
//! - Dispatch is idempotent under redelivery
//! - Publishing never fails the write that triggered it

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod consumer;
mod dead_letter;
mod dependency;
mod error;
mod publisher;
mod registry;
mod resolver;
mod schema;
mod store;
mod transport;
mod wait;

pub use config::{BackoffConfig, ConsumerConfig, RetryConfig, WaitConfig};
pub use consumer::{Consumer, ConsumerStats, DispatchOutcome, MessageState};
pub use dead_letter::{DeadLetter, DeadLetterReason, DeadLetterSink, LogDeadLetters, MemoryDeadLetters};
pub use dependency::{DependencyProbe, DependencyRequirement, FnProbe, StoreProbe};
pub use error::{SyncError, SyncResult};
pub use publisher::{
    ChangePublisher, EntityEvent, FieldRule, PublishOutcome, PublishRule, PublisherConfig,
    PublisherStats,
};
pub use registry::{HandleWhen, HandlerRegistry, MirrorHandler};
pub use resolver::{resolve, ChangeKind, Resolution};
pub use schema::{FieldSpec, MirrorSchema};
pub use store::{MemoryMirrorStore, MirrorRecord, MirrorStore, UpsertOutcome};
pub use transport::{Ack, Delivery, MemoryBus, MessageSink};
pub use wait::{try_wait_until, wait_until, WaitOutcome};
