//! # MirrorSync Protocol
//!
//! Wire types and codecs for cross-service entity synchronization.
//!
//! This crate provides:
//! - `SyncMessage`, the unit of cross-service communication
//! - `CrudAction` and `EntityKey`
//! - `Snapshot`, the publisher-owned field set of an entity
//! - `Timestamp` and `MonotonicClock` for last-writer-wins ordering
//! - `Validation`, a plain tagged result for accumulating check failures
//! - CBOR and JSON encoding/decoding
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod message;
mod snapshot;
mod timestamp;
mod validation;

pub use error::{ProtocolError, ProtocolResult};
pub use message::{CrudAction, EntityKey, SyncMessage};
pub use snapshot::Snapshot;
pub use timestamp::{MonotonicClock, Timestamp};
pub use validation::Validation;
