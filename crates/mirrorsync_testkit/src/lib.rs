//! # MirrorSync Testkit
//!
//! Test utilities for MirrorSync.
//!
//! This crate provides:
//! - Snapshot and timestamp fixtures for the company/employee test domain
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mirrorsync_testkit::prelude::*;
//!
//! let msg = SyncMessage::created("company", "c-1", company_snapshot("Acme"), t(1));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use mirrorsync_protocol::{CrudAction, Snapshot, SyncMessage, Timestamp};
}

pub use fixtures::*;
pub use generators::*;
