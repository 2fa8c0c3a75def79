//! Tsundoku Test Harness - deterministic end-to-end testing
//!
//! This crate provides:
//! - Scripted collaborators (lookup, sheet, chat) with failure queues
//! - Stores that fail on purpose
//! - A wall clock driven by tokio's (pausable) time
//! - Seeded chaos lookups
//! - A harness wiring all of the above into a `Runtime`
//! - End-to-end scenarios

pub mod chaos;
pub mod clock;
pub mod harness;
pub mod integration;
pub mod scripted;
pub mod stores;

pub use chaos::*;
pub use clock::*;
pub use harness::*;
pub use scripted::*;
pub use stores::*;
