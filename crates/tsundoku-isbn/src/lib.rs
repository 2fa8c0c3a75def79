//! Tsundoku ISBN Engine - identifier grammar, checksums and repair
//!
//! This crate implements the pure half of the pipeline:
//! - Candidate extraction from free text (one documented grammar)
//! - ISBN-10 / ISBN-13 checksum validation and conversion
//! - Canonicalization with an ordered list of repair rules
//! - Per-batch deduplication on the canonical long form
//!
//! Everything here is stateless and safe to call from any thread.

pub mod canonical;
pub mod checksum;
pub mod dedup;
pub mod grammar;
pub mod isbn;

pub use canonical::*;
pub use checksum::*;
pub use dedup::*;
pub use grammar::*;
pub use isbn::*;
