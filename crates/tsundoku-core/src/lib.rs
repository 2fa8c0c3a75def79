//! Tsundoku Core - Fundamental types and primitives
//!
//! This crate defines the types shared by every other Tsundoku crate:
//! - Error taxonomy (InvalidFormat, Throttled, Transient, Persistence)
//! - Wall clocks (system and manual)
//! - Outbound call outcomes
//! - Durable key-value storage

pub mod clock;
pub mod error;
pub mod outcome;
pub mod store;

pub use clock::*;
pub use error::*;
pub use outcome::*;
pub use store::*;
