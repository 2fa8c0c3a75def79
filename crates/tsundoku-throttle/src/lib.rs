//! Tsundoku Throttle - protecting outbound calls from external rate limits
//!
//! - Throttle signature classification of call outcomes
//! - Process-wide cooldown gate with a persisted audit trail
//! - Retry/backoff dispatcher that defers to the gate
//! - Startup admission over a rolling window
//! - Lifecycle planning for the host (proceed / sleep then retry / exit)
//!
//! All shared state lives in one `ThrottleContext` built by the host.

pub mod admission;
pub mod context;
pub mod cooldown;
pub mod dispatch;
pub mod egress;
pub mod lifecycle;
pub mod signature;

pub use admission::*;
pub use context::*;
pub use cooldown::*;
pub use dispatch::*;
pub use egress::*;
pub use lifecycle::*;
pub use signature::*;
