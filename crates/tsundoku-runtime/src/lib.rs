//! Tsundoku Runtime - order intake on top of the ISBN engine and throttle
//!
//! - Configuration from `TSUNDOKU_*` environment variables
//! - Tracing subscriber setup
//! - Collaborator traits (lookup, spreadsheet, chat) and local adapters
//! - The batch pipeline: one message in, rows appended, one reply out
//! - `Runtime`, which wires everything into a `ThrottleContext`

pub mod batch;
pub mod collaborators;
pub mod config;
pub mod host;
pub mod logging;
pub mod runtime;

pub use batch::*;
pub use collaborators::*;
pub use config::*;
pub use host::*;
pub use logging::*;
pub use runtime::*;
