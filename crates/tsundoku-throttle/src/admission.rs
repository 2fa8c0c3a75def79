//! Startup admission
//!
//! A persisted counter caps how many process starts are allowed inside a
//! rolling window. Crash loops that reconnect on every start are what
//! trip global throttles, so the counter is written before any network
//! activity.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tsundoku_core::{add_duration, elapsed_between, load_json, save_json, Clock, KeyValueStore};

/// Store key of the startup record
pub const STARTUP_RECORD_KEY: &str = "startup/record";

/// Admission configuration
#[derive(Clone, Debug)]
pub struct AdmissionConfig {
    /// Starts allowed per window
    pub ceiling: u32,
    pub window: Duration,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        AdmissionConfig {
            ceiling: 10,
            window: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Persisted startup counter
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartupRecord {
    pub window_start: DateTime<Utc>,
    pub attempts_in_window: u32,
}

/// Admission decision
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    /// Attempt number inside the current window, 1-based
    pub attempt: u32,
    /// Time until the window rolls over
    pub window_remaining: Duration,
}

/// Startup admission controller
#[derive(Clone, Debug, Default)]
pub struct AdmissionController {
    config: AdmissionConfig,
}

impl AdmissionController {
    pub fn new(config: AdmissionConfig) -> Self {
        AdmissionController { config }
    }

    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    /// Count this start and decide whether it may proceed
    ///
    /// An unreadable record is treated as a first startup; a failed write is
    /// logged and the decision still stands.
    pub fn admit(&self, clock: &dyn Clock, store: &dyn KeyValueStore) -> Admission {
        let now = clock.now();
        let previous = match load_json::<StartupRecord>(store, STARTUP_RECORD_KEY) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(error = %e, "could not read startup record, treating as first start");
                None
            }
        };

        let record = match previous {
            Some(r) if now >= r.window_start && elapsed_between(r.window_start, now) < self.config.window => {
                StartupRecord {
                    window_start: r.window_start,
                    attempts_in_window: r.attempts_in_window.saturating_add(1),
                }
            }
            _ => StartupRecord {
                window_start: now,
                attempts_in_window: 1,
            },
        };

        if let Err(e) = save_json(store, STARTUP_RECORD_KEY, &record) {
            tracing::error!(error = %e, "failed to persist startup record");
        }

        let window_end = add_duration(record.window_start, self.config.window);
        let admission = Admission {
            allowed: record.attempts_in_window <= self.config.ceiling,
            attempt: record.attempts_in_window,
            window_remaining: elapsed_between(now, window_end),
        };

        if admission.allowed {
            tracing::info!(
                attempt = admission.attempt,
                ceiling = self.config.ceiling,
                "startup admitted"
            );
        } else {
            tracing::error!(
                attempt = admission.attempt,
                ceiling = self.config.ceiling,
                wait_secs = admission.window_remaining.as_secs(),
                "startup ceiling exceeded, refusing to connect"
            );
        }
        admission
    }
}
