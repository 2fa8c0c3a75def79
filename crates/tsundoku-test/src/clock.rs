//! Wall clock driven by tokio time
//!
//! Under `#[tokio::test(start_paused = true)]` every `sleep` advances this
//! clock too, so cooldown deadlines and dispatcher backoff share one
//! timeline.

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use tsundoku_core::{add_duration, Clock};

#[derive(Debug)]
pub struct TokioClock {
    origin: DateTime<Utc>,
    start: Instant,
}

impl TokioClock {
    /// Must be created inside the runtime whose time it follows
    pub fn new(origin: DateTime<Utc>) -> Self {
        TokioClock {
            origin,
            start: Instant::now(),
        }
    }

    /// Starts at `harness_epoch()`
    pub fn at_epoch() -> Self {
        Self::new(harness_epoch())
    }
}

/// 2024-01-01T00:00:00Z
pub fn harness_epoch() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(1_704_067_200, 0).unwrap_or_default()
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        add_duration(self.origin, self.start.elapsed())
    }
}
