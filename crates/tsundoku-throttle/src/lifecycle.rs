//! Connection lifecycle planning
//!
//! The host never decides on its own when to (re)connect. It asks the
//! planner and obeys a `HostDirective`:
//!
//! ```text
//! startup()            not admitted      -> SleepThenExit(window remaining)
//!                      otherwise         -> before_connect()
//! before_connect()     cooling down      -> SleepThenRetry(cooldown remaining)
//!                      wary, pad owed    -> SleepThenRetry(pad)
//!                      otherwise         -> Proceed
//! on_connect_failure() throttle          -> SleepThenExit(cooldown)
//!                      bucket hint       -> SleepThenRetry(hint)
//!                      anything else     -> SleepThenExit(fatal backoff)
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tsundoku_core::CallOutcome;

use crate::admission::{AdmissionConfig, AdmissionController};
use crate::context::ThrottleContext;
use crate::signature::{classify, Verdict};

/// Instruction for the host process
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostDirective {
    Proceed,
    SleepThenExit(Duration),
    SleepThenRetry(Duration),
}

/// Lifecycle configuration
#[derive(Clone, Debug)]
pub struct LifecycleConfig {
    /// Pause before the first connection attempt
    pub startup_pause: Duration,
    /// Sleep before exiting after a non-throttle connection failure
    pub fatal_backoff: Duration,
    /// Longest bucket hint honored on a connection failure
    pub max_bucket_wait: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        LifecycleConfig {
            startup_pause: Duration::from_secs(10),
            fatal_backoff: Duration::from_secs(60 * 60),
            max_bucket_wait: Duration::from_secs(60),
        }
    }
}

/// Decides when the host may connect
pub struct LifecyclePlanner {
    ctx: Arc<ThrottleContext>,
    admission: AdmissionController,
    config: LifecycleConfig,
    /// Wary pad already served for the pending attempt
    padded: AtomicBool,
}

impl LifecyclePlanner {
    pub fn new(
        ctx: Arc<ThrottleContext>,
        admission: AdmissionConfig,
        config: LifecycleConfig,
    ) -> Self {
        LifecyclePlanner {
            ctx,
            admission: AdmissionController::new(admission),
            config,
            padded: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn context(&self) -> &Arc<ThrottleContext> {
        &self.ctx
    }

    /// Once per process: count the start and resume any persisted cooldown
    pub fn startup(&self) -> HostDirective {
        let admission = self
            .admission
            .admit(self.ctx.clock().as_ref(), self.ctx.store().as_ref());
        if !admission.allowed {
            return HostDirective::SleepThenExit(admission.window_remaining);
        }
        if let Some(episode) = self.ctx.resume() {
            tracing::warn!(
                cooldown_until = %episode.cooldown_until,
                "persisted cooldown still active"
            );
        }
        self.before_connect()
    }

    /// Before every connection attempt
    ///
    /// During the wary period the first call owes the pad; the call after
    /// the pad has been slept proceeds.
    pub fn before_connect(&self) -> HostDirective {
        let now = self.ctx.now();
        if let Some(episode) = self.ctx.gate().active(now) {
            let remaining = episode.remaining(now);
            tracing::info!(wait_secs = remaining.as_secs(), "cooldown active, delaying connection");
            return HostDirective::SleepThenRetry(remaining);
        }
        match self.ctx.gate().wary_pad(now) {
            Some(pad) if !self.padded.swap(true, Ordering::SeqCst) => {
                tracing::warn!(pad_secs = pad.as_secs(), "recent rate limit, connecting cautiously");
                HostDirective::SleepThenRetry(pad)
            }
            _ => {
                self.padded.store(false, Ordering::SeqCst);
                HostDirective::Proceed
            }
        }
    }

    /// After a failed connection attempt
    pub async fn on_connect_failure(&self, failure: &CallOutcome) -> HostDirective {
        match classify(failure, self.config.max_bucket_wait) {
            Verdict::Throttle => {
                let episode = self.ctx.report_throttle(&failure.to_string()).await;
                let remaining = episode.remaining(self.ctx.now());
                tracing::warn!(
                    wait_secs = remaining.as_secs(),
                    "connection throttled, sleeping out the cooldown before exit"
                );
                HostDirective::SleepThenExit(remaining)
            }
            Verdict::BucketWait(hint) => HostDirective::SleepThenRetry(hint),
            Verdict::Transient | Verdict::Ok => {
                tracing::error!(
                    error = %failure,
                    backoff_secs = self.config.fatal_backoff.as_secs(),
                    "connection failed"
                );
                HostDirective::SleepThenExit(self.config.fatal_backoff)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tsundoku_core::{ManualClock, MemoryStore};

    use crate::cooldown::{CooldownConfig, RateLimitGate};

    fn planner(clock: Arc<ManualClock>, store: Arc<MemoryStore>, ceiling: u32) -> LifecyclePlanner {
        let ctx = Arc::new(ThrottleContext::new(
            clock,
            store,
            RateLimitGate::with_seed(
                CooldownConfig {
                    min_wait: Duration::from_secs(30 * 60),
                    max_wait: Duration::from_secs(40 * 60),
                    ..Default::default()
                },
                23,
            ),
        ));
        LifecyclePlanner::new(
            ctx,
            AdmissionConfig {
                ceiling,
                ..Default::default()
            },
            LifecycleConfig::default(),
        )
    }

    #[test]
    fn test_clean_start_proceeds() {
        let p = planner(
            Arc::new(ManualClock::at_epoch()),
            Arc::new(MemoryStore::new()),
            10,
        );
        assert_eq!(p.startup(), HostDirective::Proceed);
        assert_eq!(p.config().startup_pause, Duration::from_secs(10));
    }

    #[test]
    fn test_start_over_ceiling_exits() {
        let clock = Arc::new(ManualClock::at_epoch());
        let store = Arc::new(MemoryStore::new());
        for _ in 0..2 {
            let p = planner(clock.clone(), store.clone(), 2);
            assert_eq!(p.startup(), HostDirective::Proceed);
        }
        clock.advance(Duration::from_secs(3600));
        let p = planner(clock, store, 2);
        assert_eq!(
            p.startup(),
            HostDirective::SleepThenExit(Duration::from_secs(23 * 3600))
        );
    }

    #[tokio::test]
    async fn test_throttled_connect_then_restart_waits() {
        let clock = Arc::new(ManualClock::at_epoch());
        let store = Arc::new(MemoryStore::new());

        let p = planner(clock.clone(), store.clone(), 10);
        assert_eq!(p.startup(), HostDirective::Proceed);
        let directive = p.on_connect_failure(&CallOutcome::http(429)).await;
        let HostDirective::SleepThenExit(wait) = directive else {
            panic!("expected exit, got {directive:?}");
        };
        assert!(wait > Duration::from_secs(30 * 60) && wait < Duration::from_secs(40 * 60));

        // Restarted early: the persisted cooldown holds
        clock.advance(Duration::from_secs(10 * 60));
        let restarted = planner(clock.clone(), store.clone(), 10);
        assert_eq!(
            restarted.startup(),
            HostDirective::SleepThenRetry(wait - Duration::from_secs(10 * 60))
        );

        // After the cooldown, within the hour: one pad, then proceed
        clock.advance(wait);
        assert_eq!(
            restarted.before_connect(),
            HostDirective::SleepThenRetry(Duration::from_secs(30))
        );
        assert_eq!(restarted.before_connect(), HostDirective::Proceed);

        // Past the wary period
        clock.advance(Duration::from_secs(3600));
        assert_eq!(restarted.before_connect(), HostDirective::Proceed);
    }

    #[tokio::test]
    async fn test_other_connect_failures() {
        let p = planner(
            Arc::new(ManualClock::at_epoch()),
            Arc::new(MemoryStore::new()),
            10,
        );
        assert_eq!(
            p.on_connect_failure(&CallOutcome::failure("invalid token")).await,
            HostDirective::SleepThenExit(Duration::from_secs(3600))
        );
        let hinted = CallOutcome::http(429).with_retry_after(Duration::from_secs(5));
        assert_eq!(
            p.on_connect_failure(&hinted).await,
            HostDirective::SleepThenRetry(Duration::from_secs(5))
        );
        assert!(p.context().active_cooldown().is_none());
    }
}
