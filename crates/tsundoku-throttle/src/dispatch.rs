//! Retry/backoff dispatcher
//!
//! Wraps every outbound call (lookup, row append, chat reply). Per attempt:
//!
//! 1. If the gate is cooling, stop without calling (no attempt consumed).
//! 2. Call the operation.
//! 3. On failure, classify the outcome:
//!    - throttle: trip the cooldown and stop; never retried locally
//!    - bucket wait: sleep exactly the server hint plus a margin
//!    - transient: sleep the server hint plus a margin when one is given,
//!      otherwise `base_delay * 2^i` plus jitter
//!
//! No sleep follows the final attempt. Throttles and transient failures end
//! here as a `DispatchOutcome`; nothing propagates as an error.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use tsundoku_core::{CallOutcome, TsundokuError};

use crate::context::ThrottleContext;
use crate::cooldown::RateLimitEpisode;
use crate::signature::{classify, Verdict};

/// Outcomes kept for the rolling success ratio
pub const STATS_WINDOW: usize = 100;

/// Dispatcher configuration
#[derive(Clone, Debug)]
pub struct DispatchConfig {
    /// Attempts per call when the caller does not specify
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles each retry
    pub base_delay: Duration,
    /// Upper bound of the uniform jitter added to backoff delays
    pub max_jitter: Duration,
    /// Added on top of an honored server wait hint
    pub retry_margin: Duration,
    /// Longest server hint honored as a bucket wait
    pub max_bucket_wait: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        DispatchConfig {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_jitter: Duration::from_millis(500),
            retry_margin: Duration::from_millis(500),
            max_bucket_wait: Duration::from_secs(60),
        }
    }
}

impl DispatchConfig {
    /// Deterministic delays
    pub fn without_jitter() -> Self {
        DispatchConfig {
            max_jitter: Duration::ZERO,
            ..Default::default()
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

/// How a dispatched call ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome<T> {
    Delivered(T),
    /// Short-circuited or tripped by the cooldown gate
    RateLimited(RateLimitEpisode),
    /// Every attempt failed; carries the last failure
    Exhausted(Option<CallOutcome>),
}

/// Result of one `dispatch` call
#[derive(Clone, Debug)]
pub struct DispatchReport<T> {
    pub outcome: DispatchOutcome<T>,
    /// Operation invocations
    pub attempts: u32,
    /// Total time slept between attempts
    pub waited: Duration,
}

impl<T> DispatchReport<T> {
    #[inline]
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, DispatchOutcome::Delivered(_))
    }

    #[inline]
    pub fn is_rate_limited(&self) -> bool {
        matches!(self.outcome, DispatchOutcome::RateLimited(_))
    }

    pub fn value(&self) -> Option<&T> {
        match &self.outcome {
            DispatchOutcome::Delivered(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self.outcome {
            DispatchOutcome::Delivered(v) => Some(v),
            _ => None,
        }
    }

    /// Why the call was not delivered
    pub fn error(&self) -> Option<TsundokuError> {
        match &self.outcome {
            DispatchOutcome::Delivered(_) => None,
            DispatchOutcome::RateLimited(episode) => {
                Some(TsundokuError::Throttled(episode.triggering_error.clone()))
            }
            DispatchOutcome::Exhausted(last) => Some(TsundokuError::Transient(
                last.as_ref()
                    .map_or_else(|| "no attempt made".to_string(), |f| f.to_string()),
            )),
        }
    }
}

/// Dispatcher counters
#[derive(Debug, Default)]
pub struct DispatchStats {
    attempts: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    throttles: AtomicU64,
    short_circuits: AtomicU64,
    recent: Mutex<VecDeque<bool>>,
}

/// Point-in-time copy of `DispatchStats`
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StatsSnapshot {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub throttles: u64,
    pub short_circuits: u64,
    /// Success ratio over the last `STATS_WINDOW` attempts
    pub recent_success_ratio: Option<f64>,
}

impl DispatchStats {
    fn record(&self, success: bool) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        let mut recent = self.recent.lock();
        if recent.len() == STATS_WINDOW {
            recent.pop_front();
        }
        recent.push_back(success);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let recent = self.recent.lock();
        let ratio = if recent.is_empty() {
            None
        } else {
            let ok = recent.iter().filter(|&&s| s).count();
            Some(ok as f64 / recent.len() as f64)
        };
        StatsSnapshot {
            attempts: self.attempts.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            throttles: self.throttles.load(Ordering::Relaxed),
            short_circuits: self.short_circuits.load(Ordering::Relaxed),
            recent_success_ratio: ratio,
        }
    }
}

/// Retry/backoff dispatcher bound to a throttle context
pub struct Dispatcher {
    ctx: Arc<ThrottleContext>,
    config: DispatchConfig,
    stats: DispatchStats,
    rng: Mutex<StdRng>,
}

impl Dispatcher {
    pub fn new(ctx: Arc<ThrottleContext>, config: DispatchConfig) -> Self {
        Self::with_rng(ctx, config, StdRng::from_entropy())
    }

    pub fn with_seed(ctx: Arc<ThrottleContext>, config: DispatchConfig, seed: u64) -> Self {
        Self::with_rng(ctx, config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(ctx: Arc<ThrottleContext>, config: DispatchConfig, rng: StdRng) -> Self {
        Dispatcher {
            ctx,
            config,
            stats: DispatchStats::default(),
            rng: Mutex::new(rng),
        }
    }

    pub fn context(&self) -> &Arc<ThrottleContext> {
        &self.ctx
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    fn jitter(&self) -> Duration {
        let max = self.config.max_jitter.as_millis() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(self.rng.lock().gen_range(0..=max))
    }

    /// Dispatch with the configured attempt count
    pub async fn call<T, F, Fut>(&self, label: &str, op: F) -> DispatchReport<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallOutcome>>,
    {
        self.dispatch(label, self.config.max_attempts, op).await
    }

    /// Run `op` with bounded retries, deferring to the cooldown gate
    pub async fn dispatch<T, F, Fut>(
        &self,
        label: &str,
        max_attempts: u32,
        mut op: F,
    ) -> DispatchReport<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallOutcome>>,
    {
        let mut attempts = 0;
        let mut waited = Duration::ZERO;
        let mut last_failure = None;

        for i in 0..max_attempts {
            if let Some(episode) = self.ctx.active_cooldown() {
                self.stats.short_circuits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    call = label,
                    cooldown_until = %episode.cooldown_until,
                    "call skipped during cooldown"
                );
                return DispatchReport {
                    outcome: DispatchOutcome::RateLimited(episode),
                    attempts,
                    waited,
                };
            }

            attempts += 1;
            let failure = match op().await {
                Ok(value) => {
                    self.stats.record(true);
                    return DispatchReport {
                        outcome: DispatchOutcome::Delivered(value),
                        attempts,
                        waited,
                    };
                }
                Err(failure) => failure,
            };
            self.stats.record(false);

            let verdict = classify(&failure, self.config.max_bucket_wait);
            tracing::warn!(
                call = label,
                attempt = attempts,
                max_attempts,
                class = ?verdict.class(),
                error = %failure,
                "outbound call failed"
            );

            let delay = match verdict {
                Verdict::Throttle => {
                    self.stats.throttles.fetch_add(1, Ordering::Relaxed);
                    let episode = self.ctx.report_throttle(&failure.to_string()).await;
                    return DispatchReport {
                        outcome: DispatchOutcome::RateLimited(episode),
                        attempts,
                        waited,
                    };
                }
                Verdict::BucketWait(hint) => hint + self.config.retry_margin,
                Verdict::Transient | Verdict::Ok => match failure.retry_after {
                    Some(hint) => hint + self.config.retry_margin,
                    None => self.config.backoff(i) + self.jitter(),
                },
            };
            last_failure = Some(failure);

            if i + 1 < max_attempts {
                tracing::debug!(call = label, delay_ms = delay.as_millis() as u64, "retrying");
                tokio::time::sleep(delay).await;
                waited += delay;
            }
        }

        tracing::error!(call = label, attempts, "outbound call exhausted its retries");
        DispatchReport {
            outcome: DispatchOutcome::Exhausted(last_failure),
            attempts,
            waited,
        }
    }
}
