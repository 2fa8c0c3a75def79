//! Rate-limit cooldown gate
//!
//! Process-wide latch with two states, `Normal` and `Cooldown(episode)`.
//! Every check-and-transition happens inside one critical section, so two
//! callers observing a throttle at the same moment produce exactly one
//! episode. A signal arriving while a cooldown is active never extends it.
//!
//! The gate is pure in-memory state; persistence and the audit trail live
//! in [`crate::ThrottleContext`].

use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use tsundoku_core::{add_duration, elapsed_between};

/// Cooldown configuration
#[derive(Clone, Debug)]
pub struct CooldownConfig {
    /// Lower bound of the cooldown (exclusive)
    pub min_wait: Duration,
    /// Upper bound of the cooldown (exclusive)
    pub max_wait: Duration,
    /// How long after a cooldown ends new connections stay careful
    pub wary_period: Duration,
    /// Extra delay before a connection attempt during the wary period
    pub wary_pad: Duration,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        CooldownConfig {
            min_wait: Duration::from_secs(30 * 60),
            max_wait: Duration::from_secs(120 * 60),
            wary_period: Duration::from_secs(60 * 60),
            wary_pad: Duration::from_secs(30),
        }
    }
}

impl CooldownConfig {
    /// Short bounds for demos and local runs
    pub fn brief() -> Self {
        CooldownConfig {
            min_wait: Duration::from_secs(30),
            max_wait: Duration::from_secs(120),
            wary_period: Duration::from_secs(60),
            wary_pad: Duration::from_secs(1),
        }
    }

    /// Draw a cooldown length strictly inside `(min_wait, max_wait)`
    fn sample(&self, rng: &mut StdRng) -> Duration {
        let lo = self.min_wait.as_millis() as u64 + 1;
        let hi = self.max_wait.as_millis() as u64;
        if lo >= hi {
            return self.max_wait;
        }
        Duration::from_millis(rng.gen_range(lo..hi))
    }
}

/// One cooldown episode
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitEpisode {
    pub detected_at: DateTime<Utc>,
    pub cooldown_until: DateTime<Utc>,
    pub triggering_error: String,
    /// Best-effort public IP at detection time
    #[serde(default)]
    pub origin_ip: Option<String>,
}

impl RateLimitEpisode {
    pub fn duration(&self) -> Duration {
        elapsed_between(self.detected_at, self.cooldown_until)
    }

    #[inline]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.cooldown_until
    }

    /// Time left until the episode ends, zero once over
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        elapsed_between(now, self.cooldown_until)
    }
}

/// Append-only audit record written when an episode starts
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub wait_secs: u64,
    pub triggering_error: String,
    pub egress_ip: String,
    pub next_retry: DateTime<Utc>,
}

impl From<&RateLimitEpisode> for AuditRecord {
    fn from(episode: &RateLimitEpisode) -> Self {
        AuditRecord {
            timestamp: episode.detected_at,
            wait_secs: episode.duration().as_secs(),
            triggering_error: episode.triggering_error.clone(),
            egress_ip: episode
                .origin_ip
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
            next_retry: episode.cooldown_until,
        }
    }
}

/// Observable gate state
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GateState {
    Normal,
    Cooldown(RateLimitEpisode),
}

impl GateState {
    #[inline]
    pub fn is_cooling(&self) -> bool {
        matches!(self, GateState::Cooldown(_))
    }
}

/// Result of reporting a throttle signal
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Trip {
    /// This signal started a new episode
    Entered(RateLimitEpisode),
    /// An episode was already active; it is left unchanged
    AlreadyCooling(RateLimitEpisode),
}

impl Trip {
    pub fn episode(&self) -> &RateLimitEpisode {
        match self {
            Trip::Entered(e) | Trip::AlreadyCooling(e) => e,
        }
    }

    #[inline]
    pub fn is_new(&self) -> bool {
        matches!(self, Trip::Entered(_))
    }
}

struct GateInner {
    episode: Option<RateLimitEpisode>,
    last_detected: Option<DateTime<Utc>>,
    /// End of the wary period following the latest episode
    wary_until: Option<DateTime<Utc>>,
    rng: StdRng,
    episodes: u64,
    suppressed: u64,
}

impl GateInner {
    /// Active episode at `now`, clearing an expired one
    fn active(&mut self, now: DateTime<Utc>) -> Option<&RateLimitEpisode> {
        if self.episode.as_ref().is_some_and(|e| !e.is_active(now)) {
            if let Some(ended) = self.episode.take() {
                tracing::info!(
                    detected_at = %ended.detected_at,
                    cooldown_until = %ended.cooldown_until,
                    "cooldown ended, resuming normal operation"
                );
            }
        }
        self.episode.as_ref()
    }
}

/// Process-wide rate-limit latch
pub struct RateLimitGate {
    config: CooldownConfig,
    inner: Mutex<GateInner>,
}

impl RateLimitGate {
    pub fn new(config: CooldownConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Deterministic cooldown lengths
    pub fn with_seed(config: CooldownConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: CooldownConfig, rng: StdRng) -> Self {
        RateLimitGate {
            config,
            inner: Mutex::new(GateInner {
                episode: None,
                last_detected: None,
                wary_until: None,
                rng,
                episodes: 0,
                suppressed: 0,
            }),
        }
    }

    pub fn config(&self) -> &CooldownConfig {
        &self.config
    }

    /// Current state; an expired episode transitions to `Normal` here
    pub fn state(&self, now: DateTime<Utc>) -> GateState {
        match self.inner.lock().active(now) {
            Some(episode) => GateState::Cooldown(episode.clone()),
            None => GateState::Normal,
        }
    }

    /// Active episode, if any
    pub fn active(&self, now: DateTime<Utc>) -> Option<RateLimitEpisode> {
        self.inner.lock().active(now).cloned()
    }

    /// Report a throttle signal
    ///
    /// Enters a new cooldown from `Normal`; during an active cooldown the
    /// signal is counted and the existing episode returned unchanged.
    pub fn trip(&self, now: DateTime<Utc>, triggering_error: &str) -> Trip {
        let mut inner = self.inner.lock();
        if let Some(active) = inner.active(now) {
            let active = active.clone();
            inner.suppressed += 1;
            tracing::debug!(
                cooldown_until = %active.cooldown_until,
                error = triggering_error,
                "throttle signal during active cooldown ignored"
            );
            return Trip::AlreadyCooling(active);
        }

        let wait = self.config.sample(&mut inner.rng);
        let episode = RateLimitEpisode {
            detected_at: now,
            cooldown_until: add_duration(now, wait),
            triggering_error: triggering_error.to_string(),
            origin_ip: None,
        };
        inner.episode = Some(episode.clone());
        inner.last_detected = Some(now);
        inner.wary_until = Some(self.wary_end(&episode));
        inner.episodes += 1;

        tracing::warn!(
            wait_secs = wait.as_secs(),
            cooldown_until = %episode.cooldown_until,
            error = triggering_error,
            "rate limit detected, entering cooldown"
        );
        Trip::Entered(episode)
    }

    /// Attach the probed egress IP to the active episode it belongs to
    pub fn annotate_origin(&self, detected_at: DateTime<Utc>, ip: Option<String>) {
        let mut inner = self.inner.lock();
        if let Some(episode) = inner.episode.as_mut() {
            if episode.detected_at == detected_at {
                episode.origin_ip = ip;
            }
        }
    }

    /// Re-install a persisted episode after a restart
    ///
    /// Returns true if the episode is still active. An expired episode
    /// still seeds the wary period.
    pub fn restore(&self, episode: RateLimitEpisode, now: DateTime<Utc>) -> bool {
        let mut inner = self.inner.lock();
        if inner
            .last_detected
            .is_some_and(|last| last >= episode.detected_at)
        {
            return inner.active(now).is_some();
        }
        inner.last_detected = Some(episode.detected_at);
        inner.wary_until = Some(self.wary_end(&episode));
        if episode.is_active(now) {
            tracing::info!(
                remaining_secs = episode.remaining(now).as_secs(),
                "resuming persisted cooldown"
            );
            inner.episode = Some(episode);
            true
        } else {
            false
        }
    }

    /// Extra delay owed by a connection attempt at `now`
    ///
    /// `Some(pad)` while outside an active cooldown but within the wary
    /// period that follows the end of the latest episode.
    pub fn wary_pad(&self, now: DateTime<Utc>) -> Option<Duration> {
        let mut inner = self.inner.lock();
        if inner.active(now).is_some() {
            return None;
        }
        match inner.wary_until {
            Some(until) if now < until => Some(self.config.wary_pad),
            _ => None,
        }
    }

    fn wary_end(&self, episode: &RateLimitEpisode) -> DateTime<Utc> {
        let ends = episode.cooldown_until.max(episode.detected_at);
        add_duration(ends, self.config.wary_period)
    }

    /// Episodes entered since construction
    pub fn episodes(&self) -> u64 {
        self.inner.lock().episodes
    }

    /// Throttle signals absorbed by an already active cooldown
    pub fn suppressed(&self) -> u64 {
        self.inner.lock().suppressed
    }
}

impl std::fmt::Debug for RateLimitGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("RateLimitGate")
            .field("config", &self.config)
            .field("episode", &inner.episode)
            .field("episodes", &inner.episodes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tsundoku_core::{Clock, ManualClock};

    const MIN: Duration = Duration::from_secs(30 * 60);
    const MAX: Duration = Duration::from_secs(120 * 60);

    #[test]
    fn test_trip_enters_cooldown_inside_bounds() {
        let clock = ManualClock::at_epoch();
        let gate = RateLimitGate::with_seed(CooldownConfig::default(), 7);
        let now = clock.now();

        let trip = gate.trip(now, "HTTP 429");
        assert!(trip.is_new());
        let episode = trip.episode();
        assert!(episode.cooldown_until > add_duration(now, MIN));
        assert!(episode.cooldown_until < add_duration(now, MAX));
        assert!(gate.state(now).is_cooling());
    }

    #[test]
    fn test_bounds_hold_for_many_seeds() {
        let now = ManualClock::at_epoch().now();
        for seed in 0..200 {
            let gate = RateLimitGate::with_seed(CooldownConfig::default(), seed);
            let d = gate.trip(now, "429").episode().duration();
            assert!(d > MIN && d < MAX, "seed {seed}: {d:?}");
        }
    }

    #[test]
    fn test_signal_during_cooldown_does_not_extend() {
        let clock = ManualClock::at_epoch();
        let gate = RateLimitGate::with_seed(CooldownConfig::default(), 1);
        let first = gate.trip(clock.now(), "429").episode().clone();

        clock.advance(Duration::from_secs(10 * 60));
        let second = gate.trip(clock.now(), "rate limited");
        assert_eq!(second, Trip::AlreadyCooling(first.clone()));
        assert_eq!(gate.active(clock.now()), Some(first));
        assert_eq!(gate.episodes(), 1);
        assert_eq!(gate.suppressed(), 1);
    }

    #[test]
    fn test_cooldown_exits_only_at_deadline() {
        let clock = ManualClock::at_epoch();
        let gate = RateLimitGate::with_seed(CooldownConfig::default(), 3);
        let episode = gate.trip(clock.now(), "429").episode().clone();

        clock.set(episode.cooldown_until - chrono::Duration::seconds(1));
        assert!(gate.state(clock.now()).is_cooling());

        clock.set(episode.cooldown_until);
        assert_eq!(gate.state(clock.now()), GateState::Normal);
        assert!(gate.active(clock.now()).is_none());
    }

    #[test]
    fn test_new_episode_after_expiry() {
        let clock = ManualClock::at_epoch();
        let gate = RateLimitGate::with_seed(CooldownConfig::default(), 5);
        gate.trip(clock.now(), "429");
        clock.advance(MAX);
        assert!(gate.trip(clock.now(), "429").is_new());
        assert_eq!(gate.episodes(), 2);
    }

    #[test]
    fn test_wary_pad_after_short_cooldown() {
        let config = CooldownConfig {
            min_wait: Duration::from_secs(30 * 60),
            max_wait: Duration::from_secs(40 * 60),
            ..Default::default()
        };
        let clock = ManualClock::at_epoch();
        let gate = RateLimitGate::with_seed(config, 11);
        gate.trip(clock.now(), "429");

        // Inside the cooldown the pad does not apply
        assert_eq!(gate.wary_pad(clock.now()), None);

        clock.advance(Duration::from_secs(45 * 60));
        assert_eq!(gate.wary_pad(clock.now()), Some(Duration::from_secs(30)));

        // The hour counts from the end of the cooldown, not from detection
        clock.advance(Duration::from_secs(15 * 60));
        assert_eq!(gate.wary_pad(clock.now()), Some(Duration::from_secs(30)));

        clock.advance(Duration::from_secs(40 * 60));
        assert_eq!(gate.wary_pad(clock.now()), None);
    }

    #[test]
    fn test_wary_pad_after_long_cooldown() {
        let config = CooldownConfig {
            min_wait: Duration::from_secs(89 * 60),
            max_wait: Duration::from_secs(91 * 60),
            ..Default::default()
        };
        let clock = ManualClock::at_epoch();
        let gate = RateLimitGate::with_seed(config, 4);
        let episode = gate.trip(clock.now(), "429").episode().clone();

        clock.set(episode.cooldown_until);
        assert_eq!(gate.wary_pad(clock.now()), Some(Duration::from_secs(30)));

        clock.set(add_duration(episode.cooldown_until, Duration::from_secs(59 * 60)));
        assert_eq!(gate.wary_pad(clock.now()), Some(Duration::from_secs(30)));

        clock.set(add_duration(episode.cooldown_until, Duration::from_secs(60 * 60)));
        assert_eq!(gate.wary_pad(clock.now()), None);
    }

    #[test]
    fn test_restore_active_and_expired() {
        let clock = ManualClock::at_epoch();
        let now = clock.now();
        let episode = RateLimitEpisode {
            detected_at: now,
            cooldown_until: add_duration(now, Duration::from_secs(1800)),
            triggering_error: "429".into(),
            origin_ip: None,
        };

        let gate = RateLimitGate::new(CooldownConfig::default());
        clock.advance(Duration::from_secs(600));
        assert!(gate.restore(episode.clone(), clock.now()));
        assert_eq!(gate.active(clock.now()), Some(episode.clone()));

        let gate = RateLimitGate::new(CooldownConfig::default());
        clock.advance(Duration::from_secs(1800));
        assert!(!gate.restore(episode.clone(), clock.now()));
        assert!(gate.active(clock.now()).is_none());
        // Expired, but still within an hour of its end
        assert_eq!(gate.wary_pad(clock.now()), Some(Duration::from_secs(30)));

        // A long restored episode keeps its full wary hour
        let long = RateLimitEpisode {
            detected_at: now,
            cooldown_until: add_duration(now, Duration::from_secs(100 * 60)),
            triggering_error: "429".into(),
            origin_ip: None,
        };
        let restarted = RateLimitGate::new(CooldownConfig::default());
        let after = add_duration(long.cooldown_until, Duration::from_secs(30 * 60));
        assert!(!restarted.restore(long, after));
        assert_eq!(restarted.wary_pad(after), Some(Duration::from_secs(30)));

        // Older episodes never replace a newer detection
        gate.trip(clock.now(), "429");
        assert!(gate.restore(episode, clock.now()));
        assert_eq!(gate.episodes(), 1);
    }

    #[test]
    fn test_concurrent_trips_create_one_episode() {
        let clock = Arc::new(ManualClock::at_epoch());
        let gate = Arc::new(RateLimitGate::with_seed(CooldownConfig::default(), 9));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let gate = Arc::clone(&gate);
                let clock = Arc::clone(&clock);
                std::thread::spawn(move || gate.trip(clock.now(), &format!("429 #{i}")))
            })
            .collect();
        let trips: Vec<Trip> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(trips.iter().filter(|t| t.is_new()).count(), 1);
        let until = trips[0].episode().cooldown_until;
        assert!(trips.iter().all(|t| t.episode().cooldown_until == until));
        assert_eq!(gate.suppressed(), 7);
    }

    #[test]
    fn test_annotate_origin_and_audit_record() {
        let now = ManualClock::at_epoch().now();
        let gate = RateLimitGate::with_seed(CooldownConfig::default(), 2);
        let episode = gate.trip(now, "HTTP 429").episode().clone();
        gate.annotate_origin(episode.detected_at, Some("203.0.113.7".into()));

        let stored = gate.active(now).unwrap();
        assert_eq!(stored.origin_ip.as_deref(), Some("203.0.113.7"));

        let record = AuditRecord::from(&stored);
        assert_eq!(record.egress_ip, "203.0.113.7");
        assert_eq!(record.next_retry, stored.cooldown_until);
        assert_eq!(record.wait_secs, stored.duration().as_secs());
        assert_eq!(AuditRecord::from(&episode).egress_ip, "unknown");
    }

    mod sampling {
        use super::*;
        use proptest::prelude::*;
        use rand::SeedableRng;

        proptest! {
            #[test]
            fn sample_stays_strictly_inside_bounds(
                seed in any::<u64>(),
                min_secs in 0u64..7200,
                span_ms in 2u64..3_600_000,
            ) {
                let config = CooldownConfig {
                    min_wait: Duration::from_secs(min_secs),
                    max_wait: Duration::from_secs(min_secs) + Duration::from_millis(span_ms),
                    ..Default::default()
                };
                let mut rng = StdRng::seed_from_u64(seed);
                let d = config.sample(&mut rng);
                prop_assert!(d > config.min_wait && d < config.max_wait);
            }

            #[test]
            fn degenerate_bounds_fall_back_to_max(seed in any::<u64>(), secs in 0u64..7200) {
                let config = CooldownConfig {
                    min_wait: Duration::from_secs(secs),
                    max_wait: Duration::from_secs(secs),
                    ..Default::default()
                };
                let mut rng = StdRng::seed_from_u64(seed);
                prop_assert_eq!(config.sample(&mut rng), config.max_wait);
            }
        }
    }
}
