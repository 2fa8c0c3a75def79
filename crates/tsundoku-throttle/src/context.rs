//! Shared throttle context
//!
//! One instance per process, built by the host and handed to the dispatcher
//! and the lifecycle planner. Tests build it with a `ManualClock` and a
//! `MemoryStore` (or a store that fails on purpose).

use std::sync::Arc;

use chrono::{DateTime, Utc};

use tsundoku_core::{append_json_line, load_json, save_json, Clock, KeyValueStore};

use crate::cooldown::{AuditRecord, CooldownConfig, GateState, RateLimitEpisode, RateLimitGate, Trip};
use crate::egress::{EgressProbe, NoProbe};

/// Store key of the active (or most recent) episode
pub const ACTIVE_EPISODE_KEY: &str = "ratelimit/active";
/// Store key of the append-only audit log
pub const AUDIT_LOG_KEY: &str = "ratelimit/audit.log";

/// Clock, store and gate shared by every outbound path
pub struct ThrottleContext {
    clock: Arc<dyn Clock>,
    store: Arc<dyn KeyValueStore>,
    gate: RateLimitGate,
    probe: Arc<dyn EgressProbe>,
}

impl ThrottleContext {
    pub fn new(clock: Arc<dyn Clock>, store: Arc<dyn KeyValueStore>, gate: RateLimitGate) -> Self {
        ThrottleContext {
            clock,
            store,
            gate,
            probe: Arc::new(NoProbe),
        }
    }

    /// Default gate with the given cooldown configuration
    pub fn with_config(
        clock: Arc<dyn Clock>,
        store: Arc<dyn KeyValueStore>,
        config: CooldownConfig,
    ) -> Self {
        Self::new(clock, store, RateLimitGate::new(config))
    }

    pub fn with_probe(mut self, probe: Arc<dyn EgressProbe>) -> Self {
        self.probe = probe;
        self
    }

    #[inline]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub fn gate(&self) -> &RateLimitGate {
        &self.gate
    }

    pub fn state(&self) -> GateState {
        self.gate.state(self.now())
    }

    /// Active cooldown episode, if any
    pub fn active_cooldown(&self) -> Option<RateLimitEpisode> {
        self.gate.active(self.now())
    }

    /// Load the persisted episode into the gate
    ///
    /// Returns the episode if it is still active. A missing or unreadable
    /// record means "no active cooldown".
    pub fn resume(&self) -> Option<RateLimitEpisode> {
        let episode: RateLimitEpisode = match load_json(self.store.as_ref(), ACTIVE_EPISODE_KEY) {
            Ok(Some(episode)) => episode,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(error = %e, "could not read persisted cooldown, assuming none");
                return None;
            }
        };
        let now = self.now();
        if self.gate.restore(episode, now) {
            self.gate.active(now)
        } else {
            None
        }
    }

    /// Report a throttle signal from any outbound path
    ///
    /// Starts a cooldown unless one is active. A new episode is persisted
    /// before the egress IP is probed, so a process killed mid-probe still
    /// restarts into the cooldown. The probed IP is then saved with the
    /// episode and its audit record.
    pub async fn report_throttle(&self, triggering_error: &str) -> RateLimitEpisode {
        let mut episode = match self.gate.trip(self.now(), triggering_error) {
            Trip::Entered(episode) => episode,
            Trip::AlreadyCooling(episode) => return episode,
        };
        self.save_episode(&episode);

        let ip = self.probe.public_ip().await;
        if ip.is_some() {
            self.gate.annotate_origin(episode.detected_at, ip.clone());
            episode.origin_ip = ip;
            self.save_episode(&episode);
        }

        let record = AuditRecord::from(&episode);
        if let Err(e) = append_json_line(self.store.as_ref(), AUDIT_LOG_KEY, &record) {
            tracing::error!(error = %e, "failed to append rate-limit audit record");
        }
        episode
    }

    fn save_episode(&self, episode: &RateLimitEpisode) {
        if let Err(e) = save_json(self.store.as_ref(), ACTIVE_EPISODE_KEY, episode) {
            tracing::error!(error = %e, "failed to persist cooldown episode");
        }
    }

    /// Every audit record written so far, oldest first
    ///
    /// Unreadable lines are skipped.
    pub fn audit_log(&self) -> Vec<AuditRecord> {
        let bytes = match self.store.read(AUDIT_LOG_KEY) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Vec::new(),
            Err(e) => {
                tracing::warn!(error = %e, "could not read rate-limit audit log");
                return Vec::new();
            }
        };
        bytes
            .split(|&b| b == b'\n')
            .filter(|line| !line.is_empty())
            .filter_map(|line| serde_json::from_slice(line).ok())
            .collect()
    }
}

impl std::fmt::Debug for ThrottleContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThrottleContext")
            .field("gate", &self.gate)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use async_trait::async_trait;
    use tsundoku_core::{ManualClock, MemoryStore, TsundokuError, TsundokuResult};

    use crate::egress::StaticProbe;

    /// Egress probe that never answers
    struct HangingProbe;

    #[async_trait]
    impl EgressProbe for HangingProbe {
        async fn public_ip(&self) -> Option<String> {
            std::future::pending().await
        }
    }

    struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn read(&self, key: &str) -> TsundokuResult<Option<Vec<u8>>> {
            Err(TsundokuError::persistence(key, "disk unavailable"))
        }

        fn write(&self, key: &str, _bytes: &[u8]) -> TsundokuResult<()> {
            Err(TsundokuError::persistence(key, "disk unavailable"))
        }
    }

    fn context(clock: Arc<ManualClock>, store: Arc<dyn KeyValueStore>) -> ThrottleContext {
        ThrottleContext::new(
            clock,
            store,
            RateLimitGate::with_seed(CooldownConfig::default(), 42),
        )
    }

    #[tokio::test]
    async fn test_report_throttle_persists_episode_and_audit() {
        let clock = Arc::new(ManualClock::at_epoch());
        let store = Arc::new(MemoryStore::new());
        let ctx = context(clock.clone(), store.clone())
            .with_probe(Arc::new(StaticProbe("192.0.2.10".into())));

        let episode = ctx.report_throttle("HTTP 429").await;
        assert_eq!(episode.origin_ip.as_deref(), Some("192.0.2.10"));
        assert_eq!(ctx.active_cooldown(), Some(episode.clone()));

        let stored: Option<RateLimitEpisode> =
            load_json(store.as_ref(), ACTIVE_EPISODE_KEY).unwrap();
        assert_eq!(stored, Some(episode.clone()));

        let log = ctx.audit_log();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].egress_ip, "192.0.2.10");
        assert_eq!(log[0].next_retry, episode.cooldown_until);
        assert_eq!(log[0].triggering_error, "HTTP 429");
    }

    #[tokio::test(start_paused = true)]
    async fn test_episode_persisted_before_probe_answers() {
        let clock = Arc::new(ManualClock::at_epoch());
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let ctx = Arc::new(context(clock.clone(), store.clone()).with_probe(Arc::new(HangingProbe)));

        let reporting = {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move { ctx.report_throttle("HTTP 429").await })
        };
        tokio::time::sleep(Duration::from_millis(200)).await;
        reporting.abort();
        assert!(reporting.await.unwrap_err().is_cancelled());

        let episode = ctx.active_cooldown().unwrap();
        let stored: Option<RateLimitEpisode> =
            load_json(store.as_ref(), ACTIVE_EPISODE_KEY).unwrap();
        assert_eq!(stored, Some(episode.clone()));
        assert!(ctx.audit_log().is_empty());

        // A process killed mid-probe restarts into the cooldown
        clock.advance(Duration::from_secs(60));
        let restarted = context(clock, store);
        assert_eq!(restarted.resume(), Some(episode));
    }

    #[tokio::test]
    async fn test_second_report_does_not_write_again() {
        let clock = Arc::new(ManualClock::at_epoch());
        let ctx = context(clock.clone(), Arc::new(MemoryStore::new()));

        let first = ctx.report_throttle("429").await;
        clock.advance(Duration::from_secs(60));
        let second = ctx.report_throttle("rate limited").await;

        assert_eq!(first, second);
        assert_eq!(ctx.audit_log().len(), 1);
        assert_eq!(first.origin_ip, None);
    }

    #[tokio::test]
    async fn test_resume_after_restart() {
        let clock = Arc::new(ManualClock::at_epoch());
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());

        let episode = context(clock.clone(), store.clone())
            .report_throttle("429")
            .await;

        clock.advance(Duration::from_secs(5 * 60));
        let restarted = context(clock.clone(), store.clone());
        assert_eq!(restarted.resume(), Some(episode.clone()));
        assert!(restarted.state().is_cooling());

        clock.set(episode.cooldown_until);
        let later = context(clock.clone(), store);
        assert_eq!(later.resume(), None);
        assert!(!later.state().is_cooling());
    }

    #[tokio::test]
    async fn test_broken_store_falls_back() {
        let clock = Arc::new(ManualClock::at_epoch());
        let ctx = context(clock, Arc::new(BrokenStore));

        assert_eq!(ctx.resume(), None);
        let episode = ctx.report_throttle("429").await;
        // Cooldown still holds in memory
        assert_eq!(ctx.active_cooldown(), Some(episode));
        assert!(ctx.audit_log().is_empty());
    }

    #[test]
    fn test_corrupt_record_means_no_cooldown() {
        let clock = Arc::new(ManualClock::at_epoch());
        let store = Arc::new(MemoryStore::new());
        store.write(ACTIVE_EPISODE_KEY, b"{not json").unwrap();
        let ctx = context(clock, store);
        assert_eq!(ctx.resume(), None);
        assert_eq!(ctx.state(), GateState::Normal);
    }
}
