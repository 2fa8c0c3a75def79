//! Chaos lookups
//!
//! A bibliographic lookup that misbehaves at seeded rates:
//! - Latency
//! - Transient failures (HTTP 5xx)
//! - Throttles (HTTP 429 without a usable hint)
//! - Misses
//!
//! Once a throttle has been returned, every further call is counted as a
//! violation: the gate must keep the pipeline away from the service.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use tsundoku_core::CallOutcome;
use tsundoku_isbn::{isbn13_check_digit, Isbn};
use tsundoku_runtime::{BookLookup, BookRecord};

/// Chaos lookup configuration
#[derive(Clone, Debug)]
pub struct ChaosConfig {
    /// Latency range in milliseconds
    pub latency_ms: (u64, u64),
    /// Probability of a transient failure (0.0 - 1.0)
    pub transient_rate: f64,
    /// Probability of a throttle
    pub throttle_rate: f64,
    /// Probability that a healthy answer is "not found"
    pub miss_rate: f64,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        ChaosConfig {
            latency_ms: (20, 200),
            transient_rate: 0.1,
            throttle_rate: 0.02,
            miss_rate: 0.1,
        }
    }
}

impl ChaosConfig {
    /// Healthy service
    pub fn calm() -> Self {
        ChaosConfig {
            latency_ms: (10, 50),
            transient_rate: 0.0,
            throttle_rate: 0.0,
            miss_rate: 0.05,
        }
    }

    /// Frequent transient failures, no throttling
    pub fn flaky() -> Self {
        ChaosConfig {
            latency_ms: (50, 800),
            transient_rate: 0.4,
            throttle_rate: 0.0,
            miss_rate: 0.1,
        }
    }

    /// Throttles often
    pub fn hostile() -> Self {
        ChaosConfig {
            latency_ms: (100, 2000),
            transient_rate: 0.3,
            throttle_rate: 0.25,
            miss_rate: 0.1,
        }
    }
}

/// Chaos lookup statistics
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChaosStats {
    pub calls: u64,
    pub hits: u64,
    pub misses: u64,
    pub transient: u64,
    pub throttles: u64,
    /// Calls received after a throttle was returned
    pub calls_after_throttle: u64,
}

struct ChaosState {
    rng: StdRng,
    stats: ChaosStats,
}

/// Seeded misbehaving lookup
pub struct ChaosLookup {
    config: ChaosConfig,
    latency: Uniform<u64>,
    state: Mutex<ChaosState>,
}

impl ChaosLookup {
    pub fn new(config: ChaosConfig, seed: u64) -> Self {
        let (lo, hi) = config.latency_ms;
        ChaosLookup {
            latency: Uniform::new_inclusive(lo, hi.max(lo)),
            config,
            state: Mutex::new(ChaosState {
                rng: StdRng::seed_from_u64(seed),
                stats: ChaosStats::default(),
            }),
        }
    }

    pub fn stats(&self) -> ChaosStats {
        self.state.lock().stats.clone()
    }

    /// Decide the answer and latency up front; the lock is not held while sleeping
    fn roll(&self, isbn: &Isbn) -> (Duration, Result<Option<BookRecord>, CallOutcome>) {
        let mut state = self.state.lock();
        let ChaosState { rng, stats } = &mut *state;

        stats.calls += 1;
        if stats.throttles > 0 {
            stats.calls_after_throttle += 1;
        }
        let delay = Duration::from_millis(self.latency.sample(rng));

        let answer = if rng.gen_bool(self.config.throttle_rate) {
            stats.throttles += 1;
            Err(CallOutcome::http(429))
        } else if rng.gen_bool(self.config.transient_rate) {
            stats.transient += 1;
            Err(CallOutcome::http(503))
        } else if rng.gen_bool(self.config.miss_rate) {
            stats.misses += 1;
            Ok(None)
        } else {
            stats.hits += 1;
            Ok(Some(BookRecord {
                title: format!("Volume {}", &isbn.long()[3..12]),
                publisher: "Chaos House".to_string(),
                price: Some(1000),
            }))
        };
        (delay, answer)
    }
}

#[async_trait]
impl BookLookup for ChaosLookup {
    async fn lookup(&self, isbn: &Isbn) -> Result<Option<BookRecord>, CallOutcome> {
        let (delay, answer) = self.roll(isbn);
        tokio::time::sleep(delay).await;
        answer
    }
}

/// Valid `978` identifier number `n` (modulo 10^9)
pub fn synthetic_isbn(n: u64) -> Option<Isbn> {
    let mut long = format!("978{:09}", n % 1_000_000_000);
    let check = isbn13_check_digit(long.as_bytes())?;
    long.push(check as char);
    Isbn::from_long(&long)
}

/// Message text listing `count` distinct identifiers, starting at `first`
pub fn synthetic_order(first: u64, count: u64) -> String {
    (first..first + count)
        .filter_map(synthetic_isbn)
        .map(|isbn| isbn.long().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
