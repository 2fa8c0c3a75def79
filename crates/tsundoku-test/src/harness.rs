//! End-to-end harness
//!
//! Wires scripted collaborators, a store and a `TokioClock` into a real
//! `Runtime`. Everything is seeded, so a scenario replays identically.
//! `restart` simulates a process restart: the store and the clock survive,
//! the in-memory gate does not.

use std::sync::Arc;
use std::time::Duration;

use tsundoku_core::{KeyValueStore, MemoryStore};
use tsundoku_runtime::{BookLookup, InboundMessage, MessageHandle, Runtime, RuntimeConfig};
use tsundoku_throttle::{
    CooldownConfig, DispatchConfig, RateLimitGate, StaticProbe, ThrottleContext,
};

use crate::clock::TokioClock;
use crate::scripted::{RecordingChat, RecordingSheet, ScriptedLookup};

/// Egress IP reported by the harness probe
pub const HARNESS_EGRESS_IP: &str = "192.0.2.1";

/// Default gate seed
pub const HARNESS_SEED: u64 = 0x7503_d0c0;

/// Production defaults with deterministic delays and a 30-40 minute cooldown
pub fn fast_config() -> RuntimeConfig {
    RuntimeConfig {
        dispatch: DispatchConfig::without_jitter(),
        cooldown: CooldownConfig {
            min_wait: Duration::from_secs(30 * 60),
            max_wait: Duration::from_secs(40 * 60),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// A runtime plus handles on every collaborator it talks to
pub struct Harness<L: BookLookup + 'static = ScriptedLookup> {
    pub config: RuntimeConfig,
    pub clock: Arc<TokioClock>,
    pub store: Arc<dyn KeyValueStore>,
    pub lookup: Arc<L>,
    pub sheet: Arc<RecordingSheet>,
    pub chat: Arc<RecordingChat>,
    pub runtime: Runtime,
    seed: u64,
    messages: u64,
}

impl Harness<ScriptedLookup> {
    /// Fresh harness around `lookup`, backed by a `MemoryStore`
    pub fn new(lookup: ScriptedLookup) -> Self {
        Self::with_parts(
            fast_config(),
            Arc::new(MemoryStore::new()),
            lookup,
            HARNESS_SEED,
        )
    }
}

impl<L: BookLookup + 'static> Harness<L> {
    /// Must be called inside a tokio runtime
    pub fn with_parts(
        config: RuntimeConfig,
        store: Arc<dyn KeyValueStore>,
        lookup: L,
        seed: u64,
    ) -> Self {
        let clock = Arc::new(TokioClock::at_epoch());
        let lookup = Arc::new(lookup);
        let sheet = Arc::new(RecordingSheet::new());
        let chat = Arc::new(RecordingChat::new());
        let runtime = build_runtime(
            &config,
            &clock,
            &store,
            lookup.clone(),
            &sheet,
            &chat,
            seed,
        );
        Harness {
            config,
            clock,
            store,
            lookup,
            sheet,
            chat,
            runtime,
            seed,
            messages: 0,
        }
    }

    /// Replace the runtime as a restarted process would
    ///
    /// Collaborators, the store and the clock are kept.
    pub fn restart(&mut self) {
        self.seed = self.seed.wrapping_add(1);
        self.runtime = build_runtime(
            &self.config,
            &self.clock,
            &self.store,
            self.lookup.clone(),
            &self.sheet,
            &self.chat,
            self.seed,
        );
    }

    /// Next inbound message from "alice"
    pub fn message(&mut self, text: &str) -> InboundMessage {
        self.messages += 1;
        InboundMessage {
            handle: MessageHandle(format!("msg-{}", self.messages)),
            author: "alice".to_string(),
            text: text.to_string(),
        }
    }

    pub fn context(&self) -> &Arc<ThrottleContext> {
        self.runtime.context()
    }
}

fn build_runtime(
    config: &RuntimeConfig,
    clock: &Arc<TokioClock>,
    store: &Arc<dyn KeyValueStore>,
    lookup: Arc<dyn BookLookup>,
    sheet: &Arc<RecordingSheet>,
    chat: &Arc<RecordingChat>,
    seed: u64,
) -> Runtime {
    let gate = RateLimitGate::with_seed(config.cooldown.clone(), seed);
    let ctx = ThrottleContext::new(clock.clone(), Arc::clone(store), gate)
        .with_probe(Arc::new(StaticProbe(HARNESS_EGRESS_IP.to_string())));
    Runtime::with_context(config, Arc::new(ctx), lookup, sheet.clone(), chat.clone())
}
