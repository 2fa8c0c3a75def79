//! Runtime wiring
//!
//! Builds the shared `ThrottleContext` once and hands it to the dispatcher,
//! the lifecycle planner and the batch processor. `start_session` drives
//! the planner's directives up to a live chat connection.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

use tsundoku_core::{Clock, KeyValueStore};
use tsundoku_throttle::{
    Dispatcher, EgressProbe, HostDirective, LifecyclePlanner, RateLimitGate, StatsSnapshot,
    ThrottleContext,
};

use crate::batch::{BatchProcessor, BatchReport};
use crate::collaborators::{BookLookup, Chat, InboundMessage, Sheet};
use crate::config::RuntimeConfig;

/// How a session start ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionStart {
    Connected,
    /// Sleep `after`, then exit; `failed` marks a non-throttle failure
    Exit { after: Duration, failed: bool },
}

/// Everything the host needs, wired around one throttle context
pub struct Runtime {
    ctx: Arc<ThrottleContext>,
    dispatcher: Arc<Dispatcher>,
    planner: LifecyclePlanner,
    processor: BatchProcessor,
    chat: Arc<dyn Chat>,
}

impl Runtime {
    pub fn build(
        config: &RuntimeConfig,
        clock: Arc<dyn Clock>,
        store: Arc<dyn KeyValueStore>,
        probe: Arc<dyn EgressProbe>,
        lookup: Arc<dyn BookLookup>,
        sheet: Arc<dyn Sheet>,
        chat: Arc<dyn Chat>,
    ) -> Self {
        let gate = RateLimitGate::new(config.cooldown.clone());
        let ctx = Arc::new(ThrottleContext::new(clock, store, gate).with_probe(probe));
        Self::with_context(config, ctx, lookup, sheet, chat)
    }

    /// Wire around an existing context (deterministic gates in tests)
    pub fn with_context(
        config: &RuntimeConfig,
        ctx: Arc<ThrottleContext>,
        lookup: Arc<dyn BookLookup>,
        sheet: Arc<dyn Sheet>,
        chat: Arc<dyn Chat>,
    ) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&ctx), config.dispatch.clone()));
        let planner = LifecyclePlanner::new(
            Arc::clone(&ctx),
            config.admission.clone(),
            config.lifecycle.clone(),
        );
        let processor = BatchProcessor::new(
            Arc::clone(&dispatcher),
            lookup,
            sheet,
            Arc::clone(&chat),
            config.batch.clone(),
        );
        Runtime {
            ctx,
            dispatcher,
            planner,
            processor,
            chat,
        }
    }

    pub fn context(&self) -> &Arc<ThrottleContext> {
        &self.ctx
    }

    pub fn planner(&self) -> &LifecyclePlanner {
        &self.planner
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.dispatcher.stats()
    }

    /// Admission, startup pause and connection, obeying every directive
    pub async fn start_session(&self) -> SessionStart {
        let mut directive = self.planner.startup();
        if let HostDirective::SleepThenExit(after) = directive {
            return SessionStart::Exit {
                after,
                failed: false,
            };
        }

        tracing::info!(
            pause_secs = self.planner.config().startup_pause.as_secs(),
            "pausing before first connection"
        );
        sleep(self.planner.config().startup_pause).await;

        loop {
            directive = match directive {
                HostDirective::Proceed => match self.chat.connect().await {
                    Ok(()) => {
                        tracing::info!("connected");
                        return SessionStart::Connected;
                    }
                    Err(failure) => match self.planner.on_connect_failure(&failure).await {
                        HostDirective::SleepThenExit(after) => {
                            return SessionStart::Exit {
                                after,
                                failed: self.ctx.active_cooldown().is_none(),
                            };
                        }
                        HostDirective::SleepThenRetry(wait) => {
                            sleep(wait).await;
                            self.planner.before_connect()
                        }
                        HostDirective::Proceed => self.planner.before_connect(),
                    },
                },
                HostDirective::SleepThenRetry(wait) => {
                    sleep(wait).await;
                    self.planner.before_connect()
                }
                HostDirective::SleepThenExit(after) => {
                    return SessionStart::Exit {
                        after,
                        failed: false,
                    };
                }
            };
        }
    }

    /// Run one inbound message through the batch pipeline
    pub async fn process(&self, message: &InboundMessage) -> BatchReport {
        self.processor.process(message).await
    }

    /// Time left in the active cooldown, if any
    pub fn cooldown_remaining(&self) -> Option<Duration> {
        let now = self.ctx.now();
        self.ctx.active_cooldown().map(|e| e.remaining(now))
    }
}
