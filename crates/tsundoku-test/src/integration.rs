//! End-to-end scenarios
//!
//! Every scenario runs a real `Runtime` on paused tokio time:
//! - Batches: duplicates, repairs, format errors, timeouts, bucket waits
//! - Cooldown: mid-batch throttles, skipped work, persistence, restarts
//! - Lifecycle: admission ceiling, connection failures
//! - Degraded persistence
