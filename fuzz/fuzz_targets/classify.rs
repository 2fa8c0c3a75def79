#![no_main]

use std::time::Duration;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use tsundoku_core::CallOutcome;
use tsundoku_throttle::{classify, Verdict};

#[derive(Arbitrary, Debug)]
struct Input {
    status: Option<u16>,
    retry_after_ms: Option<u32>,
    error: Option<String>,
}

fuzz_target!(|input: Input| {
    let mut outcome = match input.status {
        Some(status) => CallOutcome::http(status),
        None => CallOutcome::failure(input.error.clone().unwrap_or_default()),
    };
    if let Some(ms) = input.retry_after_ms {
        outcome = outcome.with_retry_after(Duration::from_millis(ms as u64));
    }
    if let (Some(_), Some(error)) = (input.status, input.error) {
        outcome = outcome.with_error(error);
    }

    let max = Duration::from_secs(60);
    if let Verdict::BucketWait(wait) = classify(&outcome, max) {
        assert!(wait <= max);
        assert!(outcome.is_too_many_requests());
    }
});
