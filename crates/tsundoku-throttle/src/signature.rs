//! Throttle signature classification
//!
//! Decides what a failed `CallOutcome` means for the caller:
//! - a short, explicitly hinted 429 is a bucket wait, honored exactly
//! - any other 429, or an error text matching the signature, is a throttle
//! - everything else is transient

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use tsundoku_core::{CallOutcome, ErrorClass};

static THROTTLE_SIGNATURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b429\b|rate[ -]?limit|too many requests")
        .expect("throttle signature is a valid regex")
});

/// True if free-form error text looks like a throttling response
pub fn matches_throttle_signature(text: &str) -> bool {
    THROTTLE_SIGNATURE.is_match(text)
}

/// Classification of a failed call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Call succeeded
    Ok,
    /// Per-route bucket exhausted; wait exactly this long and retry
    BucketWait(Duration),
    /// Global throttle; enter cooldown, never retry locally
    Throttle,
    /// Ordinary failure; retry with backoff
    Transient,
}

impl Verdict {
    #[inline]
    pub fn is_throttle(self) -> bool {
        matches!(self, Verdict::Throttle)
    }

    /// Error class of a failed call; `None` for success
    pub fn class(self) -> Option<ErrorClass> {
        match self {
            Verdict::Ok => None,
            Verdict::Throttle => Some(ErrorClass::Throttled),
            Verdict::BucketWait(_) | Verdict::Transient => Some(ErrorClass::Transient),
        }
    }
}

/// Classify an outcome
///
/// `max_bucket_wait` bounds which server hints are honored as bucket waits;
/// a longer hint is treated as a throttle.
pub fn classify(outcome: &CallOutcome, max_bucket_wait: Duration) -> Verdict {
    if outcome.succeeded {
        return Verdict::Ok;
    }
    if outcome.is_too_many_requests() {
        return match outcome.retry_after {
            Some(wait) if wait <= max_bucket_wait => Verdict::BucketWait(wait),
            _ => Verdict::Throttle,
        };
    }
    match &outcome.raw_error {
        Some(err) if matches_throttle_signature(err) => Verdict::Throttle,
        _ => Verdict::Transient,
    }
}
