//! Outcome of a single attempt at an outbound call
//!
//! Outbound collaborators (lookup, spreadsheet append, chat reply) report
//! failures as data instead of unwinding, so retry and cooldown logic can
//! inspect status codes and server wait hints directly.

use std::fmt;
use std::time::Duration;

/// HTTP status used by every throttling service we talk to
pub const HTTP_TOO_MANY_REQUESTS: u16 = 429;

/// Result of one attempt at an outbound operation
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CallOutcome {
    pub succeeded: bool,
    pub http_status: Option<u16>,
    /// Server-provided wait hint (e.g. `Retry-After`)
    pub retry_after: Option<Duration>,
    pub raw_error: Option<String>,
}

impl CallOutcome {
    pub fn success() -> Self {
        CallOutcome {
            succeeded: true,
            ..Default::default()
        }
    }

    /// Failure described only by an error message
    pub fn failure(raw_error: impl Into<String>) -> Self {
        CallOutcome {
            succeeded: false,
            raw_error: Some(raw_error.into()),
            ..Default::default()
        }
    }

    /// Failure carrying an HTTP status
    pub fn http(status: u16) -> Self {
        CallOutcome {
            succeeded: false,
            http_status: Some(status),
            raw_error: Some(format!("HTTP {}", status)),
            ..Default::default()
        }
    }

    /// A call that did not complete within its deadline
    pub fn timeout(limit: Duration) -> Self {
        Self::failure(format!("timed out after {:?}", limit))
    }

    pub fn with_retry_after(mut self, wait: Duration) -> Self {
        self.retry_after = Some(wait);
        self
    }

    pub fn with_error(mut self, raw_error: impl Into<String>) -> Self {
        self.raw_error = Some(raw_error.into());
        self
    }

    #[inline]
    pub fn is_too_many_requests(&self) -> bool {
        self.http_status == Some(HTTP_TOO_MANY_REQUESTS)
    }

    /// Short human-readable description for logs and audit records
    pub fn describe(&self) -> String {
        match (&self.raw_error, self.http_status) {
            (Some(err), _) => err.clone(),
            (None, Some(status)) => format!("HTTP {}", status),
            (None, None) if self.succeeded => "ok".to_string(),
            (None, None) => "unknown failure".to_string(),
        }
    }
}

impl fmt::Display for CallOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())?;
        if let Some(wait) = self.retry_after {
            write!(f, " (retry after {:?})", wait)?;
        }
        Ok(())
    }
}
