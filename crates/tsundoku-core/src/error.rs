//! Error types for Tsundoku

use thiserror::Error;

/// Core Tsundoku errors
#[derive(Error, Debug)]
pub enum TsundokuError {
    // Identifier errors
    #[error("Invalid identifier format: {0}")]
    InvalidFormat(String),

    // Outbound call errors
    #[error("Throttled: {0}")]
    Throttled(String),

    #[error("Transient failure: {0}")]
    Transient(String),

    // Durable store errors
    #[error("Persistence failure on {key}: {reason}")]
    Persistence { key: String, reason: String },

    // Host errors
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TsundokuError {
    pub fn persistence(key: impl Into<String>, reason: impl ToString) -> Self {
        TsundokuError::Persistence {
            key: key.into(),
            reason: reason.to_string(),
        }
    }

    /// Taxonomy class of this error
    pub fn class(&self) -> ErrorClass {
        match self {
            TsundokuError::InvalidFormat(_) => ErrorClass::InvalidFormat,
            TsundokuError::Throttled(_) => ErrorClass::Throttled,
            TsundokuError::Transient(_) | TsundokuError::Io(_) => ErrorClass::Transient,
            TsundokuError::Persistence { .. } => ErrorClass::Persistence,
            TsundokuError::Config(_) => ErrorClass::Config,
        }
    }
}

/// Error taxonomy
///
/// Drives who sees a failure and whether it is retried:
/// - InvalidFormat: reported to the requester, never retried
/// - Throttled: trips the cooldown, never retried locally
/// - Transient: retried by the dispatcher, reported after exhaustion
/// - Persistence: logged, the component falls back to its safe default
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    InvalidFormat,
    Throttled,
    Transient,
    Persistence,
    Config,
}

impl ErrorClass {
    #[inline]
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorClass::Transient)
    }
}

/// Result type for Tsundoku operations
pub type TsundokuResult<T> = Result<T, TsundokuError>;
