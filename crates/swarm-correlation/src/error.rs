//! Error types for the correlation engine.
//!
//! Only registration and send-path failures surface to callers as errors.
//! Everything after a successful registration resolves into exactly one
//! [`Outcome`](crate::domain::Outcome) delivered to the continuation.

use std::time::Duration;
use thiserror::Error;

use crate::domain::{CancelReason, MatchId};

/// Errors raised synchronously by the registry and the engine.
#[derive(Debug, Error)]
pub enum CorrelationError {
    /// A request with this match id is already pending.
    ///
    /// Points at a scenario or matcher defect; never retried.
    #[error("Duplicate correlation: {match_id} is already pending")]
    DuplicateCorrelation { match_id: MatchId },

    /// The registry was closed; no new requests are accepted.
    #[error("Registry is closed to new requests")]
    ShuttingDown,

    /// `now + timeout` does not fit in the monotonic clock.
    #[error("Invalid timeout: {timeout:?} overflows the clock")]
    InvalidTimeout { timeout: Duration },

    /// The matcher could not stamp or read the outbound message.
    #[error("Matcher error: {0}")]
    Matcher(#[from] MatcherError),

    /// The transport refused the outbound message.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The engine configuration failed validation.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The continuation was dropped before an outcome arrived.
    #[error("Continuation dropped before an outcome was delivered")]
    ContinuationDropped,

    /// No tokio runtime is available to hand continuations off to.
    #[error("No tokio runtime available: {0}")]
    NoRuntime(String),
}

/// Failures of a [`MessageMatcher`](crate::ports::MessageMatcher).
///
/// On the outbound path these abort one send attempt. On the inbound path they
/// turn the message into a malformed orphan.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MatcherError {
    #[error("Field {field} cannot be written: message is read-only")]
    ReadOnly { field: String },

    #[error("Field {field} is missing")]
    MissingField { field: String },

    #[error("Field {field} is malformed: {reason}")]
    Malformed { field: String, reason: String },

    #[error("Field {field} is not supported by this transport")]
    Unsupported { field: String },
}

impl MatcherError {
    pub fn missing(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    pub fn malformed(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn read_only(field: impl Into<String>) -> Self {
        Self::ReadOnly {
            field: field.into(),
        }
    }
}

/// Transport port errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("channel closed")]
    ChannelClosed,
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("receive failed: {0}")]
    ReceiveFailed(String),
}

/// Terminal failure of a request, as seen by the virtual user.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Failure {
    #[error("no reply within {elapsed:?}")]
    Timeout { elapsed: Duration },

    #[error("request cancelled after {elapsed:?}: {reason}")]
    Cancelled {
        reason: CancelReason,
        elapsed: Duration,
    },
}

/// Configuration errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Failed to read {path}: {error}")]
    Io { path: String, error: String },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid timeout: {0}")]
    InvalidTimeout(String),

    #[error("Invalid sweeper setting: {0}")]
    InvalidSweeper(String),

    #[error("Invalid listener count: {0}")]
    InvalidListeners(String),

    #[error("Invalid match strategy: {0}")]
    InvalidStrategy(String),
}

/// Result alias for registry and engine operations.
pub type CorrelationResult<T> = Result<T, CorrelationError>;
