//! Terminal outcomes and operation results.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

use crate::domain::MatchId;
use crate::error::Failure;

/// Identifies one virtual user, for bulk cancellation of its requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VirtualUserId(pub u64);

impl fmt::Display for VirtualUserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vu-{}", self.0)
    }
}

/// Why a pending request was torn down before a reply or a timeout.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// The load test was stopped.
    RunStopped,
    /// The owning virtual user was aborted.
    UserAborted,
    /// The engine is shutting down.
    Shutdown,
    /// The outbound message never left: the transport rejected it.
    SendFailed(String),
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RunStopped => f.write_str("run stopped"),
            Self::UserAborted => f.write_str("virtual user aborted"),
            Self::Shutdown => f.write_str("shutdown"),
            Self::SendFailed(e) => write!(f, "send failed: {e}"),
        }
    }
}

/// The single terminal event delivered to a continuation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<R> {
    Matched { response: R, elapsed: Duration },
    Timeout { elapsed: Duration },
    Cancelled { reason: CancelReason, elapsed: Duration },
}

/// Discriminant of an [`Outcome`], for counting and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Matched,
    Timeout,
    Cancelled,
}

impl OutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Matched => "matched",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        }
    }
}

impl<R> Outcome<R> {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Self::Matched { .. } => OutcomeKind::Matched,
            Self::Timeout { .. } => OutcomeKind::Timeout,
            Self::Cancelled { .. } => OutcomeKind::Cancelled,
        }
    }

    pub fn is_matched(&self) -> bool {
        matches!(self, Self::Matched { .. })
    }

    /// Time between registration and this outcome.
    pub fn elapsed(&self) -> Duration {
        match self {
            Self::Matched { elapsed, .. }
            | Self::Timeout { elapsed }
            | Self::Cancelled { elapsed, .. } => *elapsed,
        }
    }

    pub fn into_result(self) -> Result<R, Failure> {
        match self {
            Self::Matched { response, .. } => Ok(response),
            Self::Timeout { elapsed } => Err(Failure::Timeout { elapsed }),
            Self::Cancelled { reason, elapsed } => Err(Failure::Cancelled { reason, elapsed }),
        }
    }
}

/// Result of a successful `register`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub match_id: MatchId,
    pub registered_at: Instant,
    pub deadline: Instant,
}

/// Result of `resolve`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolutionResult {
    /// A pending request was found and its continuation handed the reply.
    Matched,
    /// Nothing pending under that id: never registered, already resolved,
    /// already expired, or past its deadline.
    Orphan,
}

impl ResolutionResult {
    pub fn is_matched(&self) -> bool {
        matches!(self, Self::Matched)
    }
}
