//! Domain types: identifiers, time, messages, outcomes, configuration.

pub mod clock;
pub mod config;
pub mod deadline;
pub mod match_id;
pub mod message;
pub mod outcome;

pub use clock::{Clock, ManualClock, TokioClock};
pub use config::{CorrelationConfig, MatchStrategy, SweepMode, SweeperConfig};
pub use deadline::{DeadlineEntry, DeadlineQueue};
pub use match_id::MatchId;
pub use message::{MessageHeaders, MqMessage, PropertyValue, ReplyConvention};
pub use outcome::{
    CancelReason, Outcome, OutcomeKind, Registration, ResolutionResult, VirtualUserId,
};
