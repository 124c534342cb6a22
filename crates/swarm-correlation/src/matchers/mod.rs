//! Bundled matchers for header-addressable messages.

mod correlation_id;
mod message_id;
mod property;

pub use correlation_id::CorrelationIdMatcher;
pub use message_id::MessageIdMatcher;
pub use property::PropertyMatcher;

use std::sync::Arc;

use crate::domain::{MatchId, MatchStrategy, MessageHeaders};
use crate::error::MatcherError;
use crate::ports::MessageMatcher;

/// Build the matcher selected in configuration.
pub fn from_strategy<M>(strategy: &MatchStrategy) -> Arc<dyn MessageMatcher<M>>
where
    M: MessageHeaders + 'static,
{
    match strategy {
        MatchStrategy::MessageId => Arc::new(MessageIdMatcher),
        MatchStrategy::CorrelationId => Arc::new(CorrelationIdMatcher),
        MatchStrategy::Property { name } => Arc::new(PropertyMatcher::new(name.clone())),
    }
}

/// A present, non-empty header value as a match id.
fn required(field: &str, value: Option<&str>) -> Result<MatchId, MatcherError> {
    match value {
        None => Err(MatcherError::missing(field)),
        Some(v) if v.trim().is_empty() => Err(MatcherError::malformed(field, "empty value")),
        Some(v) => Ok(MatchId::new(v)),
    }
}
