use super::required;
use crate::domain::message::fields;
use crate::domain::{MatchId, MessageHeaders};
use crate::error::MatcherError;
use crate::ports::MessageMatcher;

/// Request/reply by generated correlation id.
///
/// Every prepared request gets a fresh UUID v7 correlation id, which the
/// responder echoes back unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct CorrelationIdMatcher;

impl<M: MessageHeaders> MessageMatcher<M> for CorrelationIdMatcher {
    fn prepare_request(&self, message: &mut M) -> Result<(), MatcherError> {
        message.set_correlation_id(MatchId::generate().into_string())
    }

    fn request_match_id(&self, message: &M) -> Result<MatchId, MatcherError> {
        required(fields::CORRELATION_ID, message.correlation_id())
    }

    fn response_match_id(&self, message: &M) -> Result<MatchId, MatcherError> {
        required(fields::CORRELATION_ID, message.correlation_id())
    }

    fn name(&self) -> &'static str {
        "correlation_id"
    }
}
