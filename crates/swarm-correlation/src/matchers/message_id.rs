use uuid::Uuid;

use super::required;
use crate::domain::message::fields;
use crate::domain::{MatchId, MessageHeaders};
use crate::error::MatcherError;
use crate::ports::MessageMatcher;

/// Request/reply by message id.
///
/// The request's own message id becomes the expected value of the reply's
/// correlation id. Requests without a message id get one assigned at
/// preparation, so the id is known before the message is sent.
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageIdMatcher;

impl<M: MessageHeaders> MessageMatcher<M> for MessageIdMatcher {
    fn prepare_request(&self, message: &mut M) -> Result<(), MatcherError> {
        if message.message_id().is_none() {
            message.set_message_id(format!("ID:{}", Uuid::now_v7()))?;
        }
        Ok(())
    }

    fn request_match_id(&self, message: &M) -> Result<MatchId, MatcherError> {
        required(fields::MESSAGE_ID, message.message_id())
    }

    fn response_match_id(&self, message: &M) -> Result<MatchId, MatcherError> {
        required(fields::CORRELATION_ID, message.correlation_id())
    }

    fn name(&self) -> &'static str {
        "message_id"
    }
}
