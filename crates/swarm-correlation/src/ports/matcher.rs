//! Message matcher port.
//!
//! A matcher is the only protocol-aware piece of the engine: it stamps outbound
//! messages with correlation state and derives the same [`MatchId`] from the
//! request and from its reply.

use crate::domain::MatchId;
use crate::error::MatcherError;

/// Pluggable correlation strategy over a transport's message type `M`.
///
/// Implementations must guarantee
/// `response_match_id(reply) == request_match_id(prepared_request)`
/// for every reply the remote side produces for that request.
pub trait MessageMatcher<M>: Send + Sync {
    /// Attach whatever correlation metadata the strategy needs.
    ///
    /// # Errors
    ///
    /// Fails if the message cannot carry the required field. The send attempt
    /// is abandoned; nothing has been registered yet.
    fn prepare_request(&self, message: &mut M) -> Result<(), MatcherError>;

    /// Match id this prepared outbound message expects in its reply.
    fn request_match_id(&self, message: &M) -> Result<MatchId, MatcherError>;

    /// Match id an inbound message claims to satisfy.
    ///
    /// # Errors
    ///
    /// Fails if the field is absent or malformed. Callers treat the message as
    /// an orphan.
    fn response_match_id(&self, message: &M) -> Result<MatchId, MatcherError>;

    /// Short name used in logs and metrics labels.
    fn name(&self) -> &'static str;
}
