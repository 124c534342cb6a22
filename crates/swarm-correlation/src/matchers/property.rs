use crate::domain::{MatchId, MessageHeaders, PropertyValue};
use crate::error::MatcherError;
use crate::ports::MessageMatcher;

/// Request/reply by a named application property.
///
/// For brokers or protocols where the standard headers are reserved or
/// rewritten in transit. A value already present on the request (set by the
/// scenario) is kept; otherwise a fresh token is generated.
#[derive(Debug, Clone)]
pub struct PropertyMatcher {
    name: String,
}

impl PropertyMatcher {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn property_name(&self) -> &str {
        &self.name
    }

    fn extract<M: MessageHeaders>(&self, message: &M) -> Result<MatchId, MatcherError> {
        match message.property(&self.name) {
            None => Err(MatcherError::missing(&self.name)),
            Some(PropertyValue::String(s)) if s.trim().is_empty() => {
                Err(MatcherError::malformed(&self.name, "empty value"))
            }
            Some(PropertyValue::String(s)) => Ok(MatchId::new(s.as_str())),
            Some(PropertyValue::Int(i)) => Ok(MatchId::new(i.to_string())),
            Some(PropertyValue::Bytes(b)) if b.is_empty() => {
                Err(MatcherError::malformed(&self.name, "empty value"))
            }
            Some(PropertyValue::Bytes(b)) => Ok(MatchId::from_bytes(b)),
            Some(PropertyValue::Bool(_)) => Err(MatcherError::malformed(
                &self.name,
                "boolean cannot identify a request",
            )),
        }
    }
}

impl<M: MessageHeaders> MessageMatcher<M> for PropertyMatcher {
    fn prepare_request(&self, message: &mut M) -> Result<(), MatcherError> {
        if message.property(&self.name).is_some() {
            return Ok(());
        }
        message.set_property(
            &self.name,
            PropertyValue::String(MatchId::generate().into_string()),
        )
    }

    fn request_match_id(&self, message: &M) -> Result<MatchId, MatcherError> {
        self.extract(message)
    }

    fn response_match_id(&self, message: &M) -> Result<MatchId, MatcherError> {
        self.extract(message)
    }

    fn name(&self) -> &'static str {
        "property"
    }
}
