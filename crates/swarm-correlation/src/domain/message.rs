//! Message model seen by matchers.
//!
//! The engine never looks inside a body. Matchers only read and write the
//! header fields exposed by [`MessageHeaders`], which any transport's message
//! type can implement.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::MatcherError;

/// Header field names, as reported in matcher errors.
pub mod fields {
    pub const MESSAGE_ID: &str = "message_id";
    pub const CORRELATION_ID: &str = "correlation_id";
}

/// Typed application property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    String(String),
    Int(i64),
    Bool(bool),
    Bytes(Vec<u8>),
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Header access required by the bundled matchers.
pub trait MessageHeaders {
    fn message_id(&self) -> Option<&str>;
    fn set_message_id(&mut self, id: String) -> Result<(), MatcherError>;

    fn correlation_id(&self) -> Option<&str>;
    fn set_correlation_id(&mut self, id: String) -> Result<(), MatcherError>;

    fn property(&self, name: &str) -> Option<&PropertyValue>;
    fn set_property(&mut self, name: &str, value: PropertyValue) -> Result<(), MatcherError>;
}

/// In-memory message-queue message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MqMessage {
    pub message_id: Option<String>,
    pub correlation_id: Option<String>,
    pub destination: String,
    pub reply_to: Option<String>,
    pub properties: HashMap<String, PropertyValue>,
    pub body: Bytes,
    read_only: bool,
}

/// Which request header a responder copies into the reply's correlation id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReplyConvention {
    /// Reply correlation id is the request's message id
    CopyMessageId,
    /// Reply correlation id is the request's correlation id, or its message
    /// id when it carries none
    #[default]
    PassCorrelationId,
}

impl MqMessage {
    pub fn new(destination: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            destination: destination.into(),
            body: body.into(),
            ..Self::default()
        }
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Reply the way a conventional responder builds one.
    ///
    /// Addressed to `reply_to` (or back to `destination`), with the
    /// correlation id chosen by `convention`. Application properties are
    /// copied.
    pub fn reply(&self, body: impl Into<Bytes>, convention: ReplyConvention) -> Self {
        let correlation_id = match convention {
            ReplyConvention::CopyMessageId => self.message_id.clone(),
            ReplyConvention::PassCorrelationId => self
                .correlation_id
                .clone()
                .or_else(|| self.message_id.clone()),
        };
        Self {
            message_id: None,
            correlation_id,
            destination: self
                .reply_to
                .clone()
                .unwrap_or_else(|| self.destination.clone()),
            reply_to: None,
            properties: self.properties.clone(),
            body: body.into(),
            read_only: false,
        }
    }

    /// Freeze headers, as a broker does once a message has been delivered.
    pub fn mark_read_only(&mut self) {
        self.read_only = true;
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn ensure_writable(&self, field: &str) -> Result<(), MatcherError> {
        if self.read_only {
            return Err(MatcherError::read_only(field));
        }
        Ok(())
    }
}

impl MessageHeaders for MqMessage {
    fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    fn set_message_id(&mut self, id: String) -> Result<(), MatcherError> {
        self.ensure_writable(fields::MESSAGE_ID)?;
        self.message_id = Some(id);
        Ok(())
    }

    fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    fn set_correlation_id(&mut self, id: String) -> Result<(), MatcherError> {
        self.ensure_writable(fields::CORRELATION_ID)?;
        self.correlation_id = Some(id);
        Ok(())
    }

    fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }

    fn set_property(&mut self, name: &str, value: PropertyValue) -> Result<(), MatcherError> {
        self.ensure_writable(name)?;
        self.properties.insert(name.to_string(), value);
        Ok(())
    }
}
