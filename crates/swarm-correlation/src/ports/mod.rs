//! Ports (traits) the engine depends on.

pub mod matcher;
pub mod transport;

pub use matcher::MessageMatcher;
pub use transport::{channel, ChannelReceiver, ChannelSender, MessageReceiver, MessageSender};
