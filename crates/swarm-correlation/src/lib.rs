//! # Swarm Correlation - Request/Reply Matching for Load Generators
//!
//! Pairs asynchronous replies with the outbound requests that caused them, so
//! a suspended virtual user resumes with its reply, a timeout, or a
//! cancellation. Exactly one of the three, exactly once.
//!
//! ## Architecture
//!
//! ```text
//!   virtual user                                          remote system
//!        │ send(msg, continuation, timeout)                     ▲
//!        ▼                                                      │
//! ┌──────────────┐ prepare/derive ┌─────────────────┐  send     │
//! │   Engine     │ ─────────────► │ MessageMatcher  │ ──────────┘
//! │              │                └─────────────────┘
//! │              │ register                                    │ reply
//! │              │ ───────────┐   ┌─────────────────┐          ▼
//! └──────────────┘            └─► │    Registry     │ ◄── listeners: resolve()
//!                                 │ DashMap + heap  │
//!        ┌──────────────────────► │                 │ ◄── sweeper: expire()
//!        │                        └────────┬────────┘
//!  ExpirySweeper                           │ Outcome
//!                                          ▼
//!                                 ContinuationDispatcher ──► continuation
//! ```
//!
//! ## Guarantees
//!
//! - Every registered request gets exactly one terminal [`Outcome`]
//! - A duplicate registration is rejected and leaves the original untouched
//! - Replies for unknown, completed or overdue requests are orphans
//! - Timeouts fire no earlier than the deadline
//!
//! ## Usage
//!
//! ```ignore
//! use swarm_correlation::{channel, CorrelationConfig, CorrelationEngine, MqMessage};
//!
//! let (outbound, _) = channel::<MqMessage>(1024);
//! let engine = CorrelationEngine::builder(Arc::new(outbound))
//!     .config(CorrelationConfig::default())
//!     .build()?;
//! let outcome = engine.request(MqMessage::new("orders", body), None).await?;
//! ```

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod dispatcher;
pub mod domain;
pub mod error;
pub mod events;
pub mod matchers;
pub mod metrics;
pub mod ports;
pub mod registry;
pub mod service;
pub mod sweeper;

// Re-export main types
pub use dispatcher::{Continuation, ContinuationDispatcher, InlineDispatcher, TokioDispatcher};
pub use domain::{
    CancelReason, Clock, CorrelationConfig, ManualClock, MatchId, MatchStrategy, MessageHeaders,
    MqMessage, Outcome, OutcomeKind, PropertyValue, Registration, ReplyConvention,
    ResolutionResult, SweepMode, SweeperConfig, TokioClock, VirtualUserId,
};
pub use error::{
    ConfigError, CorrelationError, CorrelationResult, Failure, MatcherError, TransportError,
};
pub use events::{
    BroadcastObserver, CorrelationEvent, CorrelationObserver, NoOpObserver, ObserverChain,
    OrphanReason,
};
pub use matchers::{CorrelationIdMatcher, MessageIdMatcher, PropertyMatcher};
pub use metrics::{RegistryStats, StatsSnapshot};
pub use ports::{
    channel, ChannelReceiver, ChannelSender, MessageMatcher, MessageReceiver, MessageSender,
};
pub use registry::CorrelationRegistry;
pub use service::{CorrelationEngine, EngineBuilder};
pub use sweeper::{ExpirySweeper, SweeperHandle};
