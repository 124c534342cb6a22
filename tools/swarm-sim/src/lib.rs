//! Swarm-Sim: closed-loop load simulation against a loopback broker.
//!
//! Exercises the correlation engine end to end without a real message
//! broker: virtual users send requests, the broker answers or drops them, and
//! the engine matches replies, times out the rest and reports.

pub mod broker;
pub mod report;
pub mod scenario;
