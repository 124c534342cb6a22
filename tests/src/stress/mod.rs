//! # Stress Tests
//!
//! Concurrent workers racing register, resolve, expire and cancel over a
//! shared id space. Every accepted registration must be delivered once.

pub mod exactly_once;
