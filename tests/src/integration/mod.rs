//! # Integration Tests
//!
//! Full request/reply flows across the correlation engine, the loopback
//! broker and the telemetry observers.

pub mod config_loading;
pub mod flows;
