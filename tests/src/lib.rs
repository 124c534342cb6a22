//! # Swarm Test Suite
//!
//! Unified test crate containing:
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── integration/   # Engine + broker + telemetry, end to end
//! └── stress/        # Multi-threaded exactly-once checks on the registry
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p swarm-tests
//!
//! # By category
//! cargo test -p swarm-tests integration::
//! cargo test -p swarm-tests stress::
//!
//! # Benchmarks
//! cargo bench -p swarm-tests
//! ```

pub mod integration;
pub mod stress;
