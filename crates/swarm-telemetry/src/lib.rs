//! # Swarm Telemetry
//!
//! Observability for the correlation engine.
//!
//! ## Components
//!
//! - **Logging**: `tracing-subscriber` with an env filter, pretty or JSON output
//! - **Metrics**: Prometheus counters fed by [`PrometheusObserver`]
//! - **Traces**: OTLP export (`otlp` feature)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use swarm_telemetry::{init_telemetry, PrometheusObserver, TelemetryConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let _guard = init_telemetry(TelemetryConfig::from_env()).await?;
//!     let observer = Arc::new(PrometheusObserver::new()?);
//!     // hand `observer` to the engine builder
//!     Ok(())
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `SWARM_LOG_LEVEL` | `info` | Log level filter (`RUST_LOG` also honoured) |
//! | `SWARM_JSON_LOGS` | `false` | JSON log lines |
//! | `OTEL_SERVICE_NAME` | `swarm` | Service name in traces |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | `http://localhost:4317` | OTLP endpoint |
//! | `SWARM_RUN_ID` | unset | Run identifier attached to traces |

mod config;
mod logging;
mod metrics;
#[cfg(feature = "otlp")]
mod tracing_setup;

pub use config::TelemetryConfig;
pub use logging::init_logging;
pub use metrics::{
    gather_metrics, register_metrics, PrometheusObserver, DUPLICATES_REJECTED, EXPIRY_LATENESS,
    ORPHANS, OUTCOMES, PENDING_REQUESTS, REGISTRY, REPLY_LATENCY, REQUESTS_REGISTERED,
};
#[cfg(feature = "otlp")]
pub use tracing_setup::TracingGuard;

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    #[error("Failed to initialize OpenTelemetry tracer: {0}")]
    TracerInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Initialize metrics and the global subscriber.
///
/// Returns a guard that must be held for the lifetime of the application.
/// With the `otlp` feature, dropping it flushes pending spans.
pub async fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    register_metrics()?;

    #[cfg(feature = "otlp")]
    let tracing = tracing_setup::init_tracing(&config)?;
    #[cfg(not(feature = "otlp"))]
    logging::init_logging(&config)?;

    Ok(TelemetryGuard {
        #[cfg(feature = "otlp")]
        _tracing: tracing,
    })
}

/// Guard that keeps telemetry active. Drop to flush and shutdown.
pub struct TelemetryGuard {
    #[cfg(feature = "otlp")]
    _tracing: TracingGuard,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!("Shutting down telemetry...");
    }
}
