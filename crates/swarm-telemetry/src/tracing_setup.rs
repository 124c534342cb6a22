//! Span export over OTLP (`otlp` feature).
//!
//! The engine opens `swarm.send`, `swarm.inbound` and `swarm.sweep` spans.
//! At load-generator rates that is one trace per request, so root spans are
//! sampled by `trace_sample_ratio` and children follow their parent.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{Config, Sampler, TracerProvider};
use opentelemetry_sdk::{runtime, Resource};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::logging::{console_layer, env_filter};
use crate::{TelemetryConfig, TelemetryError};

/// Flushes and stops span export when dropped.
pub struct TracingGuard {
    provider: TracerProvider,
}

impl Drop for TracingGuard {
    fn drop(&mut self) {
        for result in self.provider.force_flush() {
            if let Err(e) = result {
                eprintln!("swarm: flushing spans failed: {e}");
            }
        }
        if let Err(e) = self.provider.shutdown() {
            eprintln!("swarm: stopping span export failed: {e}");
        }
    }
}

fn sampler(ratio: f64) -> Sampler {
    let root = if ratio >= 1.0 {
        Sampler::AlwaysOn
    } else if ratio <= 0.0 {
        Sampler::AlwaysOff
    } else {
        Sampler::TraceIdRatioBased(ratio)
    };
    Sampler::ParentBased(Box::new(root))
}

fn resource(config: &TelemetryConfig) -> Resource {
    let mut attributes = vec![
        KeyValue::new("service.name", config.full_service_name()),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        KeyValue::new("swarm.trace_sample_ratio", config.trace_sample_ratio),
    ];
    if let Some(run_id) = &config.run_id {
        attributes.push(KeyValue::new("swarm.run_id", run_id.clone()));
    }
    Resource::new(attributes)
}

/// Install the global subscriber with OTLP span export.
///
/// Must be called from within a tokio runtime: spans are batched on it.
pub fn init_tracing(config: &TelemetryConfig) -> Result<TracingGuard, TelemetryError> {
    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(&config.otlp_endpoint);

    let provider = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(exporter)
        .with_trace_config(
            Config::default()
                .with_sampler(sampler(config.trace_sample_ratio))
                .with_resource(resource(config)),
        )
        .install_batch(runtime::Tokio)
        .map_err(|e| TelemetryError::TracerInit(e.to_string()))?;

    let tracer = provider.tracer("swarm-correlation");

    tracing_subscriber::registry()
        .with(env_filter(config)?)
        .with(tracing_opentelemetry::layer().with_tracer(tracer))
        .with(console_layer(config))
        .try_init()
        .map_err(|e| TelemetryError::TracerInit(e.to_string()))?;

    tracing::info!(
        endpoint = %config.otlp_endpoint,
        sample_ratio = config.trace_sample_ratio,
        "Exporting request spans"
    );

    Ok(TracingGuard { provider })
}
