//! Telemetry configuration from environment variables.

use std::env;

const DEFAULT_SAMPLE_RATIO: f64 = 0.01;

/// Configuration for logging, metrics and trace export.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryConfig {
    /// Service name for traces and logs
    pub service_name: String,

    /// Log level filter (trace, debug, info, warn, error, or a full directive)
    pub log_level: String,

    /// Whether to enable console output
    pub console_output: bool,

    /// Whether to format logs as JSON
    pub json_logs: bool,

    /// OTLP endpoint, used with the `otlp` feature
    pub otlp_endpoint: String,

    /// Load test run identifier, attached to exported traces
    pub run_id: Option<String>,

    /// Fraction of root spans exported, in `[0, 1]`. Every request opens a
    /// span, so full sampling is only sensible for small runs.
    pub trace_sample_ratio: f64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "swarm".to_string(),
            log_level: "info".to_string(),
            console_output: true,
            json_logs: false,
            otlp_endpoint: "http://localhost:4317".to_string(),
            run_id: None,
            trace_sample_ratio: DEFAULT_SAMPLE_RATIO,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `OTEL_SERVICE_NAME`: Service name (default: swarm)
    /// - `SWARM_LOG_LEVEL` or `RUST_LOG`: Log level (default: info)
    /// - `SWARM_CONSOLE_OUTPUT`: Enable console output (default: true)
    /// - `SWARM_JSON_LOGS`: Enable JSON logs (default: false, true in containers)
    /// - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: http://localhost:4317)
    /// - `SWARM_RUN_ID`: Run identifier
    /// - `SWARM_TRACE_SAMPLE_RATIO`: Fraction of traces exported (default: 0.01)
    pub fn from_env() -> Self {
        let is_container =
            env::var("KUBERNETES_SERVICE_HOST").is_ok() || env::var("DOCKER_CONTAINER").is_ok();

        Self {
            service_name: env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| "swarm".to_string()),

            log_level: env::var("SWARM_LOG_LEVEL")
                .or_else(|_| env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string()),

            console_output: env::var("SWARM_CONSOLE_OUTPUT")
                .map(|v| parse_flag(&v))
                .unwrap_or(true),

            json_logs: env::var("SWARM_JSON_LOGS")
                .map(|v| parse_flag(&v))
                .unwrap_or(is_container),

            otlp_endpoint: env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
                .unwrap_or_else(|_| "http://localhost:4317".to_string()),

            run_id: env::var("SWARM_RUN_ID").ok().filter(|v| !v.is_empty()),

            trace_sample_ratio: env::var("SWARM_TRACE_SAMPLE_RATIO")
                .ok()
                .and_then(|v| parse_ratio(&v))
                .unwrap_or(DEFAULT_SAMPLE_RATIO),
        }
    }

    /// Service name including the run id, if any.
    pub fn full_service_name(&self) -> String {
        match &self.run_id {
            Some(run) => format!("{}-{}", self.service_name, run),
            None => self.service_name.clone(),
        }
    }
}

/// Ratio in `[0, 1]`; anything else is ignored.
fn parse_ratio(value: &str) -> Option<f64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|r| (0.0..=1.0).contains(r))
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
