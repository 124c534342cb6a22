//! Prometheus metrics for the correlation engine.
//!
//! All metrics follow the naming convention: `swarm_correlation_<metric>_<unit>`
//!
//! ## Metric Types
//!
//! - **Counter**: registrations, duplicates, outcomes by kind, orphans by reason
//! - **Gauge**: requests currently pending
//! - **Histogram**: reply latency and timeout lateness

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts,
    Registry, TextEncoder,
};
use swarm_correlation::{CorrelationEvent, CorrelationObserver};

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    /// Requests registered
    pub static ref REQUESTS_REGISTERED: Counter = Counter::new(
        "swarm_correlation_registered_total",
        "Total number of requests registered for a reply"
    ).expect("metric creation failed");

    /// Registrations rejected as duplicates
    pub static ref DUPLICATES_REJECTED: Counter = Counter::new(
        "swarm_correlation_duplicates_total",
        "Total number of registrations rejected because the match id was pending"
    ).expect("metric creation failed");

    /// Terminal outcomes delivered to virtual users
    pub static ref OUTCOMES: CounterVec = CounterVec::new(
        Opts::new("swarm_correlation_outcomes_total", "Terminal outcomes by kind"),
        &["outcome"]  // matched, timeout, cancelled
    ).expect("metric creation failed");

    /// Inbound messages or resolve attempts that matched nothing
    pub static ref ORPHANS: CounterVec = CounterVec::new(
        Opts::new("swarm_correlation_orphans_total", "Unmatched replies by reason"),
        &["reason"]  // unknown, late, malformed
    ).expect("metric creation failed");

    /// Requests waiting for a reply
    pub static ref PENDING_REQUESTS: Gauge = Gauge::new(
        "swarm_correlation_pending",
        "Requests currently waiting for a reply"
    ).expect("metric creation failed");

    /// Register-to-reply latency
    pub static ref REPLY_LATENCY: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "swarm_correlation_reply_latency_seconds",
            "Time between registration and the matching reply"
        ).buckets(exponential_buckets(0.0005, 2.0, 16).expect("valid buckets"))
    ).expect("metric creation failed");

    /// Gap between a deadline and its timeout delivery
    pub static ref EXPIRY_LATENESS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "swarm_correlation_expiry_lateness_seconds",
            "Delay between a request's deadline and its timeout delivery"
        ).buckets(exponential_buckets(0.0001, 2.0, 12).expect("valid buckets"))
    ).expect("metric creation failed");
}

/// Register all metrics with [`REGISTRY`]. Safe to call more than once.
pub fn register_metrics() -> Result<(), TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(REQUESTS_REGISTERED.clone()),
        Box::new(DUPLICATES_REJECTED.clone()),
        Box::new(OUTCOMES.clone()),
        Box::new(ORPHANS.clone()),
        Box::new(PENDING_REQUESTS.clone()),
        Box::new(REPLY_LATENCY.clone()),
        Box::new(EXPIRY_LATENESS.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }
    Ok(())
}

/// Encode all metrics as Prometheus text format.
pub fn gather_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

/// Feeds registry transitions into the Prometheus metrics.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrometheusObserver;

impl PrometheusObserver {
    /// Registers the metrics, then returns the observer.
    pub fn new() -> Result<Self, TelemetryError> {
        register_metrics()?;
        Ok(Self)
    }
}

impl CorrelationObserver for PrometheusObserver {
    fn on_event(&self, event: &CorrelationEvent) {
        match event {
            CorrelationEvent::Registered { .. } => {
                REQUESTS_REGISTERED.inc();
                PENDING_REQUESTS.inc();
            }
            CorrelationEvent::DuplicateRejected { .. } => DUPLICATES_REJECTED.inc(),
            CorrelationEvent::Matched { elapsed, .. } => {
                OUTCOMES.with_label_values(&["matched"]).inc();
                PENDING_REQUESTS.dec();
                REPLY_LATENCY.observe(elapsed.as_secs_f64());
            }
            CorrelationEvent::Expired { lateness, .. } => {
                OUTCOMES.with_label_values(&["timeout"]).inc();
                PENDING_REQUESTS.dec();
                EXPIRY_LATENESS.observe(lateness.as_secs_f64());
            }
            CorrelationEvent::Cancelled { .. } => {
                OUTCOMES.with_label_values(&["cancelled"]).inc();
                PENDING_REQUESTS.dec();
            }
            CorrelationEvent::Orphaned { reason, .. } => {
                ORPHANS.with_label_values(&[reason.as_str()]).inc();
            }
        }
    }
}
