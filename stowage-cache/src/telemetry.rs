//! STOWAGE Telemetry - Prometheus Metrics and Log Setup
//!
//! Metrics are registered once, globally, in the default Prometheus
//! registry. Exporter wiring is left to the embedding process, which can
//! scrape [`gather_text`].

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use stowage_core::{StowageError, StowageResult};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Regeneration latency buckets (seconds)
const REGENERATION_BUCKETS: &[f64] = &[0.005, 0.025, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

/// Global metrics instance - initialized on first use
pub static METRICS: Lazy<StowageResult<StowageMetrics>> = Lazy::new(StowageMetrics::new);

fn registration_error(metric: &str, e: prometheus::Error) -> StowageError {
    StowageError::Telemetry {
        reason: format!("Failed to register {}: {}", metric, e),
    }
}

/// Container for all STOWAGE metrics.
#[derive(Clone)]
pub struct StowageMetrics {
    /// Distinct artifact names in the published index - labels: tenant
    pub artifacts_served: GaugeVec,

    /// Versions across all names in the published index - labels: tenant
    pub artifact_versions_served: GaugeVec,

    /// Regeneration attempts - labels: tenant, outcome (success/error)
    pub regenerations_total: CounterVec,

    /// Objects skipped during regeneration - labels: tenant
    pub objects_skipped_total: CounterVec,

    /// Regeneration duration histogram - labels: tenant
    pub regeneration_duration_seconds: HistogramVec,
}

impl StowageMetrics {
    /// Create and register all metrics with Prometheus.
    pub fn new() -> StowageResult<Self> {
        Ok(Self {
            artifacts_served: register_gauge_vec!(
                "stowage_artifacts_served_total",
                "Number of distinct artifacts in the served index",
                &["tenant"]
            )
            .map_err(|e| registration_error("artifacts_served", e))?,

            artifact_versions_served: register_gauge_vec!(
                "stowage_artifact_versions_served_total",
                "Number of artifact versions in the served index",
                &["tenant"]
            )
            .map_err(|e| registration_error("artifact_versions_served", e))?,

            regenerations_total: register_counter_vec!(
                "stowage_regenerations_total",
                "Total index regenerations",
                &["tenant", "outcome"]
            )
            .map_err(|e| registration_error("regenerations_total", e))?,

            objects_skipped_total: register_counter_vec!(
                "stowage_objects_skipped_total",
                "Objects skipped during regeneration",
                &["tenant"]
            )
            .map_err(|e| registration_error("objects_skipped_total", e))?,

            regeneration_duration_seconds: register_histogram_vec!(
                "stowage_regeneration_duration_seconds",
                "Index regeneration duration in seconds",
                &["tenant"],
                REGENERATION_BUCKETS.to_vec()
            )
            .map_err(|e| registration_error("regeneration_duration_seconds", e))?,
        })
    }

    /// Set the served-index gauges for a tenant.
    pub fn set_index_size(&self, tenant: &str, artifacts: usize, versions: usize) {
        self.artifacts_served
            .with_label_values(&[tenant])
            .set(artifacts as f64);
        self.artifact_versions_served
            .with_label_values(&[tenant])
            .set(versions as f64);
    }

    /// Record a regeneration attempt.
    pub fn record_regeneration(&self, tenant: &str, success: bool, skipped: usize, duration_secs: f64) {
        let outcome = if success { "success" } else { "error" };
        self.regenerations_total
            .with_label_values(&[tenant, outcome])
            .inc();
        if skipped > 0 {
            self.objects_skipped_total
                .with_label_values(&[tenant])
                .inc_by(skipped as f64);
        }
        self.regeneration_duration_seconds
            .with_label_values(&[tenant])
            .observe(duration_secs);
    }
}

/// Metrics, if registration succeeded.
pub(crate) fn metrics() -> Option<&'static StowageMetrics> {
    match METRICS.as_ref() {
        Ok(metrics) => Some(metrics),
        Err(e) => {
            tracing::warn!(error = %e, "Metrics unavailable");
            None
        }
    }
}

/// Render every registered metric in the Prometheus text format.
pub fn gather_text() -> StowageResult<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| StowageError::Telemetry {
            reason: format!("Failed to encode metrics: {}", e),
        })?;
    String::from_utf8(buffer).map_err(|e| StowageError::Telemetry {
        reason: format!("Metrics output is not UTF-8: {}", e),
    })
}

/// Install the global tracing subscriber.
///
/// Honors `RUST_LOG`, defaulting to `info`. `json` selects structured JSON
/// lines instead of human-readable output.
pub fn init_tracing(json: bool) -> StowageResult<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(env_filter);

    let result = if json {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };

    result.map_err(|e| StowageError::Telemetry {
        reason: format!("Failed to init subscriber: {}", e),
    })
}
