//! Observability infrastructure for the learning engine
//!
//! Provides:
//! - Prometheus metrics (prediction latency, training duration, corpus size, bundle version)
//! - Structured JSON logging of lifecycle events with tracing

use crate::ensemble::ModelKind;
use crate::models::{BundleVersion, Label};
use prometheus::{
    register_gauge_vec, register_histogram, register_int_counter, register_int_gauge, GaugeVec, Histogram,
    IntCounter, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for prediction latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0];

/// Histogram buckets for training runs (in seconds)
const TRAINING_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<EngineMetricsInner> = OnceLock::new();

struct EngineMetricsInner {
    prediction_latency_seconds: Histogram,
    training_duration_seconds: Histogram,
    corpus_samples: IntGauge,
    bundle_version_info: GaugeVec,
    predictions_total: IntCounter,
    training_runs_total: IntCounter,
    training_failures_total: IntCounter,
}

impl EngineMetricsInner {
    fn new() -> Self {
        Self {
            prediction_latency_seconds: register_histogram!(
                "outcome_engine_prediction_latency_seconds",
                "Time spent producing an ensemble prediction",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register prediction_latency_seconds"),

            training_duration_seconds: register_histogram!(
                "outcome_engine_training_duration_seconds",
                "Wall time of training runs, including persistence",
                TRAINING_BUCKETS.to_vec()
            )
            .expect("Failed to register training_duration_seconds"),

            corpus_samples: register_int_gauge!(
                "outcome_engine_corpus_samples",
                "Number of interactions in the corpus"
            )
            .expect("Failed to register corpus_samples"),

            bundle_version_info: register_gauge_vec!(
                "outcome_engine_bundle_version_info",
                "Version of the bundle currently being served",
                &["version"]
            )
            .expect("Failed to register bundle_version_info"),

            predictions_total: register_int_counter!(
                "outcome_engine_predictions_total",
                "Total number of predictions served"
            )
            .expect("Failed to register predictions_total"),

            training_runs_total: register_int_counter!(
                "outcome_engine_training_runs_total",
                "Total number of successful training runs"
            )
            .expect("Failed to register training_runs_total"),

            training_failures_total: register_int_counter!(
                "outcome_engine_training_failures_total",
                "Total number of failed training runs"
            )
            .expect("Failed to register training_failures_total"),
        }
    }
}

/// Engine metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct EngineMetrics {
    _private: (),
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(EngineMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &EngineMetricsInner {
        GLOBAL_METRICS.get_or_init(EngineMetricsInner::new)
    }

    pub fn observe_prediction_latency(&self, duration_secs: f64) {
        self.inner().prediction_latency_seconds.observe(duration_secs);
        self.inner().predictions_total.inc();
    }

    /// Record a finished training run
    pub fn observe_training(&self, duration_secs: f64, success: bool) {
        self.inner().training_duration_seconds.observe(duration_secs);
        if success {
            self.inner().training_runs_total.inc();
        } else {
            self.inner().training_failures_total.inc();
        }
    }

    pub fn set_corpus_samples(&self, count: usize) {
        self.inner().corpus_samples.set(count as i64);
    }

    /// Update the served bundle version
    pub fn set_bundle_version(&self, version: BundleVersion) {
        let version = version.to_string();
        self.inner().bundle_version_info.reset();
        self.inner()
            .bundle_version_info
            .with_label_values(&[version.as_str()])
            .set(1.0);
    }
}

/// Structured logger for engine lifecycle events
///
/// Every event carries an `event` field so log pipelines can filter on it.
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn log_training_started(&self, version: BundleVersion, sample_count: usize, reason: &str) {
        info!(
            event = "training_started",
            instance = %self.instance,
            version = %version,
            sample_count = sample_count,
            reason = %reason,
            "Training run started"
        );
    }

    pub fn log_training_completed(
        &self,
        version: BundleVersion,
        sample_count: usize,
        best_model: Option<(ModelKind, f64)>,
        duration_secs: f64,
    ) {
        info!(
            event = "training_completed",
            instance = %self.instance,
            version = %version,
            sample_count = sample_count,
            best_model = ?best_model.map(|(kind, _)| kind.as_str()),
            best_accuracy = ?best_model.map(|(_, acc)| acc),
            duration_secs = duration_secs,
            "Training run completed"
        );
    }

    pub fn log_training_failed(&self, version: BundleVersion, sample_count: usize, error_kind: &str, error: &str) {
        warn!(
            event = "training_failed",
            instance = %self.instance,
            version = %version,
            sample_count = sample_count,
            error_kind = %error_kind,
            error = %error,
            "Training run failed, keeping previous bundle"
        );
    }

    pub fn log_model_published(&self, old_version: Option<BundleVersion>, new_version: BundleVersion) {
        info!(
            event = "model_published",
            instance = %self.instance,
            old_version = ?old_version.map(|v| v.to_string()),
            new_version = %new_version,
            "Bundle published"
        );
    }

    pub fn log_prediction(&self, label: Option<Label>, confidence: f64, version: Option<BundleVersion>) {
        info!(
            event = "prediction_generated",
            instance = %self.instance,
            label = ?label.map(|l| l.as_str()),
            confidence = confidence,
            version = ?version.map(|v| v.to_string()),
            "Generated outcome prediction"
        );
    }

    pub fn log_startup(&self, engine_version: &str, bundle_version: Option<BundleVersion>, samples: usize) {
        info!(
            event = "engine_started",
            instance = %self.instance,
            engine_version = %engine_version,
            bundle_version = ?bundle_version.map(|v| v.to_string()),
            samples = samples,
            "Learning engine started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "engine_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Learning engine shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_metrics_creation() {
        let metrics = EngineMetrics::new();

        metrics.observe_prediction_latency(0.002);
        metrics.observe_training(1.5, true);
        metrics.observe_training(0.1, false);
        metrics.set_corpus_samples(42);
        metrics.set_bundle_version(BundleVersion::INITIAL);

        // Clones share the global instance
        let other = metrics.clone();
        other.set_corpus_samples(43);
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("engine-0");
        assert_eq!(logger.instance(), "engine-0");
        logger.log_prediction(Some(Label::Failure), 0.4, None);
    }
}
