//! Observability for the model lifecycle service
//!
//! Provides:
//! - Prometheus metrics (training outcomes, promotions, serving latency,
//!   flagged anomalies, registry read failures)
//! - Event-style structured logging with tracing

use crate::models::{ModelId, ModelVersion, TrainOutcome};
use crate::store::ModelKind;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    HistogramVec, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{error, info, warn};

/// Latency buckets for serving requests (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
];

/// Training runs take far longer than serving calls
const TRAINING_BUCKETS: &[f64] = &[0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ServiceMetricsInner> = OnceLock::new();

struct ServiceMetricsInner {
    training_runs: IntCounterVec,
    training_duration_seconds: HistogramVec,
    trainings_in_flight: IntGauge,
    promotions: IntCounterVec,
    serving_latency_seconds: HistogramVec,
    serving_errors: IntCounterVec,
    anomalies_flagged: IntCounter,
    registry_read_failures: IntCounter,
}

impl ServiceMetricsInner {
    fn new() -> Self {
        Self {
            training_runs: register_int_counter_vec!(
                "forecast_training_runs_total",
                "Training runs by model kind and outcome",
                &["kind", "outcome"]
            )
            .expect("Failed to register training_runs_total"),

            training_duration_seconds: register_histogram_vec!(
                "forecast_training_duration_seconds",
                "Wall time of a training run including persistence",
                &["kind"],
                TRAINING_BUCKETS.to_vec()
            )
            .expect("Failed to register training_duration_seconds"),

            trainings_in_flight: register_int_gauge!(
                "forecast_trainings_in_flight",
                "Background training runs currently executing"
            )
            .expect("Failed to register trainings_in_flight"),

            promotions: register_int_counter_vec!(
                "forecast_promotions_total",
                "Model versions promoted to production",
                &["kind"]
            )
            .expect("Failed to register promotions_total"),

            serving_latency_seconds: register_histogram_vec!(
                "forecast_serving_latency_seconds",
                "Time spent answering predict and detect calls",
                &["kind"],
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register serving_latency_seconds"),

            serving_errors: register_int_counter_vec!(
                "forecast_serving_errors_total",
                "Failed predict and detect calls by error code",
                &["kind", "code"]
            )
            .expect("Failed to register serving_errors_total"),

            anomalies_flagged: register_int_counter!(
                "forecast_anomalies_flagged_total",
                "Rows labelled as outliers by the production detector"
            )
            .expect("Failed to register anomalies_flagged_total"),

            registry_read_failures: register_int_counter!(
                "forecast_registry_read_failures_total",
                "Production registry reads that found unreadable content"
            )
            .expect("Failed to register registry_read_failures_total"),
        }
    }
}

/// Handle to the process-wide service metrics; clones share one registry
#[derive(Clone)]
pub struct ServiceMetrics {
    _private: (),
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ServiceMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ServiceMetricsInner {
        GLOBAL_METRICS.get_or_init(ServiceMetricsInner::new)
    }

    /// Record a finished training run (`promoted`, `rejected`, `published`, `failed`)
    pub fn record_training(&self, kind: ModelKind, outcome: &str, elapsed: Duration) {
        let inner = self.inner();
        inner
            .training_runs
            .with_label_values(&[kind.as_str(), outcome])
            .inc();
        inner
            .training_duration_seconds
            .with_label_values(&[kind.as_str()])
            .observe(elapsed.as_secs_f64());
    }

    pub fn inc_promotions(&self, kind: ModelKind) {
        self.inner().promotions.with_label_values(&[kind.as_str()]).inc();
    }

    pub fn training_started(&self) {
        self.inner().trainings_in_flight.inc();
    }

    pub fn training_finished(&self) {
        self.inner().trainings_in_flight.dec();
    }

    pub fn observe_serving_latency(&self, kind: ModelKind, elapsed: Duration) {
        self.inner()
            .serving_latency_seconds
            .with_label_values(&[kind.as_str()])
            .observe(elapsed.as_secs_f64());
    }

    pub fn inc_serving_errors(&self, kind: ModelKind, code: &str) {
        self.inner()
            .serving_errors
            .with_label_values(&[kind.as_str(), code])
            .inc();
    }

    pub fn add_anomalies_flagged(&self, count: u64) {
        self.inner().anomalies_flagged.inc_by(count);
    }

    pub fn inc_registry_read_failures(&self) {
        self.inner().registry_read_failures.inc();
    }
}

/// Structured logger for lifecycle events
///
/// Every line carries an `event` field so log pipelines can filter on it.
#[derive(Clone)]
pub struct StructuredLogger {
    service: String,
}

impl StructuredLogger {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    pub fn log_startup(&self, version: &str, models_dir: &str, registry_file: &str) {
        info!(
            event = "service_started",
            service = %self.service,
            version = %version,
            models_dir = %models_dir,
            registry_file = %registry_file,
            "Model lifecycle service started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "service_shutdown",
            service = %self.service,
            reason = %reason,
            "Model lifecycle service shutting down"
        );
    }

    pub fn log_training_accepted(&self, kind: ModelKind, model_id: &ModelId, rows: usize) {
        info!(
            event = "training_accepted",
            service = %self.service,
            kind = %kind,
            model_id = %model_id,
            rows = rows,
            "Training scheduled in the background"
        );
    }

    pub fn log_training_finished(&self, kind: ModelKind, outcome: &TrainOutcome, elapsed: Duration) {
        let version = outcome
            .model_version
            .as_ref()
            .map(ModelVersion::to_string)
            .unwrap_or_default();
        if outcome.promoted {
            info!(
                event = "model_promoted",
                service = %self.service,
                kind = %kind,
                model_id = %outcome.model_id,
                model_version = %version,
                metrics = ?outcome.metrics,
                elapsed_ms = elapsed.as_millis() as u64,
                "New model version promoted to production"
            );
        } else {
            info!(
                event = "model_rejected",
                service = %self.service,
                kind = %kind,
                model_id = %outcome.model_id,
                metrics = ?outcome.metrics,
                elapsed_ms = elapsed.as_millis() as u64,
                "Candidate did not beat the production model"
            );
        }
    }

    pub fn log_training_failed(&self, kind: ModelKind, model_id: &ModelId, reason: &str) {
        error!(
            event = "training_failed",
            service = %self.service,
            kind = %kind,
            model_id = %model_id,
            reason = %reason,
            "Background training failed"
        );
    }

    pub fn log_prediction(&self, model_id: &ModelId, version: &ModelVersion, steps: usize) {
        info!(
            event = "forecast_served",
            service = %self.service,
            model_id = %model_id,
            model_version = %version,
            steps = steps,
            "Forecast generated"
        );
    }

    pub fn log_detection(
        &self,
        model_id: &ModelId,
        version: &ModelVersion,
        rows: usize,
        outliers: usize,
    ) {
        if outliers > 0 {
            warn!(
                event = "anomalies_detected",
                service = %self.service,
                model_id = %model_id,
                model_version = %version,
                rows = rows,
                outliers = outliers,
                "Anomalies detected"
            );
        } else {
            info!(
                event = "anomalies_detected",
                service = %self.service,
                model_id = %model_id,
                model_version = %version,
                rows = rows,
                outliers = 0,
                "No anomalies detected"
            );
        }
    }
}
