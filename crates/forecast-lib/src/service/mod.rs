//! Use-case orchestration
//!
//! `ModelService` ties the preprocessor, model adapters, store, registry and
//! promotion policy together:
//! - train: shape input, fit on a blocking thread, evaluate, promote
//! - submit: validate synchronously, then train in a detached task
//! - predict/detect: resolve the production version and serve from it
//!
//! Serving paths never take the per-id promotion lock; they read whatever
//! the registry points at when the call starts.

mod background;
mod config;

pub use config::ServiceConfig;

use crate::anomaly::AnomalyModel;
use crate::error::{ForecastError, Result};
use crate::forecast::{validate_steps, ForecastModel};
use crate::health::{components, HealthRegistry};
use crate::models::{
    format_timestamp, AnomalyRow, DetectionResponse, FeatureFrame, ForecastResponse, ModelId,
    ModelVersion, ProductionEntry, TabularRecord, TimeSeries, TrainOutcome, TrainingAccepted,
};
use crate::observability::{ServiceMetrics, StructuredLogger};
use crate::preprocess::{shape_for_anomaly, shape_for_forecast};
use crate::promotion::Promoter;
use crate::store::{
    JsonFileRegistry, ModelCache, ModelKind, ModelStore, ProductionRegistry, TrainedModel,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

struct ServiceInner {
    config: ServiceConfig,
    registry: Arc<dyn ProductionRegistry>,
    store: Arc<ModelStore>,
    promoter: Promoter,
    cache: ModelCache,
    health: HealthRegistry,
    metrics: ServiceMetrics,
    logger: StructuredLogger,
}

/// Entry point for every lifecycle operation; clones share state
#[derive(Clone)]
pub struct ModelService {
    inner: Arc<ServiceInner>,
}

impl ModelService {
    /// Service backed by the JSON file registry named in `config`
    pub fn open(config: ServiceConfig, health: HealthRegistry) -> Result<Self> {
        let registry: Arc<dyn ProductionRegistry> =
            Arc::new(JsonFileRegistry::new(&config.registry_file).with_health(health.clone()));
        Self::with_registry(config, registry, health)
    }

    /// Service over any registry implementation
    pub fn with_registry(
        config: ServiceConfig,
        registry: Arc<dyn ProductionRegistry>,
        health: HealthRegistry,
    ) -> Result<Self> {
        config.anomaly.validate()?;
        let store = Arc::new(ModelStore::new(&config.models_dir, registry.clone())?);
        let promoter = Promoter::new(store.clone(), registry.clone());
        let cache = ModelCache::new(config.cache_capacity);
        let logger = StructuredLogger::new(config.service_name.clone());

        Ok(Self {
            inner: Arc::new(ServiceInner {
                config,
                registry,
                store,
                promoter,
                cache,
                health,
                metrics: ServiceMetrics::new(),
                logger,
            }),
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    pub fn health(&self) -> &HealthRegistry {
        &self.inner.health
    }

    pub fn logger(&self) -> &StructuredLogger {
        &self.inner.logger
    }

    /// Re-check the model store directory
    pub async fn refresh_health(&self) {
        if self.inner.store.is_available() {
            self.inner.health.set_healthy(components::MODEL_STORE).await;
        } else {
            self.inner
                .health
                .set_unhealthy(
                    components::MODEL_STORE,
                    format!(
                        "models directory {} is missing",
                        self.inner.store.models_dir().display()
                    ),
                )
                .await;
        }
    }

    // ---- training ----

    /// Train a forecast candidate and promote it if it beats production
    pub async fn train_forecast(
        &self,
        app_id: &str,
        target_column: &str,
        rows: &[TabularRecord],
    ) -> Result<TrainOutcome> {
        let model_id = ModelId::forecast(app_id, target_column)?;
        let series = shape_for_forecast(rows, target_column)?;
        self.run_forecast_training(model_id, series).await
    }

    /// Train an anomaly detector and publish it unconditionally
    pub async fn train_anomaly(&self, app_id: &str, rows: &[TabularRecord]) -> Result<TrainOutcome> {
        let model_id = ModelId::anomaly(app_id)?;
        let frame = shape_for_anomaly(rows, Some(self.inner.config.max_training_samples))?;
        self.run_anomaly_training(model_id, frame).await
    }

    /// Validate now, train in the background
    pub fn submit_forecast_training(
        &self,
        app_id: &str,
        target_column: &str,
        rows: &[TabularRecord],
    ) -> Result<TrainingAccepted> {
        let model_id = ModelId::forecast(app_id, target_column)?;
        let series = shape_for_forecast(rows, target_column)?;
        let service = self.clone();
        let id = model_id.clone();
        self.spawn_training(ModelKind::Forecast, model_id.clone(), async move {
            service.run_forecast_training(id, series).await
        });
        Ok(self.accepted(ModelKind::Forecast, model_id, rows.len()))
    }

    /// Validate now, train in the background
    pub fn submit_anomaly_training(
        &self,
        app_id: &str,
        rows: &[TabularRecord],
    ) -> Result<TrainingAccepted> {
        let model_id = ModelId::anomaly(app_id)?;
        let frame = shape_for_anomaly(rows, Some(self.inner.config.max_training_samples))?;
        let service = self.clone();
        let id = model_id.clone();
        self.spawn_training(ModelKind::Anomaly, model_id.clone(), async move {
            service.run_anomaly_training(id, frame).await
        });
        Ok(self.accepted(ModelKind::Anomaly, model_id, rows.len()))
    }

    fn accepted(&self, kind: ModelKind, model_id: ModelId, rows: usize) -> TrainingAccepted {
        self.inner.logger.log_training_accepted(kind, &model_id, rows);
        TrainingAccepted {
            message: format!(
                "Training for {} model '{}' started in the background",
                kind, model_id
            ),
            model_id,
            rows,
        }
    }

    async fn run_forecast_training(
        &self,
        model_id: ModelId,
        series: TimeSeries,
    ) -> Result<TrainOutcome> {
        let started = Instant::now();
        let result = self.forecast_training(&model_id, series).await;
        self.record_training(ModelKind::Forecast, &model_id, &result, started.elapsed());
        result
    }

    async fn forecast_training(&self, model_id: &ModelId, series: TimeSeries) -> Result<TrainOutcome> {
        let (model, metrics) = tokio::task::spawn_blocking(move || -> Result<_> {
            let mut model = ForecastModel::new();
            model.train(&series)?;
            let metrics = model.evaluate(&series)?;
            Ok((model, metrics))
        })
        .await
        .map_err(|e| ForecastError::Internal(format!("forecast training task failed: {}", e)))??;

        let metrics = metrics.to_map();
        let result = self
            .inner
            .promoter
            .promote_if_better(model_id, &TrainedModel::Forecast(model), metrics.clone())
            .await?;

        let message = if result.promoted() {
            self.inner.cache.invalidate(model_id);
            "Model trained and promoted to production".to_string()
        } else {
            "Model trained but not promoted; the production model performs better".to_string()
        };

        Ok(TrainOutcome {
            message,
            model_id: model_id.clone(),
            promoted: result.promoted(),
            model_version: result.version,
            metrics,
        })
    }

    async fn run_anomaly_training(
        &self,
        model_id: ModelId,
        frame: FeatureFrame,
    ) -> Result<TrainOutcome> {
        let started = Instant::now();
        let result = self.anomaly_training(&model_id, frame).await;
        self.record_training(ModelKind::Anomaly, &model_id, &result, started.elapsed());
        result
    }

    async fn anomaly_training(&self, model_id: &ModelId, frame: FeatureFrame) -> Result<TrainOutcome> {
        let config = self.inner.config.anomaly.clone();
        let rows = frame.len();
        let model = tokio::task::spawn_blocking(move || -> Result<_> {
            let mut model = AnomalyModel::new(config);
            model.train(&frame)?;
            Ok(model)
        })
        .await
        .map_err(|e| ForecastError::Internal(format!("anomaly training task failed: {}", e)))??;

        let metrics = BTreeMap::from([("training_samples".to_string(), rows as f64)]);
        let version = self
            .inner
            .promoter
            .publish(model_id, &TrainedModel::Anomaly(model), metrics.clone())
            .await?;
        self.inner.cache.invalidate(model_id);

        Ok(TrainOutcome {
            message: "Anomaly model trained and published to production".to_string(),
            model_id: model_id.clone(),
            promoted: true,
            model_version: Some(version),
            metrics,
        })
    }

    fn record_training(
        &self,
        kind: ModelKind,
        model_id: &ModelId,
        result: &Result<TrainOutcome>,
        elapsed: Duration,
    ) {
        let metrics = &self.inner.metrics;
        match result {
            Ok(outcome) => {
                let label = match (kind, outcome.promoted) {
                    (ModelKind::Anomaly, _) => "published",
                    (ModelKind::Forecast, true) => "promoted",
                    (ModelKind::Forecast, false) => "rejected",
                };
                metrics.record_training(kind, label, elapsed);
                if outcome.promoted {
                    metrics.inc_promotions(kind);
                }
                self.inner.logger.log_training_finished(kind, outcome, elapsed);
            }
            Err(e) => {
                metrics.record_training(kind, "failed", elapsed);
                self.inner
                    .logger
                    .log_training_failed(kind, model_id, &e.to_string());
            }
        }
    }

    // ---- serving ----

    /// Forecast `n_predict_steps` points past the end of `rows`
    pub async fn predict_forecast(
        &self,
        app_id: &str,
        target_column: &str,
        rows: &[TabularRecord],
        n_predict_steps: i64,
    ) -> Result<ForecastResponse> {
        let started = Instant::now();
        let result = self
            .forecast_prediction(app_id, target_column, rows, n_predict_steps)
            .await;
        self.record_serving(ModelKind::Forecast, &result, started.elapsed());
        result
    }

    async fn forecast_prediction(
        &self,
        app_id: &str,
        target_column: &str,
        rows: &[TabularRecord],
        n_predict_steps: i64,
    ) -> Result<ForecastResponse> {
        let steps = validate_steps(n_predict_steps, self.inner.config.max_forecast_steps)?;
        let model_id = ModelId::forecast(app_id, target_column)?;
        let series = shape_for_forecast(rows, target_column)?;

        let entry = self.production_for_serving(&model_id, "predicting").await?;
        let model = self.load_model(&model_id, &entry).await?;
        let forecast_model = model
            .as_forecast()
            .ok_or_else(|| wrong_kind(&entry, ModelKind::Forecast))?;

        let forecast: BTreeMap<String, f64> = forecast_model
            .predict(&series, steps)?
            .into_iter()
            .map(|point| (format_timestamp(&point.timestamp), point.value))
            .collect();

        self.inner
            .logger
            .log_prediction(&model_id, &entry.version, forecast.len());
        Ok(ForecastResponse {
            forecast,
            model_id,
            model_version: entry.version,
        })
    }

    /// Label every row of `rows` with the production detector
    pub async fn detect_anomalies(
        &self,
        app_id: &str,
        rows: &[TabularRecord],
    ) -> Result<DetectionResponse> {
        let started = Instant::now();
        let result = self.anomaly_detection(app_id, rows).await;
        self.record_serving(ModelKind::Anomaly, &result, started.elapsed());
        result
    }

    async fn anomaly_detection(
        &self,
        app_id: &str,
        rows: &[TabularRecord],
    ) -> Result<DetectionResponse> {
        let model_id = ModelId::anomaly(app_id)?;
        let frame = shape_for_anomaly(rows, None)?;

        let entry = self.production_for_serving(&model_id, "detecting").await?;
        let model = self.load_model(&model_id, &entry).await?;
        let detector = model
            .as_anomaly()
            .ok_or_else(|| wrong_kind(&entry, ModelKind::Anomaly))?;

        let labels = detector.predict(&frame)?;
        let anomalies: Vec<AnomalyRow> = frame
            .index()
            .iter()
            .zip(labels)
            .enumerate()
            .map(|(i, (ts, anomaly))| AnomalyRow {
                timestamp: format_timestamp(ts),
                fields: frame
                    .columns()
                    .map(|(name, values)| (name.to_string(), values[i]))
                    .collect(),
                anomaly,
            })
            .collect();

        let outliers = anomalies.iter().filter(|r| r.anomaly.is_outlier()).count();
        self.inner.metrics.add_anomalies_flagged(outliers as u64);
        self.inner
            .logger
            .log_detection(&model_id, &entry.version, anomalies.len(), outliers);

        Ok(DetectionResponse {
            message: "Anomaly detection completed".to_string(),
            model_id,
            model_version: entry.version,
            anomalies,
        })
    }

    fn record_serving<T>(&self, kind: ModelKind, result: &Result<T>, elapsed: Duration) {
        self.inner.metrics.observe_serving_latency(kind, elapsed);
        if let Err(e) = result {
            self.inner.metrics.inc_serving_errors(kind, e.code());
            debug!(kind = %kind, error = %e, "Serving call failed");
        }
    }

    async fn production_for_serving(&self, model_id: &ModelId, action: &str) -> Result<ProductionEntry> {
        self.inner.registry.get(model_id).await?.ok_or_else(|| {
            ForecastError::NotFound(format!(
                "no production model for '{}'; train a model before {}",
                model_id, action
            ))
        })
    }

    async fn load_model(&self, model_id: &ModelId, entry: &ProductionEntry) -> Result<Arc<TrainedModel>> {
        if let Some(model) = self.inner.cache.get(model_id, &entry.version) {
            return Ok(model);
        }
        let model = match self.inner.store.load(model_id, &entry.version).await {
            Ok(model) => Arc::new(model),
            Err(ForecastError::NotFound(reason)) => {
                warn!(
                    model_id = %model_id,
                    version = %entry.version,
                    "Registry points at a missing artifact"
                );
                return Err(ForecastError::NotFound(reason));
            }
            Err(e) => return Err(e),
        };
        self.inner
            .cache
            .insert(model_id, &entry.version, model.clone());
        Ok(model)
    }

    // ---- inspection ----

    /// Production entry for a raw model id
    pub async fn production_entry(&self, model_id: &str) -> Result<ProductionEntry> {
        let model_id = ModelId::new(model_id)?;
        self.inner
            .registry
            .get(&model_id)
            .await?
            .ok_or_else(|| ForecastError::NotFound(format!("no production model for '{}'", model_id)))
    }

    pub async fn production_entries(&self) -> Result<BTreeMap<ModelId, ProductionEntry>> {
        self.inner.registry.list().await
    }

    /// Version currently serving `model_id`, if any
    pub async fn production_version(&self, model_id: &ModelId) -> Result<Option<ModelVersion>> {
        Ok(self.inner.registry.get(model_id).await?.map(|e| e.version))
    }
}

fn wrong_kind(entry: &ProductionEntry, expected: ModelKind) -> ForecastError {
    ForecastError::CorruptArtifact {
        path: entry.path.display().to_string(),
        reason: format!("artifact is not a {} model", expected),
    }
}
