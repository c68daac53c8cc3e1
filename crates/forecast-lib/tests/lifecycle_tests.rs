//! End-to-end lifecycle tests: training, promotion, persistence and serving

use chrono::{Duration, NaiveDate, NaiveDateTime};
use forecast_lib::anomaly::{AnomalyConfig, AnomalyModel};
use forecast_lib::forecast::ForecastModel;
use forecast_lib::preprocess::{shape_for_anomaly, shape_for_forecast};
use forecast_lib::promotion::Promoter;
use forecast_lib::{
    AnomalyLabel, ErrorClass, ForecastError, HealthRegistry, InMemoryRegistry, JsonFileRegistry,
    ModelId, ModelService, ModelStore, ModelVersion, ProductionRegistry, ServiceConfig,
    TabularRecord, TimeSeries, TrainedModel,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::TempDir;

fn daily_rows(values: &[f64]) -> Vec<TabularRecord> {
    let start = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
    values
        .iter()
        .enumerate()
        .map(|(i, v)| {
            let day = start + Duration::days(i as i64);
            TabularRecord::new(day.format("%d/%m/%Y").to_string(), "00")
                .with("Autorizada", *v)
                .with("Negada", 1.0)
        })
        .collect()
}

fn hourly_rows(n: usize, spike_at: Option<usize>) -> Vec<TabularRecord> {
    let start = NaiveDate::from_ymd_opt(2023, 1, 2)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();
    (0..n)
        .map(|i| {
            let ts = start + Duration::hours(i as i64);
            let base = 100.0 + (i % 6) as f64 * 2.0;
            let autorizada = if Some(i) == spike_at { base * 100.0 } else { base };
            TabularRecord::new(ts.format("%d/%m/%Y").to_string(), ts.format("%H").to_string())
                .with("Autorizada", autorizada)
                .with("Negada", 5.0 + (i % 3) as f64)
        })
        .collect()
}

fn day(d: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2023, 1, d)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

async fn file_service(dir: &TempDir) -> ModelService {
    let health = HealthRegistry::for_service().await;
    ModelService::open(ServiceConfig::rooted_at(dir.path()), health).unwrap()
}

fn trained_forecast(values: &[f64]) -> TrainedModel {
    let series = TimeSeries::from_pairs(
        values
            .iter()
            .enumerate()
            .map(|(i, v)| (day(i as u32 + 1), *v)),
    );
    let mut model = ForecastModel::new();
    model.train(&series).unwrap();
    TrainedModel::Forecast(model)
}

fn rmse(value: f64) -> BTreeMap<String, f64> {
    BTreeMap::from([("rmse".to_string(), value)])
}

#[tokio::test]
async fn test_versions_increase_monotonically_from_one() {
    let dir = TempDir::new().unwrap();
    let registry: Arc<dyn ProductionRegistry> =
        Arc::new(JsonFileRegistry::new(dir.path().join("production_model.json")));
    let store = Arc::new(ModelStore::new(dir.path().join("models"), registry.clone()).unwrap());
    let promoter = Promoter::new(store, registry.clone());
    let id = ModelId::forecast("store1", "Autorizada").unwrap();
    let model = trained_forecast(&[10.0, 11.0, 12.0]);

    let mut versions = Vec::new();
    for score in [5.0, 4.0, 3.0, 2.0] {
        let result = promoter.promote_if_better(&id, &model, rmse(score)).await.unwrap();
        versions.push(result.version.unwrap().number().unwrap());
    }
    assert_eq!(versions, vec![1, 2, 3, 4]);

    let anomaly_id = ModelId::anomaly("store1").unwrap();
    for expected in 1..=3 {
        let version = promoter.publish(&anomaly_id, &model, BTreeMap::new()).await.unwrap();
        assert_eq!(version, ModelVersion::from_number(expected));
    }
}

#[tokio::test]
async fn test_equal_rmse_keeps_incumbent() {
    let dir = TempDir::new().unwrap();
    let registry: Arc<dyn ProductionRegistry> = Arc::new(InMemoryRegistry::new());
    let store = Arc::new(ModelStore::new(dir.path(), registry.clone()).unwrap());
    let promoter = Promoter::new(store, registry.clone());
    let id = ModelId::forecast("store1", "Autorizada").unwrap();
    let model = trained_forecast(&[10.0, 11.0, 12.0]);

    promoter.promote_if_better(&id, &model, rmse(2.0)).await.unwrap();
    let tie = promoter.promote_if_better(&id, &model, rmse(2.0)).await.unwrap();
    assert!(!tie.promoted());
    assert_eq!(registry.get(&id).await.unwrap().unwrap().version.as_str(), "v1");

    let better = promoter.promote_if_better(&id, &model, rmse(1.5)).await.unwrap();
    assert_eq!(better.version.unwrap().as_str(), "v2");
}

#[tokio::test]
async fn test_retraining_on_identical_data_is_not_promoted() {
    let dir = TempDir::new().unwrap();
    let service = file_service(&dir).await;
    let rows = daily_rows(&[10.0, 12.0, 13.0, 15.0, 14.0, 16.0, 18.0, 17.0, 19.0, 20.0]);

    let first = service.train_forecast("store1", "Autorizada", &rows).await.unwrap();
    let second = service.train_forecast("store1", "Autorizada", &rows).await.unwrap();
    assert!(first.promoted);
    assert!(!second.promoted);
    assert!(second.model_version.is_none());
    assert_eq!(first.metrics["rmse"], second.metrics["rmse"]);
}

#[tokio::test]
async fn test_first_model_promotes_regardless_of_metric() {
    let dir = TempDir::new().unwrap();
    let service = file_service(&dir).await;
    let wild = daily_rows(&[5.0, 500.0, 3.0, 900.0, 1.0, 700.0, 2.0, 800.0]);

    let outcome = service.train_forecast("noisy", "Autorizada", &wild).await.unwrap();
    assert!(outcome.promoted);
    assert!(outcome.metrics["rmse"] > 10.0);
    assert_eq!(outcome.model_version.unwrap().as_str(), "v1");
}

#[tokio::test]
async fn test_store1_forecast_scenario() {
    let dir = TempDir::new().unwrap();
    let service = file_service(&dir).await;
    let rows = daily_rows(&[10.0, 12.0, 13.0, 15.0, 14.0, 16.0, 18.0, 17.0, 19.0, 20.0]);

    let outcome = service.train_forecast("store1", "Autorizada", &rows).await.unwrap();
    assert!(outcome.promoted);
    assert_eq!(outcome.model_id.as_str(), "store1_Autorizada");
    assert_eq!(outcome.model_version.as_ref().unwrap().as_str(), "v1");

    let response = service
        .predict_forecast("store1", "Autorizada", &rows[7..], 5)
        .await
        .unwrap();
    assert_eq!(response.model_version.as_str(), "v1");
    let timestamps: Vec<&String> = response.forecast.keys().collect();
    assert_eq!(
        timestamps,
        vec![
            "2023-01-11 00:00:00",
            "2023-01-12 00:00:00",
            "2023-01-13 00:00:00",
            "2023-01-14 00:00:00",
            "2023-01-15 00:00:00",
        ]
    );
    assert!(response.forecast.values().all(|v| v.is_finite()));
}

#[tokio::test]
async fn test_forecast_horizon_follows_hourly_input() {
    let dir = TempDir::new().unwrap();
    let service = file_service(&dir).await;
    let rows = hourly_rows(48, None);

    service.train_forecast("store2", "Autorizada", &rows).await.unwrap();
    let response = service
        .predict_forecast("store2", "Autorizada", &rows[40..], 3)
        .await
        .unwrap();
    let timestamps: Vec<&String> = response.forecast.keys().collect();
    assert_eq!(
        timestamps,
        vec!["2023-01-04 00:00:00", "2023-01-04 01:00:00", "2023-01-04 02:00:00"]
    );
}

#[tokio::test]
async fn test_anomaly_spike_scenario() {
    let dir = TempDir::new().unwrap();
    let service = file_service(&dir).await;
    let rows = hourly_rows(60, Some(59));

    let outcome = service.train_anomaly("Store1", &rows).await.unwrap();
    assert_eq!(outcome.model_id.as_str(), "store1_multivariate_anomaly");
    assert_eq!(outcome.metrics["training_samples"], 60.0);

    let response = service.detect_anomalies("Store1", &rows).await.unwrap();
    assert_eq!(response.anomalies.len(), 60);
    let flagged: Vec<usize> = response
        .anomalies
        .iter()
        .enumerate()
        .filter(|(_, row)| row.anomaly == AnomalyLabel::Outlier)
        .map(|(i, _)| i)
        .collect();
    assert_eq!(flagged, vec![59]);
    assert_eq!(response.anomalies[59].timestamp, "2023-01-04 11:00:00");
    assert_eq!(response.anomalies[59].fields["Autorizada"], 11000.0);
}

#[tokio::test]
async fn test_anomaly_spike_mid_series() {
    let dir = TempDir::new().unwrap();
    let service = file_service(&dir).await;
    let rows = hourly_rows(90, Some(45));

    service.train_anomaly("store1", &rows).await.unwrap();
    let response = service.detect_anomalies("store1", &rows).await.unwrap();
    let flagged: Vec<usize> = response
        .anomalies
        .iter()
        .enumerate()
        .filter(|(_, row)| row.anomaly == AnomalyLabel::Outlier)
        .map(|(i, _)| i)
        .collect();
    assert_eq!(flagged, vec![45]);
    assert_eq!(response.anomalies[45].fields["Autorizada"], 10600.0);
}

#[tokio::test]
async fn test_anomaly_training_always_publishes() {
    let dir = TempDir::new().unwrap();
    let service = file_service(&dir).await;
    let rows = hourly_rows(30, None);

    let first = service.train_anomaly("store1", &rows).await.unwrap();
    let second = service.train_anomaly("store1", &rows).await.unwrap();
    assert_eq!(first.model_version.unwrap().as_str(), "v1");
    assert_eq!(second.model_version.unwrap().as_str(), "v2");
}

#[tokio::test]
async fn test_detection_tolerates_schema_drift() {
    let dir = TempDir::new().unwrap();
    let service = file_service(&dir).await;
    service
        .train_anomaly("store1", &hourly_rows(30, None))
        .await
        .unwrap();

    // Negada missing, Estornada never seen during training
    let drifted: Vec<TabularRecord> = (0..5)
        .map(|h| {
            TabularRecord::new("10/01/2023", format!("{:02}", h))
                .with("Autorizada", 100.0)
                .with("Estornada", "7")
        })
        .collect();
    let response = service.detect_anomalies("store1", &drifted).await.unwrap();
    assert_eq!(response.anomalies.len(), 5);
    assert!(response.anomalies[0].fields.contains_key("Estornada"));
}

#[tokio::test]
async fn test_saved_models_predict_identically_after_load() {
    let dir = TempDir::new().unwrap();
    let registry: Arc<dyn ProductionRegistry> = Arc::new(InMemoryRegistry::new());
    let store = ModelStore::new(dir.path(), registry).unwrap();

    let rows = daily_rows(&[10.0, 12.0, 13.0, 15.0, 14.0, 16.0, 18.0]);
    let series = shape_for_forecast(&rows, "Autorizada").unwrap();
    let mut forecast = ForecastModel::new();
    forecast.train(&series).unwrap();
    let id = ModelId::forecast("store1", "Autorizada").unwrap();
    let (version, _) = store.save(&TrainedModel::Forecast(forecast.clone()), &id).await.unwrap();
    let loaded = store.load(&id, &version).await.unwrap();
    assert_eq!(
        loaded.as_forecast().unwrap().predict(&series, 4).unwrap(),
        forecast.predict(&series, 4).unwrap()
    );

    let frame = shape_for_anomaly(&hourly_rows(40, Some(20)), None).unwrap();
    let mut detector = AnomalyModel::new(AnomalyConfig::default());
    detector.train(&frame).unwrap();
    let anomaly_id = ModelId::anomaly("store1").unwrap();
    let (version, _) = store
        .save(&TrainedModel::Anomaly(detector.clone()), &anomaly_id)
        .await
        .unwrap();
    let loaded = store.load(&anomaly_id, &version).await.unwrap();
    assert_eq!(
        loaded.as_anomaly().unwrap().predict(&frame).unwrap(),
        detector.predict(&frame).unwrap()
    );
}

#[tokio::test]
async fn test_corrupted_registry_is_tolerated_and_reset() {
    let dir = TempDir::new().unwrap();
    let service = file_service(&dir).await;
    let registry_path = dir.path().join("production_model.json");
    std::fs::write(&registry_path, "not json at all").unwrap();

    let err = service.production_entry("store1_Autorizada").await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::NotFound);

    let outcome = service
        .train_forecast("store1", "Autorizada", &daily_rows(&[1.0, 2.0, 3.0]))
        .await
        .unwrap();
    assert!(outcome.promoted);

    let document: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&registry_path).unwrap()).unwrap();
    let entries = document.as_object().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries["store1_Autorizada"]["version"], "v1");
}

#[tokio::test]
async fn test_predict_and_detect_without_training_are_not_found() {
    let dir = TempDir::new().unwrap();
    let service = file_service(&dir).await;

    let err = service
        .predict_forecast("ghost", "Autorizada", &daily_rows(&[1.0, 2.0, 3.0]), 2)
        .await
        .unwrap_err();
    assert!(matches!(err, ForecastError::NotFound(_)));
    assert_eq!(err.class(), ErrorClass::NotFound);

    let err = service
        .detect_anomalies("ghost", &hourly_rows(5, None))
        .await
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::NotFound);
}

#[tokio::test]
async fn test_validation_errors_surface_before_any_state_change() {
    let dir = TempDir::new().unwrap();
    let service = file_service(&dir).await;

    let bad_date = vec![TabularRecord::new("2023-01-01", "00").with("Autorizada", 1.0)];
    let err = service
        .train_forecast("store1", "Autorizada", &bad_date)
        .await
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::Validation);

    let err = service.train_forecast("store1", "Autorizada", &[]).await.unwrap_err();
    assert!(matches!(err, ForecastError::EmptyInput(_)));
    assert!(service.production_entries().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_trainings_never_reuse_versions() {
    let dir = TempDir::new().unwrap();
    let service = file_service(&dir).await;

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let service = service.clone();
            tokio::spawn(async move {
                let noise = 8.0 - i as f64;
                let values: Vec<f64> = (0..10)
                    .map(|d| 10.0 + d as f64 + if d % 2 == 0 { noise } else { -noise })
                    .collect();
                service
                    .train_forecast("store1", "Autorizada", &daily_rows(&values))
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut promoted = Vec::new();
    for handle in handles {
        if let Some(version) = handle.await.unwrap().model_version {
            promoted.push(version);
        }
    }

    let mut unique = promoted.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), promoted.len());

    let id = ModelId::forecast("store1", "Autorizada").unwrap();
    let serving = service.production_version(&id).await.unwrap().unwrap();
    let max = promoted.iter().filter_map(ModelVersion::number).max().unwrap();
    assert_eq!(serving.number(), Some(max));
}

#[tokio::test]
async fn test_background_training_completes_and_promotes() {
    let dir = TempDir::new().unwrap();
    let service = file_service(&dir).await;
    let rows = daily_rows(&[10.0, 12.0, 13.0, 15.0, 14.0]);

    let accepted = service
        .submit_forecast_training("store1", "Autorizada", &rows)
        .unwrap();
    assert_eq!(accepted.model_id.as_str(), "store1_Autorizada");
    assert_eq!(accepted.rows, 5);

    let mut version = None;
    for _ in 0..200 {
        version = service.production_version(&accepted.model_id).await.unwrap();
        if version.is_some() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(version.unwrap().as_str(), "v1");
}
