//! HTTP API: training, serving, registry inspection, health and metrics
//!
//! Every lifecycle route accepts either a JSON body or a semicolon-delimited
//! CSV upload (`/csv` suffix). Training routes return `202 Accepted` as soon
//! as the input is validated; the run continues in the background.

use axum::{
    body::Bytes,
    extract::{
        rejection::{JsonRejection, QueryRejection},
        DefaultBodyLimit, Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use forecast_lib::{
    health::ComponentStatus, preprocess::records_from_csv, ErrorClass, ForecastError,
    HealthRegistry, ModelService, TabularRecord,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: ModelService,
    pub health_registry: HealthRegistry,
}

impl AppState {
    pub fn new(service: ModelService) -> Self {
        let health_registry = service.health().clone();
        Self {
            service,
            health_registry,
        }
    }
}

/// Error body for every failed request
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Core error rendered as an HTTP response
pub struct ApiError(ForecastError);

impl From<ForecastError> for ApiError {
    fn from(err: ForecastError) -> Self {
        Self(err)
    }
}

/// Malformed JSON bodies are input errors like any other
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(ForecastError::Parse(rejection.body_text()))
    }
}

/// Missing or malformed query parameters on the CSV routes
impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self(ForecastError::InvalidArgument(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.class() {
            ErrorClass::Validation => StatusCode::BAD_REQUEST,
            ErrorClass::NotFound => StatusCode::NOT_FOUND,
            ErrorClass::Unexpected => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self.0, code = self.0.code(), "Request failed");
        } else {
            warn!(error = %self.0, code = self.0.code(), "Request rejected");
        }

        let body = ErrorResponse {
            error: self.0.to_string(),
            code: self.0.code().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Uploads of a few hundred thousand rows still fit
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Deserialize)]
pub struct TrainForecastRequest {
    pub target_column: String,
    pub records: Vec<TabularRecord>,
}

#[derive(Debug, Deserialize)]
pub struct PredictForecastRequest {
    pub target_column: String,
    pub n_predict_steps: i64,
    pub records: Vec<TabularRecord>,
}

#[derive(Debug, Deserialize)]
pub struct AnomalyRequest {
    pub records: Vec<TabularRecord>,
}

#[derive(Debug, Deserialize)]
pub struct TargetQuery {
    pub target_column: String,
}

#[derive(Debug, Deserialize)]
pub struct PredictQuery {
    pub target_column: String,
    pub n_predict_steps: i64,
}

async fn train_forecast(
    State(state): State<Arc<AppState>>,
    Path(app_id): Path<String>,
    payload: Result<Json<TrainForecastRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = payload?;
    let accepted =
        state
            .service
            .submit_forecast_training(&app_id, &request.target_column, &request.records)?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

async fn train_forecast_csv(
    State(state): State<Arc<AppState>>,
    Path(app_id): Path<String>,
    query: Result<Query<TargetQuery>, QueryRejection>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let Query(query) = query?;
    let records = records_from_csv(&body)?;
    let accepted = state
        .service
        .submit_forecast_training(&app_id, &query.target_column, &records)?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

async fn predict_forecast(
    State(state): State<Arc<AppState>>,
    Path(app_id): Path<String>,
    payload: Result<Json<PredictForecastRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = payload?;
    let response = state
        .service
        .predict_forecast(
            &app_id,
            &request.target_column,
            &request.records,
            request.n_predict_steps,
        )
        .await?;
    Ok(Json(response))
}

async fn predict_forecast_csv(
    State(state): State<Arc<AppState>>,
    Path(app_id): Path<String>,
    query: Result<Query<PredictQuery>, QueryRejection>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let Query(query) = query?;
    let records = records_from_csv(&body)?;
    let response = state
        .service
        .predict_forecast(&app_id, &query.target_column, &records, query.n_predict_steps)
        .await?;
    Ok(Json(response))
}

async fn train_anomaly(
    State(state): State<Arc<AppState>>,
    Path(app_id): Path<String>,
    payload: Result<Json<AnomalyRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = payload?;
    let accepted = state
        .service
        .submit_anomaly_training(&app_id, &request.records)?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

async fn train_anomaly_csv(
    State(state): State<Arc<AppState>>,
    Path(app_id): Path<String>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let records = records_from_csv(&body)?;
    let accepted = state.service.submit_anomaly_training(&app_id, &records)?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

async fn detect_anomalies(
    State(state): State<Arc<AppState>>,
    Path(app_id): Path<String>,
    payload: Result<Json<AnomalyRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = payload?;
    let response = state
        .service
        .detect_anomalies(&app_id, &request.records)
        .await?;
    Ok(Json(response))
}

async fn detect_anomalies_csv(
    State(state): State<Arc<AppState>>,
    Path(app_id): Path<String>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let records = records_from_csv(&body)?;
    let response = state.service.detect_anomalies(&app_id, &records).await?;
    Ok(Json(response))
}

async fn list_models(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.service.production_entries().await?))
}

async fn get_model(
    State(state): State<Arc<AppState>>,
    Path(model_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.service.production_entry(&model_id).await?))
}

/// Health check response - returns 200 if operational, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.service.refresh_health().await;
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.service.refresh_health().await;
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", encoder.format_type().to_string())],
        buffer,
    )
        .into_response()
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/forecast/:app_id/train", post(train_forecast))
        .route("/forecast/:app_id/train/csv", post(train_forecast_csv))
        .route("/forecast/:app_id/predict", post(predict_forecast))
        .route("/forecast/:app_id/predict/csv", post(predict_forecast_csv))
        .route("/anomaly/:app_id/train", post(train_anomaly))
        .route("/anomaly/:app_id/train/csv", post(train_anomaly_csv))
        .route("/anomaly/:app_id/detect", post(detect_anomalies))
        .route("/anomaly/:app_id/detect/csv", post(detect_anomalies_csv))
        .route("/models", get(list_models))
        .route("/models/:model_id", get(get_model))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

/// Start the API server and run until `shutdown` resolves
pub async fn serve<F>(port: u16, state: Arc<AppState>, shutdown: F) -> anyhow::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
