//! Per-tenant forecasting and anomaly model lifecycle
//!
//! This crate provides the core functionality for:
//! - Shaping tabular `DIA`/`HORA` input into series and feature frames
//! - Training forecast and anomaly models behind one train/predict contract
//! - Versioned artifact storage and the production registry
//! - Champion/challenger promotion with per-model-id serialization
//! - Background training, health checks and observability

pub mod anomaly;
pub mod error;
pub mod forecast;
pub mod health;
pub mod models;
pub mod observability;
pub mod preprocess;
pub mod promotion;
pub mod service;
pub mod store;

pub use error::{ErrorClass, ForecastError, Result};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{ServiceMetrics, StructuredLogger};
pub use service::{ModelService, ServiceConfig};
pub use store::{
    InMemoryRegistry, JsonFileRegistry, ModelCache, ModelKind, ModelStore, ProductionRegistry,
    TrainedModel,
};
