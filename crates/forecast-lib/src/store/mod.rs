//! Persistence for trained models and the production pointer
//!
//! - `ModelStore`: immutable, versioned artifact files
//! - `ProductionRegistry`: which version serves traffic for each model id
//! - `ModelCache`: loaded artifacts kept in memory between requests

mod cache;
mod model_store;
mod registry;

pub use cache::ModelCache;
pub use model_store::{compute_checksum, ModelStore, StoredArtifact};
pub use registry::{InMemoryRegistry, JsonFileRegistry, ProductionRegistry};

use crate::anomaly::AnomalyModel;
use crate::forecast::ForecastModel;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of model lineage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Forecast,
    Anomaly,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Forecast => "forecast",
            ModelKind::Anomaly => "anomaly",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A trained, servable model of either kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainedModel {
    Forecast(ForecastModel),
    Anomaly(AnomalyModel),
}

impl TrainedModel {
    pub fn kind(&self) -> ModelKind {
        match self {
            TrainedModel::Forecast(_) => ModelKind::Forecast,
            TrainedModel::Anomaly(_) => ModelKind::Anomaly,
        }
    }

    pub fn as_forecast(&self) -> Option<&ForecastModel> {
        match self {
            TrainedModel::Forecast(model) => Some(model),
            TrainedModel::Anomaly(_) => None,
        }
    }

    pub fn as_anomaly(&self) -> Option<&AnomalyModel> {
        match self {
            TrainedModel::Anomaly(model) => Some(model),
            TrainedModel::Forecast(_) => None,
        }
    }
}

impl From<ForecastModel> for TrainedModel {
    fn from(model: ForecastModel) -> Self {
        TrainedModel::Forecast(model)
    }
}

impl From<AnomalyModel> for TrainedModel {
    fn from(model: AnomalyModel) -> Self {
        TrainedModel::Anomaly(model)
    }
}
