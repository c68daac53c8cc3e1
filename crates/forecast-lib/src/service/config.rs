//! Library-level service settings

use crate::anomaly::AnomalyConfig;
use crate::forecast::MAX_FORECAST_STEPS;
use crate::preprocess::MAX_TRAINING_SAMPLES;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Directory holding versioned artifacts
    pub models_dir: PathBuf,
    /// JSON document mapping model ids to production entries
    pub registry_file: PathBuf,
    /// Anomaly training input is downsampled above this many rows
    pub max_training_samples: usize,
    /// Largest accepted `n_predict_steps`
    pub max_forecast_steps: usize,
    pub anomaly: AnomalyConfig,
    /// Loaded models kept in memory; 0 disables the cache
    pub cache_capacity: usize,
    /// Name attached to structured log events
    pub service_name: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            models_dir: PathBuf::from("models"),
            registry_file: PathBuf::from("production_model.json"),
            max_training_samples: MAX_TRAINING_SAMPLES,
            max_forecast_steps: MAX_FORECAST_STEPS,
            anomaly: AnomalyConfig::default(),
            cache_capacity: 64,
            service_name: "forecast-server".to_string(),
        }
    }
}

impl ServiceConfig {
    /// Defaults with both artifacts and registry under `root`
    pub fn rooted_at(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            models_dir: root.join("models"),
            registry_file: root.join("production_model.json"),
            ..Self::default()
        }
    }
}
