//! Server configuration

use anyhow::{Context, Result};
use forecast_lib::anomaly::AnomalyConfig;
use forecast_lib::ServiceConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Base name of the optional config file (`forecast-server.toml`, `.yaml`, `.json`)
pub const CONFIG_FILE_NAME: &str = "forecast-server";

/// Prefix of the environment overrides (`FORECAST_PORT`, `FORECAST_MODELS_DIR`, ...)
pub const ENV_PREFIX: &str = "FORECAST";

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory holding versioned model artifacts
    #[serde(default = "default_models_dir")]
    pub models_dir: PathBuf,

    #[serde(default = "default_registry_file")]
    pub registry_file: PathBuf,

    /// Anomaly training input above this many rows is downsampled
    #[serde(default = "default_max_training_samples")]
    pub max_training_samples: usize,

    /// Largest horizon a forecast request may ask for
    #[serde(default = "default_max_forecast_steps")]
    pub max_forecast_steps: usize,

    #[serde(default = "default_anomaly_contamination")]
    pub anomaly_contamination: f64,

    #[serde(default = "default_anomaly_estimators")]
    pub anomaly_estimators: usize,

    #[serde(default = "default_random_seed")]
    pub random_seed: u64,

    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// `json` or `text`
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_port() -> u16 {
    8000
}

fn default_models_dir() -> PathBuf {
    PathBuf::from("models")
}

fn default_registry_file() -> PathBuf {
    PathBuf::from("production_model.json")
}

fn default_max_training_samples() -> usize {
    10_000
}

fn default_max_forecast_steps() -> usize {
    forecast_lib::forecast::MAX_FORECAST_STEPS
}

fn default_anomaly_contamination() -> f64 {
    0.01
}

fn default_anomaly_estimators() -> usize {
    100
}

fn default_random_seed() -> u64 {
    42
}

fn default_cache_capacity() -> usize {
    64
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            models_dir: default_models_dir(),
            registry_file: default_registry_file(),
            max_training_samples: default_max_training_samples(),
            max_forecast_steps: default_max_forecast_steps(),
            anomaly_contamination: default_anomaly_contamination(),
            anomaly_estimators: default_anomaly_estimators(),
            random_seed: default_random_seed(),
            cache_capacity: default_cache_capacity(),
            log_format: default_log_format(),
        }
    }
}

impl ServerConfig {
    /// Load from `forecast-server.*` in the working directory and the environment
    pub fn load() -> Result<Self> {
        Self::build(config::File::with_name(CONFIG_FILE_NAME).required(false))
    }

    /// Load from an explicit file, still honoring environment overrides
    pub fn load_from(path: &Path) -> Result<Self> {
        Self::build(config::File::from(path).required(true))
            .with_context(|| format!("Failed to load configuration from {}", path.display()))
    }

    fn build<S>(file: S) -> Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let config = config::Config::builder()
            .add_source(file)
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .context("Failed to read configuration sources")?;

        let server: ServerConfig = config
            .try_deserialize()
            .context("Invalid server configuration")?;
        server.validate()?;
        Ok(server)
    }

    pub fn validate(&self) -> Result<()> {
        self.anomaly_config()
            .validate()
            .context("Invalid anomaly detector settings")?;
        if self.max_forecast_steps == 0 {
            anyhow::bail!("max_forecast_steps must be positive");
        }
        if !matches!(self.log_format.as_str(), "json" | "text") {
            anyhow::bail!("log_format must be 'json' or 'text', got '{}'", self.log_format);
        }
        Ok(())
    }

    pub fn anomaly_config(&self) -> AnomalyConfig {
        AnomalyConfig {
            contamination: self.anomaly_contamination,
            n_estimators: self.anomaly_estimators,
            seed: self.random_seed,
            ..AnomalyConfig::default()
        }
    }

    /// Settings for the core service
    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            models_dir: self.models_dir.clone(),
            registry_file: self.registry_file.clone(),
            max_training_samples: self.max_training_samples,
            max_forecast_steps: self.max_forecast_steps,
            anomaly: self.anomaly_config(),
            cache_capacity: self.cache_capacity,
            service_name: "forecast-server".to_string(),
        }
    }
}
