//! Multivariate anomaly detector
//!
//! Train / predict contract over a time-indexed numeric frame:
//! - rolling-window and calendar features are derived from the raw columns
//! - the feature schema seen at training time is canonical; prediction input
//!   is reconciled against it (missing features are zero, extras dropped)
//! - features are standardized, then scored by an isolation forest
//! - rows scoring below the contamination percentile of the training scores
//!   are outliers
//! - the first `WARM_UP_ROWS` rows of a frame only see partial windows; they
//!   are left out of the threshold and always reported as inliers

mod features;
mod isolation;
mod scaler;

pub use features::{
    build_features, FeatureMatrix, CALENDAR_FEATURES, ROLLING_WINDOWS, WARM_UP_ROWS,
};
pub use isolation::{average_path_length, percentile, IsolationForest};
pub use scaler::StandardScaler;

use crate::error::{ForecastError, Result};
use crate::models::{AnomalyLabel, FeatureFrame};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Detector hyper-parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyConfig {
    /// Expected share of outliers in the training data
    pub contamination: f64,
    pub n_estimators: usize,
    pub max_samples: usize,
    pub seed: u64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            contamination: 0.01,
            n_estimators: 100,
            max_samples: 256,
            seed: 42,
        }
    }
}

impl AnomalyConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.contamination > 0.0 && self.contamination <= 0.5) {
            return Err(ForecastError::InvalidArgument(format!(
                "contamination must be in (0, 0.5], got {}",
                self.contamination
            )));
        }
        if self.n_estimators == 0 || self.max_samples == 0 {
            return Err(ForecastError::InvalidArgument(
                "n_estimators and max_samples must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FittedDetector {
    schema: Vec<String>,
    scaler: StandardScaler,
    forest: IsolationForest,
    threshold: f64,
}

/// Anomaly adapter: `Untrained -> Trained`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnomalyModel {
    config: AnomalyConfig,
    fitted: Option<FittedDetector>,
    trained_rows: usize,
}

impl AnomalyModel {
    pub fn new(config: AnomalyConfig) -> Self {
        Self {
            config,
            fitted: None,
            trained_rows: 0,
        }
    }

    pub fn is_trained(&self) -> bool {
        self.fitted.is_some()
    }

    pub fn config(&self) -> &AnomalyConfig {
        &self.config
    }

    pub fn trained_rows(&self) -> usize {
        self.trained_rows
    }

    /// Canonical feature names, once trained
    pub fn feature_schema(&self) -> Option<&[String]> {
        self.fitted.as_ref().map(|f| f.schema.as_slice())
    }

    fn check_frame(frame: &FeatureFrame, what: &str) -> Result<()> {
        if frame.is_empty() {
            return Err(ForecastError::EmptyInput(format!(
                "{} data must not be empty",
                what
            )));
        }
        if !frame.is_time_ordered() {
            return Err(ForecastError::InvalidIndex(format!(
                "{} data must be ordered by timestamp",
                what
            )));
        }
        Ok(())
    }

    pub fn train(&mut self, frame: &FeatureFrame) -> Result<()> {
        if self.is_trained() {
            return Err(ForecastError::InvalidArgument(
                "model is already trained; build a new adapter for each training run".to_string(),
            ));
        }
        self.config.validate()?;
        Self::check_frame(frame, "training")?;

        let features = build_features(frame);
        let scaler = StandardScaler::fit(&features.rows);
        let scaled = scaler.transform(&features.rows);
        let forest = IsolationForest::fit(
            &scaled,
            self.config.n_estimators,
            self.config.max_samples,
            self.config.seed,
        );
        let scores = forest.score_all(&scaled);
        let settled = if scores.len() > WARM_UP_ROWS {
            &scores[WARM_UP_ROWS..]
        } else {
            &scores[..]
        };
        let threshold = percentile(settled, 100.0 * self.config.contamination);

        debug!(
            rows = frame.len(),
            features = features.names.len(),
            threshold,
            "Anomaly detector trained"
        );

        self.fitted = Some(FittedDetector {
            schema: features.names,
            scaler,
            forest,
            threshold,
        });
        self.trained_rows = frame.len();
        Ok(())
    }

    /// Label every row of `frame`, index-aligned with the input
    pub fn predict(&self, frame: &FeatureFrame) -> Result<Vec<AnomalyLabel>> {
        let fitted = self.fitted.as_ref().ok_or(ForecastError::NotTrained)?;
        Self::check_frame(frame, "detection")?;

        let features = build_features(frame).reconcile(&fitted.schema);
        let scaled = fitted.scaler.transform(&features.rows);
        let labels: Vec<AnomalyLabel> = fitted
            .forest
            .score_all(&scaled)
            .into_iter()
            .enumerate()
            .map(|(i, score)| {
                if i >= WARM_UP_ROWS && score < fitted.threshold {
                    AnomalyLabel::Outlier
                } else {
                    AnomalyLabel::Inlier
                }
            })
            .collect();

        debug!(
            rows = labels.len(),
            outliers = labels.iter().filter(|l| l.is_outlier()).count(),
            "Anomaly detection finished"
        );
        Ok(labels)
    }
}
