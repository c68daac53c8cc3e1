//! Forecast model adapter
//!
//! Wraps the trend/seasonality regressor in a uniform train / predict /
//! evaluate contract. A fresh adapter is built for every training attempt;
//! once trained it is never refitted.

mod frequency;
mod regressor;

pub use frequency::{infer_frequency, Frequency};
pub use regressor::{is_holiday, SeasonalityMode, TrendSeasonalRegressor};

use crate::error::{ForecastError, Result};
use crate::models::{TimeSeries, TimeSeriesRecord};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

/// Goodness-of-fit of a trained model against a series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastMetrics {
    pub rmse: f64,
    pub mae: f64,
}

impl ForecastMetrics {
    /// Compute RMSE and MAE over `(predicted, actual)` pairs
    pub fn from_pairs(pairs: &[(f64, f64)]) -> Result<Self> {
        if pairs.is_empty() {
            return Err(ForecastError::NoOverlap);
        }
        let n = pairs.len() as f64;
        let mse = pairs.iter().map(|(p, a)| (p - a).powi(2)).sum::<f64>() / n;
        let mae = pairs.iter().map(|(p, a)| (p - a).abs()).sum::<f64>() / n;
        Ok(Self {
            rmse: mse.sqrt(),
            mae,
        })
    }

    pub fn to_map(&self) -> BTreeMap<String, f64> {
        BTreeMap::from([
            ("rmse".to_string(), self.rmse),
            ("mae".to_string(), self.mae),
        ])
    }
}

/// Default upper bound on a requested forecast horizon
pub const MAX_FORECAST_STEPS: usize = 10_000;

/// Validate a requested horizon coming from the request boundary
pub fn validate_steps(n_predict_steps: i64, max_steps: usize) -> Result<usize> {
    if n_predict_steps < 0 {
        return Err(ForecastError::InvalidArgument(
            "number of steps to predict must not be negative".to_string(),
        ));
    }
    if n_predict_steps == 0 {
        return Err(ForecastError::InvalidArgument(
            "number of steps to predict must be positive".to_string(),
        ));
    }
    match usize::try_from(n_predict_steps) {
        Ok(steps) if steps <= max_steps => Ok(steps),
        _ => Err(ForecastError::InvalidArgument(format!(
            "number of steps to predict must be at most {}, got {}",
            max_steps, n_predict_steps
        ))),
    }
}

/// Forecast adapter: `Untrained -> Trained`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForecastModel {
    fitted: Option<TrendSeasonalRegressor>,
    trained_points: usize,
}

impl ForecastModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_trained(&self) -> bool {
        self.fitted.is_some()
    }

    /// Number of points seen during training
    pub fn trained_points(&self) -> usize {
        self.trained_points
    }

    fn fitted(&self) -> Result<&TrendSeasonalRegressor> {
        self.fitted.as_ref().ok_or(ForecastError::NotTrained)
    }

    /// Fit against a historical series
    pub fn train(&mut self, series: &TimeSeries) -> Result<()> {
        if self.is_trained() {
            return Err(ForecastError::InvalidArgument(
                "model is already trained; build a new adapter for each training run".to_string(),
            ));
        }
        if series.is_empty() {
            return Err(ForecastError::EmptyInput(
                "training series must not be empty".to_string(),
            ));
        }

        let fitted = TrendSeasonalRegressor::fit(series.points())?;
        debug!(
            points = series.len(),
            mode = ?fitted.mode(),
            "Forecast model trained"
        );
        self.fitted = Some(fitted);
        self.trained_points = series.len();
        Ok(())
    }

    /// Forecast `n_predict` points after the last timestamp of `series`
    ///
    /// The horizon continues from the input series, not from the training
    /// cutoff, at the series' inferred frequency (daily when it cannot be
    /// inferred). Only the new future points are returned.
    pub fn predict(&self, series: &TimeSeries, n_predict: usize) -> Result<Vec<TimeSeriesRecord>> {
        let fitted = self.fitted()?;
        if series.is_empty() {
            return Err(ForecastError::EmptyInput(
                "input series for prediction must not be empty".to_string(),
            ));
        }
        if series.len() < 2 {
            return Err(ForecastError::InsufficientData(
                "input series must contain at least 2 points to infer its frequency".to_string(),
            ));
        }

        let timestamps = series.timestamps();
        let frequency = infer_frequency(&timestamps).unwrap_or_else(|| {
            warn!(
                points = series.len(),
                "Could not infer frequency of the input series; assuming daily"
            );
            Frequency::daily()
        });

        let last = *timestamps
            .last()
            .ok_or_else(|| ForecastError::Internal("non-empty series without timestamps".into()))?;
        let future = frequency.future_timestamps(last, n_predict);
        if future.len() != n_predict {
            return Err(ForecastError::InvalidArgument(format!(
                "horizon of {} steps at frequency {} overflows the calendar",
                n_predict, frequency
            )));
        }

        debug!(frequency = %frequency, steps = n_predict, "Generating forecast");
        Ok(future
            .into_iter()
            .map(|timestamp| TimeSeriesRecord {
                timestamp,
                value: fitted.predict_at(timestamp),
            })
            .collect())
    }

    /// Score the model against a series' own timestamps
    pub fn evaluate(&self, series: &TimeSeries) -> Result<ForecastMetrics> {
        let fitted = self.fitted()?;
        if series.is_empty() {
            return Err(ForecastError::EmptyInput(
                "evaluation series must not be empty".to_string(),
            ));
        }

        let predicted: HashMap<_, _> = series
            .points()
            .iter()
            .map(|p| (p.timestamp, fitted.predict_at(p.timestamp)))
            .filter(|(_, v)| v.is_finite())
            .collect();

        let joined: Vec<(f64, f64)> = series
            .points()
            .iter()
            .filter_map(|p| predicted.get(&p.timestamp).map(|yhat| (*yhat, p.value)))
            .collect();

        ForecastMetrics::from_pairs(&joined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate, NaiveDateTime};

    fn day(d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 1, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn sample_series() -> TimeSeries {
        let values = [10.0, 12.0, 13.0, 15.0, 14.0, 16.0, 18.0, 17.0, 19.0, 20.0];
        TimeSeries::from_pairs(values.iter().enumerate().map(|(i, v)| (day(i as u32 + 1), *v)))
    }

    fn trained() -> ForecastModel {
        let mut model = ForecastModel::new();
        model.train(&sample_series()).unwrap();
        model
    }

    #[test]
    fn test_untrained_model_rejects_predict_and_evaluate() {
        let model = ForecastModel::new();
        assert!(matches!(
            model.predict(&sample_series(), 3),
            Err(ForecastError::NotTrained)
        ));
        assert!(matches!(
            model.evaluate(&sample_series()),
            Err(ForecastError::NotTrained)
        ));
    }

    #[test]
    fn test_train_rejects_empty_and_retraining() {
        let mut model = ForecastModel::new();
        assert!(matches!(
            model.train(&TimeSeries::default()),
            Err(ForecastError::EmptyInput(_))
        ));
        model.train(&sample_series()).unwrap();
        assert!(model.train(&sample_series()).is_err());
    }

    #[test]
    fn test_predict_horizon_is_exact() {
        let model = trained();
        let input = sample_series().tail(3);
        let forecast = model.predict(&input, 5).unwrap();

        assert_eq!(forecast.len(), 5);
        let last = input.last_timestamp().unwrap();
        for (i, point) in forecast.iter().enumerate() {
            assert_eq!(point.timestamp, last + Duration::days(i as i64 + 1));
        }
    }

    #[test]
    fn test_predict_continues_from_input_not_training_cutoff() {
        let model = trained();
        let later = TimeSeries::from_pairs(vec![(day(20), 30.0), (day(21), 31.0)]);
        let forecast = model.predict(&later, 2).unwrap();
        assert_eq!(forecast[0].timestamp, day(22));
        assert_eq!(forecast[1].timestamp, day(23));
    }

    #[test]
    fn test_predict_defaults_to_daily_for_irregular_input() {
        let model = trained();
        let irregular = TimeSeries::from_pairs(vec![(day(1), 1.0), (day(2), 1.0), (day(5), 1.0)]);
        let forecast = model.predict(&irregular, 2).unwrap();
        assert_eq!(forecast[0].timestamp, day(6));
        assert_eq!(forecast[1].timestamp, day(7));
    }

    #[test]
    fn test_predict_input_validation() {
        let model = trained();
        assert!(matches!(
            model.predict(&TimeSeries::default(), 1),
            Err(ForecastError::EmptyInput(_))
        ));
        assert!(matches!(
            model.predict(&sample_series().tail(1), 1),
            Err(ForecastError::InsufficientData(_))
        ));
        assert!(model.predict(&sample_series(), 0).unwrap().is_empty());
    }

    #[test]
    fn test_validate_steps() {
        assert!(matches!(validate_steps(-1, 100), Err(ForecastError::InvalidArgument(_))));
        assert!(matches!(validate_steps(0, 100), Err(ForecastError::InvalidArgument(_))));
        assert_eq!(validate_steps(5, 100).unwrap(), 5);
        assert_eq!(validate_steps(100, 100).unwrap(), 100);
    }

    #[test]
    fn test_validate_steps_caps_horizon() {
        assert!(matches!(validate_steps(101, 100), Err(ForecastError::InvalidArgument(_))));
        assert!(matches!(
            validate_steps(i64::MAX, MAX_FORECAST_STEPS),
            Err(ForecastError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_evaluate_reports_metrics() {
        let model = trained();
        let metrics = model.evaluate(&sample_series()).unwrap();
        assert!(metrics.rmse.is_finite() && metrics.rmse >= 0.0);
        assert!(metrics.mae <= metrics.rmse + 1e-12);
        assert!(matches!(
            model.evaluate(&TimeSeries::default()),
            Err(ForecastError::EmptyInput(_))
        ));
    }

    #[test]
    fn test_metrics_from_pairs() {
        let metrics = ForecastMetrics::from_pairs(&[(1.0, 2.0), (3.0, 1.0)]).unwrap();
        assert!((metrics.mae - 1.5).abs() < 1e-12);
        assert!((metrics.rmse - (2.5f64).sqrt()).abs() < 1e-12);
        assert!(matches!(
            ForecastMetrics::from_pairs(&[]),
            Err(ForecastError::NoOverlap)
        ));
    }
}
