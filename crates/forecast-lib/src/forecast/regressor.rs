//! Trend + calendar-seasonality regressor behind the forecast adapter
//!
//! Fits a least-squares linear trend over time, then day-of-week,
//! hour-of-day and holiday effects on top of it. Effects are multiplicative
//! while the trend stays positive over the training window and additive
//! otherwise.

use crate::error::{ForecastError, Result};
use crate::models::TimeSeriesRecord;
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Trend values at or below this make ratios meaningless
const MIN_MULTIPLICATIVE_TREND: f64 = 1e-6;

/// Fixed-date national holidays (month, day)
const NATIONAL_HOLIDAYS: &[(u32, u32)] = &[
    (1, 1),
    (4, 21),
    (5, 1),
    (9, 7),
    (10, 12),
    (11, 2),
    (11, 15),
    (12, 25),
];

/// Whether a date falls on the national holiday calendar
pub fn is_holiday(date: NaiveDate) -> bool {
    let key = (date.month(), date.day());
    // Consciência Negra became a national holiday in 2024
    NATIONAL_HOLIDAYS.contains(&key) || (date.year() >= 2024 && key == (11, 20))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeasonalityMode {
    Additive,
    Multiplicative,
}

impl SeasonalityMode {
    fn identity(&self) -> f64 {
        match self {
            SeasonalityMode::Additive => 0.0,
            SeasonalityMode::Multiplicative => 1.0,
        }
    }

    /// Residual component of `value` relative to `base`
    fn component(&self, value: f64, base: f64) -> f64 {
        match self {
            SeasonalityMode::Additive => value - base,
            SeasonalityMode::Multiplicative => value / base,
        }
    }

    fn remove(&self, component: f64, effect: f64) -> f64 {
        match self {
            SeasonalityMode::Additive => component - effect,
            SeasonalityMode::Multiplicative if effect.abs() > f64::EPSILON => component / effect,
            SeasonalityMode::Multiplicative => component,
        }
    }

    fn apply(&self, base: f64, effect: f64) -> f64 {
        match self {
            SeasonalityMode::Additive => base + effect,
            SeasonalityMode::Multiplicative => base * effect,
        }
    }
}

/// Fitted regressor; immutable once built
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendSeasonalRegressor {
    origin: NaiveDateTime,
    intercept: f64,
    /// Change per day
    slope: f64,
    mode: SeasonalityMode,
    weekday_effects: Vec<f64>,
    hour_effects: Vec<f64>,
    holiday_effect: f64,
}

fn days_since(origin: NaiveDateTime, ts: NaiveDateTime) -> f64 {
    (ts - origin).num_seconds() as f64 / SECONDS_PER_DAY
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Least-squares `(intercept, slope)` of `y` over `x`
fn linear_fit(x: &[f64], y: &[f64]) -> (f64, f64) {
    let n = x.len() as f64;
    let mean_x = mean(x);
    let mean_y = mean(y);
    let sxx: f64 = x.iter().map(|xi| (xi - mean_x).powi(2)).sum();
    if n < 2.0 || sxx.abs() < f64::EPSILON {
        return (mean_y, 0.0);
    }
    let sxy: f64 = x
        .iter()
        .zip(y)
        .map(|(xi, yi)| (xi - mean_x) * (yi - mean_y))
        .sum();
    let slope = sxy / sxx;
    (mean_y - slope * mean_x, slope)
}

/// Mean component per calendar bucket; buckets never observed stay neutral
///
/// With fewer than two distinct buckets the effect is indistinguishable from
/// the trend, so every bucket stays neutral.
fn bucket_effects(
    buckets: &[usize],
    components: &[f64],
    size: usize,
    identity: f64,
) -> Vec<f64> {
    let mut sums = vec![0.0; size];
    let mut counts = vec![0usize; size];
    for (&bucket, &c) in buckets.iter().zip(components) {
        if c.is_finite() {
            sums[bucket] += c;
            counts[bucket] += 1;
        }
    }
    if counts.iter().filter(|&&c| c > 0).count() < 2 {
        return vec![identity; size];
    }
    sums.iter()
        .zip(&counts)
        .map(|(s, &c)| if c > 0 { s / c as f64 } else { identity })
        .collect()
}

impl TrendSeasonalRegressor {
    /// Fit against ordered observations
    pub fn fit(points: &[TimeSeriesRecord]) -> Result<Self> {
        let origin = points
            .first()
            .map(|p| p.timestamp)
            .ok_or_else(|| ForecastError::EmptyInput("training series is empty".to_string()))?;

        let x: Vec<f64> = points.iter().map(|p| days_since(origin, p.timestamp)).collect();
        let y: Vec<f64> = points.iter().map(|p| p.value).collect();
        if y.iter().any(|v| !v.is_finite()) {
            return Err(ForecastError::InvalidArgument(
                "training series contains non-finite values".to_string(),
            ));
        }

        let (intercept, slope) = linear_fit(&x, &y);
        let trend: Vec<f64> = x.iter().map(|xi| intercept + slope * xi).collect();
        let mode = if trend.iter().all(|t| *t > MIN_MULTIPLICATIVE_TREND) {
            SeasonalityMode::Multiplicative
        } else {
            SeasonalityMode::Additive
        };
        let identity = mode.identity();

        let mut components: Vec<f64> = y
            .iter()
            .zip(&trend)
            .map(|(yi, ti)| mode.component(*yi, *ti))
            .collect();

        let weekdays: Vec<usize> = points
            .iter()
            .map(|p| p.timestamp.weekday().num_days_from_monday() as usize)
            .collect();
        let weekday_effects = bucket_effects(&weekdays, &components, 7, identity);
        for (c, &w) in components.iter_mut().zip(&weekdays) {
            *c = mode.remove(*c, weekday_effects[w]);
        }

        let hours: Vec<usize> = points.iter().map(|p| p.timestamp.hour() as usize).collect();
        let hour_effects = bucket_effects(&hours, &components, 24, identity);
        for (c, &h) in components.iter_mut().zip(&hours) {
            *c = mode.remove(*c, hour_effects[h]);
        }

        let holidays: Vec<usize> = points
            .iter()
            .map(|p| usize::from(is_holiday(p.timestamp.date())))
            .collect();
        let holiday_effect = bucket_effects(&holidays, &components, 2, identity)[1];

        Ok(Self {
            origin,
            intercept,
            slope,
            mode,
            weekday_effects,
            hour_effects,
            holiday_effect,
        })
    }

    pub fn mode(&self) -> SeasonalityMode {
        self.mode
    }

    /// Point prediction at an arbitrary timestamp
    pub fn predict_at(&self, ts: NaiveDateTime) -> f64 {
        let trend = self.intercept + self.slope * days_since(self.origin, ts);
        let weekday = self.weekday_effects[ts.weekday().num_days_from_monday() as usize];
        let hour = self.hour_effects[ts.hour() as usize];
        let mut value = self.mode.apply(trend, weekday);
        value = self.mode.apply(value, hour);
        if is_holiday(ts.date()) {
            value = self.mode.apply(value, self.holiday_effect);
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn daily(values: &[f64]) -> Vec<TimeSeriesRecord> {
        let start = NaiveDate::from_ymd_opt(2023, 3, 6)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, v)| TimeSeriesRecord {
                timestamp: start + chrono::Duration::days(i as i64),
                value: *v,
            })
            .collect()
    }

    #[test]
    fn test_linear_fit_exact_line() {
        let (a, b) = linear_fit(&[0.0, 1.0, 2.0, 3.0], &[1.0, 3.0, 5.0, 7.0]);
        assert!((a - 1.0).abs() < 1e-9);
        assert!((b - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_fits_a_straight_line_exactly() {
        let points = daily(&[10.0, 11.0, 12.0, 13.0, 14.0, 15.0, 16.0, 17.0]);
        let model = TrendSeasonalRegressor::fit(&points).unwrap();
        assert_eq!(model.mode(), SeasonalityMode::Multiplicative);
        for p in &points {
            assert!((model.predict_at(p.timestamp) - p.value).abs() < 1e-6);
        }
        let next = points.last().unwrap().timestamp + chrono::Duration::days(1);
        assert!(model.predict_at(next) > 17.0);
    }

    #[test]
    fn test_additive_when_trend_crosses_zero() {
        let points = daily(&[-3.0, -1.0, 1.0, 3.0]);
        let model = TrendSeasonalRegressor::fit(&points).unwrap();
        assert_eq!(model.mode(), SeasonalityMode::Additive);
    }

    #[test]
    fn test_single_point_is_flat() {
        let points = daily(&[42.0]);
        let model = TrendSeasonalRegressor::fit(&points).unwrap();
        let later = points[0].timestamp + chrono::Duration::days(30);
        assert!((model.predict_at(later) - 42.0).abs() < 1e-9);
    }

    #[test]
    fn test_holiday_calendar() {
        assert!(is_holiday(NaiveDate::from_ymd_opt(2023, 12, 25).unwrap()));
        assert!(!is_holiday(NaiveDate::from_ymd_opt(2023, 11, 20).unwrap()));
        assert!(is_holiday(NaiveDate::from_ymd_opt(2024, 11, 20).unwrap()));
    }
}
