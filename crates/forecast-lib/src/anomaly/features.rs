//! Rolling-window and calendar feature construction

use crate::models::FeatureFrame;
use chrono::{Datelike, NaiveDateTime, Timelike};

/// Rolling window sizes, in rows
pub const ROLLING_WINDOWS: [usize; 3] = [5, 15, 60];

/// Leading rows whose smallest rolling window is still filling
pub const WARM_UP_ROWS: usize = ROLLING_WINDOWS[0] - 1;

/// Calendar features appended after the per-column features
pub const CALENDAR_FEATURES: [&str; 5] = ["hour", "dayofweek", "dayofyear", "month", "year"];

/// Row-major feature matrix with named columns
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    pub names: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

impl FeatureMatrix {
    /// Project onto `schema`: missing features become 0, extra ones are dropped
    pub fn reconcile(&self, schema: &[String]) -> FeatureMatrix {
        let positions: Vec<Option<usize>> = schema
            .iter()
            .map(|name| self.names.iter().position(|n| n == name))
            .collect();
        let rows = self
            .rows
            .iter()
            .map(|row| {
                positions
                    .iter()
                    .map(|p| p.map(|i| row[i]).unwrap_or(0.0))
                    .collect()
            })
            .collect();
        FeatureMatrix {
            names: schema.to_vec(),
            rows,
        }
    }
}

#[derive(Clone, Copy)]
enum Stat {
    Mean,
    Std,
    Sum,
}

impl Stat {
    fn label(&self) -> &'static str {
        match self {
            Stat::Mean => "mean",
            Stat::Std => "std",
            Stat::Sum => "sum",
        }
    }

    /// Statistic over one window; sample std is undefined for a single value
    fn compute(&self, window: &[f64]) -> f64 {
        let n = window.len() as f64;
        let sum: f64 = window.iter().sum();
        match self {
            Stat::Sum => sum,
            Stat::Mean => sum / n,
            Stat::Std if window.len() < 2 => f64::NAN,
            Stat::Std => {
                let mean = sum / n;
                let ss: f64 = window.iter().map(|v| (v - mean).powi(2)).sum();
                (ss / (n - 1.0)).sqrt()
            }
        }
    }
}

/// Trailing window statistic with `min_periods = 1`
fn rolling(values: &[f64], window: usize, stat: Stat) -> Vec<f64> {
    (0..values.len())
        .map(|i| {
            let start = (i + 1).saturating_sub(window);
            stat.compute(&values[start..=i])
        })
        .collect()
}

fn calendar(ts: &NaiveDateTime) -> [f64; 5] {
    [
        ts.hour() as f64,
        ts.weekday().num_days_from_monday() as f64,
        ts.ordinal() as f64,
        ts.month() as f64,
        ts.year() as f64,
    ]
}

/// Expand a frame into the detector's feature matrix
///
/// Per column: the raw value, then mean/std/sum for each rolling window.
/// Calendar features come last. Undefined values are replaced by 0.
pub fn build_features(frame: &FeatureFrame) -> FeatureMatrix {
    let mut names = Vec::new();
    let mut columns: Vec<Vec<f64>> = Vec::new();

    for (name, values) in frame.columns() {
        names.push(name.to_string());
        columns.push(values.to_vec());
        for window in ROLLING_WINDOWS {
            for stat in [Stat::Mean, Stat::Std, Stat::Sum] {
                names.push(format!("{}_rolling_{}_{}", name, stat.label(), window));
                columns.push(rolling(values, window, stat));
            }
        }
    }
    names.extend(CALENDAR_FEATURES.iter().map(|s| s.to_string()));

    let rows = frame
        .index()
        .iter()
        .enumerate()
        .map(|(r, ts)| {
            columns
                .iter()
                .map(|col| col[r])
                .chain(calendar(ts))
                .map(|v| if v.is_finite() { v } else { 0.0 })
                .collect()
        })
        .collect();

    FeatureMatrix { names, rows }
}
