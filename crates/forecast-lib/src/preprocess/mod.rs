//! Tabular preprocessing
//!
//! Turns row-oriented tabular input into the time-indexed representation each
//! model type needs:
//! - a univariate `TimeSeries` for forecasting (strict numeric target)
//! - a numeric `FeatureFrame` for anomaly detection (lenient coercion)
//!
//! Timestamp parsing is strict on both paths: one bad `DIA`/`HORA` pair fails
//! the whole batch.

mod csv_input;

pub use csv_input::records_from_csv;

use crate::error::{ForecastError, Result};
use crate::models::{
    FeatureFrame, TabularRecord, TimeSeries, TimeSeriesRecord, DATE_COLUMN, HOUR_COLUMN,
    WEEKDAY_COLUMN,
};
use chrono::NaiveDateTime;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeSet;
use tracing::debug;

/// Maximum rows kept for anomaly training before downsampling kicks in
pub const MAX_TRAINING_SAMPLES: usize = 10_000;

/// Seed used for reproducible downsampling
pub const SAMPLING_SEED: u64 = 42;

/// Format of `DIA + " " + HORA`
const TIMESTAMP_INPUT_FORMAT: &str = "%d/%m/%Y %H";

/// Parse `DIA` and `HORA` into an hourly timestamp
pub fn parse_timestamp(dia: &str, hora: &str) -> Result<NaiveDateTime> {
    let hour = hora.trim();
    // "13:00" is accepted as hour 13; any other minute value is rejected
    let hour = hour.strip_suffix(":00").unwrap_or(hour);
    let raw = format!("{} {}", dia.trim(), hour);
    // chrono needs a minute to build a datetime
    NaiveDateTime::parse_from_str(&format!("{}:00", raw), &format!("{}:%M", TIMESTAMP_INPUT_FORMAT))
        .map_err(|e| {
            ForecastError::Parse(format!(
                "could not parse '{}' and '{}' as {}: {}",
                dia, hora, TIMESTAMP_INPUT_FORMAT, e
            ))
        })
}

fn parse_row_timestamp(index: usize, row: &TabularRecord) -> Result<NaiveDateTime> {
    parse_timestamp(&row.dia, &row.hora).map_err(|e| match e {
        ForecastError::Parse(msg) => ForecastError::Parse(format!("row {}: {}", index, msg)),
        other => other,
    })
}

/// Shape rows into the `(timestamp, value)` series for the forecast model
///
/// The target column is renamed to the value field and all other columns are
/// dropped.
pub fn shape_for_forecast(rows: &[TabularRecord], target_column: &str) -> Result<TimeSeries> {
    if rows.is_empty() {
        return Err(ForecastError::EmptyInput(
            "time series data must not be empty".to_string(),
        ));
    }

    let mut records = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        let cell = row.columns.get(target_column).ok_or_else(|| {
            ForecastError::Schema(format!(
                "target column '{}' not found in input row {}",
                target_column, i
            ))
        })?;
        let timestamp = parse_row_timestamp(i, row)?;
        let value = cell.as_number().ok_or_else(|| {
            ForecastError::Parse(format!(
                "row {}: target column '{}' value {:?} is not numeric",
                i, target_column, cell
            ))
        })?;
        records.push(TimeSeriesRecord { timestamp, value });
    }

    let series = TimeSeries::from_records(records);
    debug!(
        target = %target_column,
        rows = rows.len(),
        points = series.len(),
        "Shaped forecast series"
    );
    Ok(series)
}

/// Shape rows into a numeric frame for the anomaly model
///
/// Every column other than date, hour and weekday is coerced to a number,
/// with non-numeric or missing cells becoming `0.0`. When `sample_limit` is
/// set and exceeded, a reproducible random subset of that many rows is kept.
pub fn shape_for_anomaly(
    rows: &[TabularRecord],
    sample_limit: Option<usize>,
) -> Result<FeatureFrame> {
    if rows.is_empty() {
        return Err(ForecastError::EmptyInput(
            "anomaly detection data must not be empty".to_string(),
        ));
    }

    let selected = downsample(rows, sample_limit);

    let columns: BTreeSet<&str> = selected
        .iter()
        .flat_map(|row| row.columns.keys().map(String::as_str))
        .filter(|name| ![DATE_COLUMN, HOUR_COLUMN, WEEKDAY_COLUMN].contains(name))
        .collect();

    let mut indexed = Vec::with_capacity(selected.len());
    for (i, row) in selected.iter().enumerate() {
        let timestamp = parse_row_timestamp(i, row)?;
        let values: Vec<f64> = columns
            .iter()
            .map(|name| {
                row.columns
                    .get(*name)
                    .and_then(|cell| cell.as_number())
                    .unwrap_or(0.0)
            })
            .collect();
        indexed.push((timestamp, values));
    }
    // Stable: rows sharing a timestamp keep their input order
    indexed.sort_by_key(|(ts, _)| *ts);

    let index: Vec<NaiveDateTime> = indexed.iter().map(|(ts, _)| *ts).collect();
    let frame_columns = columns
        .iter()
        .enumerate()
        .map(|(c, name)| {
            (
                name.to_string(),
                indexed.iter().map(|(_, values)| values[c]).collect(),
            )
        })
        .collect();

    let frame = FeatureFrame::new(index, frame_columns)?;
    debug!(
        rows = rows.len(),
        kept = frame.len(),
        columns = frame.column_names().len(),
        "Shaped anomaly frame"
    );
    Ok(frame)
}

fn downsample(rows: &[TabularRecord], sample_limit: Option<usize>) -> Vec<&TabularRecord> {
    match sample_limit {
        Some(limit) if rows.len() > limit => {
            let mut rng = StdRng::seed_from_u64(SAMPLING_SEED);
            let mut picked = rand::seq::index::sample(&mut rng, rows.len(), limit).into_vec();
            picked.sort_unstable();
            debug!(rows = rows.len(), limit, "Downsampling training rows");
            picked.into_iter().map(|i| &rows[i]).collect()
        }
        _ => rows.iter().collect(),
    }
}
