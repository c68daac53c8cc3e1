//! Core data models for the model lifecycle service

use crate::error::{ForecastError, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Column holding the date (`DD/MM/YYYY`)
pub const DATE_COLUMN: &str = "DIA";
/// Column holding the hour of day
pub const HOUR_COLUMN: &str = "HORA";
/// Decorative weekday label, never used as a feature
pub const WEEKDAY_COLUMN: &str = "DIA_DA_SEMANA";

/// A single cell of tabular input
///
/// JSON bodies carry numbers or strings; CSV uploads always carry strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    Number(f64),
    Text(String),
}

impl Cell {
    /// Numeric value of the cell, if it has one
    ///
    /// Strings are trimmed and accept a decimal comma (`"12,5"`).
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Cell::Null => None,
            Cell::Number(n) => Some(*n).filter(|n| n.is_finite()),
            Cell::Text(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return None;
                }
                trimmed
                    .parse::<f64>()
                    .or_else(|_| trimmed.replace(',', ".").parse::<f64>())
                    .ok()
                    .filter(|n| n.is_finite())
            }
        }
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_string())
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::Number(value)
    }
}

/// One row of tabular input: date, hour, weekday label and named counts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabularRecord {
    #[serde(rename = "DIA")]
    pub dia: String,
    #[serde(rename = "HORA", deserialize_with = "string_or_number")]
    pub hora: String,
    #[serde(
        rename = "DIA_DA_SEMANA",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub dia_da_semana: Option<String>,
    #[serde(flatten)]
    pub columns: BTreeMap<String, Cell>,
}

/// Hours arrive as `"13"` from CSV and sometimes as `13` from JSON
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Cell::deserialize(deserializer)? {
        Cell::Text(s) => Ok(s),
        Cell::Number(n) if n.fract() == 0.0 => Ok(format!("{}", n as i64)),
        Cell::Number(n) => Ok(n.to_string()),
        Cell::Null => Err(serde::de::Error::custom("HORA must not be null")),
    }
}

impl TabularRecord {
    pub fn new(dia: impl Into<String>, hora: impl Into<String>) -> Self {
        Self {
            dia: dia.into(),
            hora: hora.into(),
            dia_da_semana: None,
            columns: BTreeMap::new(),
        }
    }

    /// Builder-style helper to attach a named cell
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Cell>) -> Self {
        self.columns.insert(column.into(), value.into());
        self
    }
}

/// A single `(timestamp, value)` observation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesRecord {
    pub timestamp: NaiveDateTime,
    pub value: f64,
}

/// Time-indexed univariate series, ordered and free of duplicate timestamps
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeSeries {
    points: Vec<TimeSeriesRecord>,
}

impl TimeSeries {
    /// Index records by timestamp; on collision the later record wins
    pub fn from_records(records: impl IntoIterator<Item = TimeSeriesRecord>) -> Self {
        let mut records: Vec<TimeSeriesRecord> = records.into_iter().collect();
        // Stable sort keeps input order among equal timestamps
        records.sort_by_key(|r| r.timestamp);

        let mut points: Vec<TimeSeriesRecord> = Vec::with_capacity(records.len());
        for record in records {
            match points.last_mut() {
                Some(last) if last.timestamp == record.timestamp => *last = record,
                _ => points.push(record),
            }
        }
        Self { points }
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (NaiveDateTime, f64)>) -> Self {
        Self::from_records(
            pairs
                .into_iter()
                .map(|(timestamp, value)| TimeSeriesRecord { timestamp, value }),
        )
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[TimeSeriesRecord] {
        &self.points
    }

    pub fn timestamps(&self) -> Vec<NaiveDateTime> {
        self.points.iter().map(|p| p.timestamp).collect()
    }

    pub fn last_timestamp(&self) -> Option<NaiveDateTime> {
        self.points.last().map(|p| p.timestamp)
    }

    /// The last `n` points as a new series
    pub fn tail(&self, n: usize) -> TimeSeries {
        let start = self.points.len().saturating_sub(n);
        Self {
            points: self.points[start..].to_vec(),
        }
    }
}

/// Time-indexed multivariate numeric frame (column-major)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureFrame {
    index: Vec<NaiveDateTime>,
    names: Vec<String>,
    data: Vec<Vec<f64>>,
}

impl FeatureFrame {
    /// Build a frame; every column must have one value per index entry
    pub fn new(index: Vec<NaiveDateTime>, columns: Vec<(String, Vec<f64>)>) -> Result<Self> {
        let mut names = Vec::with_capacity(columns.len());
        let mut data = Vec::with_capacity(columns.len());
        for (name, values) in columns {
            if values.len() != index.len() {
                return Err(ForecastError::Schema(format!(
                    "column '{}' has {} values, index has {}",
                    name,
                    values.len(),
                    index.len()
                )));
            }
            if names.contains(&name) {
                return Err(ForecastError::Schema(format!("duplicate column '{}'", name)));
            }
            names.push(name);
            data.push(values);
        }
        Ok(Self { index, names, data })
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn index(&self) -> &[NaiveDateTime] {
        &self.index
    }

    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.data[i].as_slice())
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &[f64])> {
        self.names
            .iter()
            .map(String::as_str)
            .zip(self.data.iter().map(Vec::as_slice))
    }

    /// True when timestamps never decrease
    pub fn is_time_ordered(&self) -> bool {
        self.index.windows(2).all(|w| w[0] <= w[1])
    }
}

fn validate_key_part(label: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ForecastError::InvalidArgument(format!("{} must not be empty", label)));
    }
    if value.contains(['/', '\\', '\0']) || value.contains("..") || value.chars().any(char::is_control) {
        return Err(ForecastError::InvalidArgument(format!(
            "{} '{}' contains forbidden characters",
            label, value
        )));
    }
    Ok(())
}

/// Identifier of one trained artifact family
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelId(String);

impl ModelId {
    /// Wrap a raw identifier; it ends up in file names, so separators are rejected
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        validate_key_part("model id", &raw)?;
        Ok(Self(raw))
    }

    /// `{app_id}_{target_column}`
    pub fn forecast(app_id: &str, target_column: &str) -> Result<Self> {
        validate_key_part("app id", app_id)?;
        validate_key_part("target column", target_column)?;
        Self::new(format!("{}_{}", app_id, target_column))
    }

    /// `{app_id lowercased}_multivariate_anomaly`
    pub fn anomaly(app_id: &str) -> Result<Self> {
        validate_key_part("app id", app_id)?;
        Self::new(format!("{}_multivariate_anomaly", app_id.to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Version token of a stored artifact (`v1`, `v2`, ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelVersion(String);

impl ModelVersion {
    pub fn from_number(n: u64) -> Self {
        Self(format!("v{}", n))
    }

    /// Accept any token read back from the registry
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        validate_key_part("model version", &raw)?;
        Ok(Self(raw))
    }

    /// Numeric suffix, `None` for tokens such as `v2023-01-01`
    pub fn number(&self) -> Option<u64> {
        self.0.trim_start_matches('v').parse().ok()
    }

    /// `current + 1`, or `v1` when there is no numeric current version
    pub fn next_after(current: Option<&ModelVersion>) -> Result<Self> {
        let number = current.and_then(ModelVersion::number).unwrap_or(0);
        number.checked_add(1).map(Self::from_number).ok_or_else(|| {
            ForecastError::Internal(format!(
                "version numbering exhausted after '{}'",
                current.map(ModelVersion::as_str).unwrap_or_default()
            ))
        })
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Registry record naming the version that serves traffic for one model id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionEntry {
    pub version: ModelVersion,
    pub path: PathBuf,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    /// Absent in entries written by older tooling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promoted_at: Option<DateTime<Utc>>,
}

impl ProductionEntry {
    pub fn new(version: ModelVersion, path: PathBuf, metrics: BTreeMap<String, f64>) -> Self {
        Self {
            version,
            path,
            metrics,
            promoted_at: Some(Utc::now()),
        }
    }

    /// Recorded RMSE, when the lineage has one
    pub fn rmse(&self) -> Option<f64> {
        self.metrics.get("rmse").copied().filter(|v| v.is_finite())
    }
}

/// Result of a completed training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainOutcome {
    pub message: String,
    pub model_id: ModelId,
    pub promoted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_version: Option<ModelVersion>,
    pub metrics: BTreeMap<String, f64>,
}

/// Acknowledgement returned when a background training run is scheduled
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingAccepted {
    pub message: String,
    pub model_id: ModelId,
    pub rows: usize,
}

/// Forecast served from the production model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastResponse {
    pub forecast: BTreeMap<String, f64>,
    pub model_id: ModelId,
    pub model_version: ModelVersion,
}

/// Outlier/inlier marker, serialized as `-1` / `1`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i8", try_from = "i8")]
pub enum AnomalyLabel {
    Outlier,
    Inlier,
}

impl AnomalyLabel {
    pub fn is_outlier(&self) -> bool {
        matches!(self, AnomalyLabel::Outlier)
    }
}

impl From<AnomalyLabel> for i8 {
    fn from(label: AnomalyLabel) -> Self {
        match label {
            AnomalyLabel::Outlier => -1,
            AnomalyLabel::Inlier => 1,
        }
    }
}

impl TryFrom<i8> for AnomalyLabel {
    type Error = String;

    fn try_from(value: i8) -> std::result::Result<Self, Self::Error> {
        match value {
            -1 => Ok(AnomalyLabel::Outlier),
            1 => Ok(AnomalyLabel::Inlier),
            other => Err(format!("invalid anomaly label {}", other)),
        }
    }
}

/// One scored row of a detection request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyRow {
    pub timestamp: String,
    #[serde(flatten)]
    pub fields: BTreeMap<String, f64>,
    pub anomaly: AnomalyLabel,
}

/// Anomaly flags served from the production detector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionResponse {
    pub message: String,
    pub model_id: ModelId,
    pub model_version: ModelVersion,
    pub anomalies: Vec<AnomalyRow>,
}

/// Timestamp rendering used in responses
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 1, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_model_id_derivation() {
        assert_eq!(
            ModelId::forecast("store1", "Autorizada").unwrap().as_str(),
            "store1_Autorizada"
        );
        assert_eq!(
            ModelId::anomaly("Store1").unwrap().as_str(),
            "store1_multivariate_anomaly"
        );
    }

    #[test]
    fn test_model_id_rejects_path_segments() {
        assert!(ModelId::forecast("../etc", "x").is_err());
        assert!(ModelId::forecast("app", "a/b").is_err());
        assert!(ModelId::anomaly("").is_err());
    }

    #[test]
    fn test_version_numbering() {
        assert_eq!(ModelVersion::next_after(None).unwrap().as_str(), "v1");
        let v3 = ModelVersion::from_number(3);
        assert_eq!(ModelVersion::next_after(Some(&v3)).unwrap().as_str(), "v4");
        let odd = ModelVersion::parse("v2023-01-01").unwrap();
        assert_eq!(odd.number(), None);
        assert_eq!(ModelVersion::next_after(Some(&odd)).unwrap().as_str(), "v1");
    }

    #[test]
    fn test_version_numbering_does_not_wrap() {
        let last = ModelVersion::from_number(u64::MAX);
        assert!(matches!(
            ModelVersion::next_after(Some(&last)),
            Err(ForecastError::Internal(_))
        ));
    }

    #[test]
    fn test_series_last_write_wins() {
        let series = TimeSeries::from_pairs(vec![
            (ts(2, 0), 2.0),
            (ts(1, 0), 1.0),
            (ts(2, 0), 5.0),
        ]);
        assert_eq!(series.len(), 2);
        assert_eq!(series.points()[0].value, 1.0);
        assert_eq!(series.points()[1].value, 5.0);
    }

    #[test]
    fn test_cell_numeric_coercion() {
        assert_eq!(Cell::from("12").as_number(), Some(12.0));
        assert_eq!(Cell::from(" 12,5 ").as_number(), Some(12.5));
        assert_eq!(Cell::from("abc").as_number(), None);
        assert_eq!(Cell::Null.as_number(), None);
        assert_eq!(Cell::Number(3.0).as_number(), Some(3.0));
    }

    #[test]
    fn test_tabular_record_json_shape() {
        let json = r#"{"DIA":"01/01/2023","HORA":"13","DIA_DA_SEMANA":"Domingo","Autorizada":"10","Negada":3}"#;
        let record: TabularRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.dia, "01/01/2023");
        assert_eq!(record.dia_da_semana.as_deref(), Some("Domingo"));
        assert_eq!(record.columns["Autorizada"], Cell::Text("10".into()));
        assert_eq!(record.columns["Negada"], Cell::Number(3.0));
    }

    #[test]
    fn test_production_entry_without_timestamp() {
        let json = r#"{"version":"v2","path":"models/store1_Autorizada_model_v2.json","metrics":{"rmse":1.5}}"#;
        let entry: ProductionEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.version.number(), Some(2));
        assert_eq!(entry.rmse(), Some(1.5));
        assert!(entry.promoted_at.is_none());
    }

    #[test]
    fn test_anomaly_label_serialization() {
        assert_eq!(serde_json::to_string(&AnomalyLabel::Outlier).unwrap(), "-1");
        let label: AnomalyLabel = serde_json::from_str("1").unwrap();
        assert_eq!(label, AnomalyLabel::Inlier);
    }

    #[test]
    fn test_frame_rejects_ragged_columns() {
        let result = FeatureFrame::new(
            vec![ts(1, 0), ts(1, 1)],
            vec![("a".to_string(), vec![1.0])],
        );
        assert!(matches!(result, Err(ForecastError::Schema(_))));
    }
}
