//! Semicolon-delimited CSV uploads into tabular records

use crate::error::{ForecastError, Result};
use crate::models::{Cell, TabularRecord, DATE_COLUMN, HOUR_COLUMN, WEEKDAY_COLUMN};
use std::collections::BTreeMap;

/// Parse an uploaded CSV body; every cell is kept as a string
pub fn records_from_csv(bytes: &[u8]) -> Result<Vec<TabularRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .trim(csv::Trim::All)
        .flexible(false)
        .from_reader(bytes);

    let headers = reader
        .headers()
        .map_err(|e| ForecastError::Parse(format!("invalid CSV header: {}", e)))?
        .clone();

    let position = |name: &str| headers.iter().position(|h| h == name);
    let date_idx = position(DATE_COLUMN).ok_or_else(|| {
        ForecastError::Schema(format!("CSV is missing the '{}' column", DATE_COLUMN))
    })?;
    let hour_idx = position(HOUR_COLUMN).ok_or_else(|| {
        ForecastError::Schema(format!("CSV is missing the '{}' column", HOUR_COLUMN))
    })?;
    let weekday_idx = position(WEEKDAY_COLUMN);

    let mut records = Vec::new();
    for (line, result) in reader.records().enumerate() {
        let row = result
            .map_err(|e| ForecastError::Parse(format!("CSV record {}: {}", line + 1, e)))?;

        let mut columns = BTreeMap::new();
        for (i, value) in row.iter().enumerate() {
            if i == date_idx || i == hour_idx || Some(i) == weekday_idx {
                continue;
            }
            if let Some(name) = headers.get(i) {
                columns.insert(name.to_string(), Cell::Text(value.to_string()));
            }
        }

        records.push(TabularRecord {
            dia: row.get(date_idx).unwrap_or_default().to_string(),
            hora: row.get(hour_idx).unwrap_or_default().to_string(),
            dia_da_semana: weekday_idx.and_then(|i| row.get(i)).map(str::to_string),
            columns,
        });
    }

    Ok(records)
}
