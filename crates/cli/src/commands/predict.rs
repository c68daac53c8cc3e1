//! Forecast command

use anyhow::Result;
use colored::Colorize;
use std::path::Path;
use tabled::Tabled;

use crate::client::{ApiClient, Upload};
use crate::output::{format_value, print_json, print_table, OutputFormat};

#[derive(Tabled)]
struct ForecastRow {
    #[tabled(rename = "Timestamp")]
    timestamp: String,
    #[tabled(rename = "Forecast")]
    value: String,
}

pub async fn predict(
    client: &ApiClient,
    app_id: &str,
    target_column: &str,
    steps: i64,
    file: &Path,
    format: OutputFormat,
) -> Result<()> {
    let upload = Upload::from_path(file)?;
    let response = client.predict(app_id, target_column, steps, &upload).await?;

    match format {
        OutputFormat::Json => print_json(&response)?,
        OutputFormat::Table => {
            println!(
                "{} {} ({})",
                "Forecast from".bold(),
                response.model_id.cyan(),
                response.model_version
            );
            let rows: Vec<ForecastRow> = response
                .forecast
                .iter()
                .map(|(timestamp, value)| ForecastRow {
                    timestamp: timestamp.clone(),
                    value: format_value(*value),
                })
                .collect();
            print_table(&rows);
        }
    }

    Ok(())
}
