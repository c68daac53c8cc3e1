//! Anomaly detection command

use anyhow::Result;
use colored::Colorize;
use std::path::Path;
use tabled::Tabled;

use crate::client::{ApiClient, DetectedRow, Upload};
use crate::output::{color_label, format_value, print_json, print_table, print_warning, OutputFormat};

#[derive(Tabled)]
struct DetectionRow {
    #[tabled(rename = "Timestamp")]
    timestamp: String,
    #[tabled(rename = "Values")]
    values: String,
    #[tabled(rename = "Label")]
    label: String,
}

impl From<&DetectedRow> for DetectionRow {
    fn from(row: &DetectedRow) -> Self {
        let values = row
            .fields
            .iter()
            .map(|(name, value)| format!("{}={}", name, format_value(*value)))
            .collect::<Vec<_>>()
            .join(" ");
        Self {
            timestamp: row.timestamp.clone(),
            values,
            label: color_label(row.is_outlier()),
        }
    }
}

pub async fn detect(
    client: &ApiClient,
    app_id: &str,
    file: &Path,
    only_anomalies: bool,
    format: OutputFormat,
) -> Result<()> {
    let upload = Upload::from_path(file)?;
    let mut response = client.detect(app_id, &upload).await?;
    let flagged = response.anomalies.iter().filter(|r| r.is_outlier()).count();

    if only_anomalies {
        response.anomalies.retain(DetectedRow::is_outlier);
    }

    match format {
        OutputFormat::Json => print_json(&response)?,
        OutputFormat::Table => {
            println!(
                "{} {} ({})",
                "Detection with".bold(),
                response.model_id.cyan(),
                response.model_version
            );
            let rows: Vec<DetectionRow> = response.anomalies.iter().map(DetectionRow::from).collect();
            print_table(&rows);
            if flagged > 0 {
                print_warning(&format!("{} row(s) flagged as anomalous", flagged));
            } else {
                println!("{}", "No anomalies detected".green());
            }
        }
    }

    Ok(())
}
