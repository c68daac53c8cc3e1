//! Training commands

use anyhow::Result;
use colored::Colorize;
use std::path::Path;

use crate::client::{ApiClient, TrainingAccepted, Upload};
use crate::output::{print_info, print_json, print_success, OutputFormat};

/// Submit a forecast training run for one (app, target) lineage
pub async fn train_forecast(
    client: &ApiClient,
    app_id: &str,
    target_column: &str,
    file: &Path,
    format: OutputFormat,
) -> Result<()> {
    let upload = Upload::from_path(file)?;
    let accepted = client.train_forecast(app_id, target_column, &upload).await?;
    report(&accepted, format)
}

/// Submit an anomaly detector training run for one app
pub async fn train_anomaly(
    client: &ApiClient,
    app_id: &str,
    file: &Path,
    format: OutputFormat,
) -> Result<()> {
    let upload = Upload::from_path(file)?;
    let accepted = client.train_anomaly(app_id, &upload).await?;
    report(&accepted, format)
}

fn report(accepted: &TrainingAccepted, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(accepted)?,
        OutputFormat::Table => {
            print_success(&accepted.message);
            println!("Model ID:   {}", accepted.model_id.cyan());
            println!("Rows:       {}", accepted.rows);
            print_info(&format!(
                "Training runs in the background; check with `forecastctl models get {}`",
                accepted.model_id
            ));
        }
    }
    Ok(())
}
