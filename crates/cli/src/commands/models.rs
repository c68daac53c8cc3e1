//! Production registry inspection

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::client::{ApiClient, ProductionEntry};
use crate::output::{format_value, print_json, print_table, OutputFormat};

#[derive(Tabled)]
struct ModelRow {
    #[tabled(rename = "Model ID")]
    model_id: String,
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "RMSE")]
    rmse: String,
    #[tabled(rename = "MAE")]
    mae: String,
    #[tabled(rename = "Promoted")]
    promoted_at: String,
}

impl ModelRow {
    fn new(model_id: &str, entry: &ProductionEntry) -> Self {
        let metric = |name: &str| {
            entry
                .metrics
                .get(name)
                .map(|v| format_value(*v))
                .unwrap_or_else(|| "-".to_string())
        };
        Self {
            model_id: model_id.to_string(),
            version: entry.version.clone(),
            rmse: metric("rmse"),
            mae: metric("mae"),
            promoted_at: entry
                .promoted_at
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "-".to_string()),
        }
    }
}

pub async fn list_models(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let models = client.list_models().await?;

    match format {
        OutputFormat::Json => print_json(&models)?,
        OutputFormat::Table => {
            let rows: Vec<ModelRow> = models
                .iter()
                .map(|(id, entry)| ModelRow::new(id, entry))
                .collect();
            print_table(&rows);
        }
    }

    Ok(())
}

pub async fn get_model(client: &ApiClient, model_id: &str, format: OutputFormat) -> Result<()> {
    let entry = client.get_model(model_id).await?;

    match format {
        OutputFormat::Json => print_json(&entry)?,
        OutputFormat::Table => {
            println!("{}", "Production Model".bold());
            println!("{}", "=".repeat(50));
            println!("Model ID:   {}", model_id.cyan());
            println!("Version:    {}", entry.version.green());
            println!("Artifact:   {}", entry.path);
            for (name, value) in &entry.metrics {
                println!("{:<11} {}", format!("{}:", name.to_uppercase()), format_value(*value));
            }
            if let Some(promoted_at) = entry.promoted_at {
                println!("Promoted:   {}", promoted_at.to_rfc3339().dimmed());
            }
        }
    }

    Ok(())
}
