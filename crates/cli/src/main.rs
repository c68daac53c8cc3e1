//! forecastctl
//!
//! Command-line client for the forecast model service: submit training runs,
//! request forecasts and anomaly flags, and inspect the production registry.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{detect, models, predict, train};
use std::path::PathBuf;

/// Forecast model service CLI
#[derive(Parser)]
#[command(name = "forecastctl")]
#[command(author, version, about = "CLI for the forecast model service", long_about = None)]
pub struct Cli {
    /// API endpoint URL (can also be set via FORECAST_API_URL env var)
    #[arg(long, env = "FORECAST_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Train a model in the background
    #[command(subcommand)]
    Train(TrainCommands),

    /// Forecast the next steps of a series with the production model
    Predict {
        #[arg(long)]
        app_id: String,

        /// Column to forecast
        #[arg(long)]
        target_column: String,

        /// Number of future steps
        #[arg(long, default_value_t = 7)]
        steps: i64,

        /// Input rows (semicolon CSV, or a JSON array of records)
        #[arg(long)]
        file: PathBuf,
    },

    /// Flag anomalous rows with the production detector
    Detect {
        #[arg(long)]
        app_id: String,

        /// Input rows (semicolon CSV, or a JSON array of records)
        #[arg(long)]
        file: PathBuf,

        /// Only print flagged rows
        #[arg(long)]
        only_anomalies: bool,
    },

    /// Inspect production models
    #[command(subcommand)]
    Models(ModelsCommands),
}

#[derive(Subcommand)]
pub enum TrainCommands {
    /// Train a forecast model for one target column
    Forecast {
        #[arg(long)]
        app_id: String,

        #[arg(long)]
        target_column: String,

        #[arg(long)]
        file: PathBuf,
    },

    /// Train the multivariate anomaly detector for an app
    Anomaly {
        #[arg(long)]
        app_id: String,

        #[arg(long)]
        file: PathBuf,
    },
}

#[derive(Subcommand)]
pub enum ModelsCommands {
    /// List every production model
    List,

    /// Show the production entry of one model id
    Get {
        /// Model ID (e.g. store1_Autorizada)
        model_id: String,
    },
}

async fn run(cli: Cli) -> Result<()> {
    let config = config::Config::load()?;
    let client = client::ApiClient::new(&config.resolve_api_url(cli.api_url))?;
    let format = cli.format;

    match cli.command {
        Commands::Train(train_cmd) => match train_cmd {
            TrainCommands::Forecast {
                app_id,
                target_column,
                file,
            } => train::train_forecast(&client, &app_id, &target_column, &file, format).await,
            TrainCommands::Anomaly { app_id, file } => {
                train::train_anomaly(&client, &app_id, &file, format).await
            }
        },
        Commands::Predict {
            app_id,
            target_column,
            steps,
            file,
        } => predict::predict(&client, &app_id, &target_column, steps, &file, format).await,
        Commands::Detect {
            app_id,
            file,
            only_anomalies,
        } => detect::detect(&client, &app_id, &file, only_anomalies, format).await,
        Commands::Models(models_cmd) => match models_cmd {
            ModelsCommands::List => models::list_models(&client, format).await,
            ModelsCommands::Get { model_id } => models::get_model(&client, &model_id, format).await,
        },
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}
