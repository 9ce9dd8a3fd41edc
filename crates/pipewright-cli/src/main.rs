//! pipewright CLI tool.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod client;
mod commands;

use client::ApiClient;

#[derive(Parser)]
#[command(name = "pipewright")]
#[command(about = "pipewright CI/CD CLI", long_about = None)]
struct Cli {
    /// API server URL
    #[arg(long, env = "PIPEWRIGHT_API_URL", default_value = "http://localhost:3000")]
    api_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the aggregated status of a pipeline run
    Status {
        /// Pipeline name
        pipeline: String,
        /// Run ID (defaults to the latest run)
        #[arg(long)]
        run: Option<String>,
    },
    /// List jobs running on the worker
    Jobs,
    /// Cancel a running job execution
    Cancel {
        /// Job execution ID
        id: String,
    },
    /// Queue a job execution for the worker
    Enqueue {
        /// Job execution ID
        id: String,
    },
    /// Validate a system configuration file
    Validate {
        /// Path to the configuration file
        #[arg(default_value = "system.kdl")]
        path: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let client = ApiClient::new(&cli.api_url);

    match cli.command {
        Commands::Status { pipeline, run } => {
            commands::status(&client, &pipeline, run.as_deref()).await?;
        }
        Commands::Jobs => {
            commands::jobs(&client).await?;
        }
        Commands::Cancel { id } => {
            commands::cancel(&client, &id).await?;
        }
        Commands::Enqueue { id } => {
            commands::enqueue(&client, &id).await?;
        }
        Commands::Validate { path } => {
            commands::validate(&path)?;
        }
    }

    Ok(())
}
