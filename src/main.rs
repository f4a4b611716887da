use clap::{Parser, Subcommand};
use std::path::PathBuf;
use thesia::Result;
use thesia::commands;

#[derive(Parser)]
#[command(name = "thesia")]
#[command(about = "Question answering over your local PDFs, Word documents and notes")]
#[command(version)]
struct Cli {
    /// Path to the configuration file (default: ./config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index the corpus if needed, then serve the HTTP API
    Serve,
    /// Build the vector index from the corpus without serving
    Ingest,
    /// Download the configured model weights from the model hub
    DownloadModel,
    /// Check the model weights and run a test inference
    VerifyModel,
    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve => {
            commands::serve(&config).await?;
        }
        Commands::Ingest => {
            commands::ingest(&config).await?;
        }
        Commands::DownloadModel => {
            commands::download_model(&config).await?;
        }
        Commands::VerifyModel => {
            commands::verify_model(&config).await?;
        }
        Commands::Config => {
            commands::config(&config)?;
        }
    }

    Ok(())
}
