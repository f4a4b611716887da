use anyhow::{Context, Result};
use std::env;
use std::path::Path;
use tracing::{info, warn};

use crate::config::{Config, EmbeddingBackend, show_config};
use crate::embeddings::OllamaClient;
use crate::generation;
use crate::models::{self, ModelDownloader, format_size_gb};
use crate::rag::RagPipeline;

/// Load `--config <file>` when given, otherwise `config.toml` from the working directory
#[inline]
pub fn load_config(config_path: Option<&Path>) -> Result<Config> {
    let current_dir = env::current_dir().context("Failed to determine working directory")?;

    let config = match config_path {
        Some(path) => {
            let base_dir = path
                .parent()
                .filter(|parent| !parent.as_os_str().is_empty())
                .map_or_else(|| current_dir.clone(), Path::to_path_buf);
            Config::load_file(path, &base_dir)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?
        }
        None => Config::load(&current_dir).context("Failed to load configuration")?,
    };

    Ok(config)
}

/// Make sure Ollama is up and has the embedding model before indexing or serving
async fn check_embedding_server(config: &Config) -> Result<()> {
    if config.model.embedding.backend != EmbeddingBackend::Ollama {
        return Ok(());
    }

    let client = OllamaClient::new(config).context("Invalid Ollama configuration")?;
    tokio::task::spawn_blocking(move || client.health_check())
        .await
        .context("Health check task failed")?
        .context("Ollama embedding server is not usable")?;
    Ok(())
}

/// Start the HTTP API
#[inline]
pub async fn serve(config: &Config) -> Result<()> {
    check_embedding_server(config).await?;
    crate::api::serve(config)
        .await
        .context("API server stopped with an error")
}

/// Build the index from the corpus without serving
#[inline]
pub async fn ingest(config: &Config) -> Result<()> {
    check_embedding_server(config).await?;
    let mut pipeline = RagPipeline::from_config(config)
        .await
        .context("Failed to set up pipeline")?;
    let report = pipeline
        .initialize()
        .await
        .context("Failed to ingest corpus")?;

    if report.reused_existing_index {
        println!(
            "Vector store at {} is already populated; nothing to ingest",
            config.vector_store_path().display()
        );
        return Ok(());
    }

    println!("Ingestion complete!");
    println!("  Documents loaded: {}", report.documents_loaded);
    println!("  Chunks indexed: {}", report.chunks_indexed);
    if !report.skipped_files.is_empty() {
        println!("  Skipped files: {}", report.skipped_files.len());
        for path in &report.skipped_files {
            println!("    {}", path.display());
        }
    }

    Ok(())
}

/// Fetch the configured model artifact into the models directory
#[inline]
pub async fn download_model(config: &Config) -> Result<()> {
    let artifact = config.model.llm.clone();
    let models_dir = config.models_dir();
    let downloader = ModelDownloader::from_env();

    println!(
        "Downloading {} from {} ({})",
        artifact.filename,
        artifact.repo_id,
        downloader.endpoint()
    );

    let report = tokio::task::spawn_blocking(move || downloader.download(&artifact, &models_dir))
        .await
        .context("Download task failed")?
        .context("Failed to download model")?;

    if report.already_present {
        println!("Model already present at {}", report.path.display());
    } else {
        println!("Model downloaded to {}", report.path.display());
    }
    println!("Size: {}", format_size_gb(report.bytes));

    Ok(())
}

/// Check the model artifact and run one test inference through the configured generator
#[inline]
pub async fn verify_model(config: &Config) -> Result<()> {
    config
        .validate_environment()
        .context("Generator is not usable")?;
    let model_path = config.model_path();
    let generator = generation::from_config(config).context("Failed to set up generator")?;

    info!("Verifying model at {}", model_path.display());
    let report = match models::verify_model(&model_path, generator.as_ref()).await {
        Ok(report) => report,
        Err(e) => {
            warn!("Model verification failed: {}", e);
            return Err(e).context("Model verification failed");
        }
    };

    println!("Model file: {}", report.path.display());
    println!("Size: {}", format_size_gb(report.bytes));
    println!("Test prompt: {}", models::TEST_PROMPT);
    println!("Response: {}", report.response);
    println!("Model verified successfully");

    Ok(())
}

/// Print the effective configuration
#[inline]
pub fn config(config: &Config) -> Result<()> {
    print!("{}", show_config(config).context("Failed to render configuration")?);
    Ok(())
}
