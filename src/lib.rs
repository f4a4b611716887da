use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;
use crate::corpus::IngestionError;
use crate::generation::GenerationError;
use crate::models::{DownloadError, VerificationError};

pub type Result<T> = std::result::Result<T, ThesiaError>;

#[derive(Error, Debug)]
pub enum ThesiaError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Ingestion error: {0}")]
    Ingestion(#[from] IngestionError),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Pipeline not initialized: call initialize() before querying")]
    NotInitialized,

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Download error: {0}")]
    Download(#[from] DownloadError),

    #[error("Verification error: {0}")]
    Verification(#[from] VerificationError),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid question: {0}")]
    InvalidQuestion(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod api;
pub mod chunking;
pub mod commands;
pub mod config;
pub mod corpus;
pub mod database;
pub mod embeddings;
pub mod generation;
pub mod http;
pub mod memory;
pub mod models;
pub mod rag;
