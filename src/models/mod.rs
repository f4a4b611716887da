// Model artifact management
// Fetching the GGUF weights from the hub and checking that the configured generator answers

mod download;
mod verify;


use std::path::PathBuf;
use thiserror::Error;

use crate::generation::GenerationError;

pub use download::{DEFAULT_HF_ENDPOINT, DownloadReport, HF_ENDPOINT_VAR, HF_TOKEN_VAR, ModelDownloader};
pub use verify::{TEST_MAX_TOKENS, TEST_PROMPT, VerificationReport, verify_model};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("{url} answered with HTTP status {status}")]
    Status { url: String, status: u16 },

    #[error("Model hub unreachable: {0}")]
    Unreachable(String),

    #[error("Download interrupted after {received} of {expected} bytes")]
    Incomplete { expected: u64, received: u64 },

    #[error("Failed to write model file: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("Model file not found at {}; run download-model first", .0.display())]
    Missing(PathBuf),

    #[error("Model file at {} is empty", .0.display())]
    Empty(PathBuf),

    #[error("Model file at {} is not a usable GGUF model: {reason}", path.display())]
    InvalidArtifact { path: PathBuf, reason: String },

    #[error("Test inference failed: {0}")]
    Inference(#[from] GenerationError),

    #[error("Failed to inspect model file: {0}")]
    Io(#[from] std::io::Error),
}

/// Render a byte count the way the CLI reports model sizes
#[inline]
pub fn format_size_gb(bytes: u64) -> String {
    format!("{:.2} GB", bytes as f64 / BYTES_PER_GB)
}
