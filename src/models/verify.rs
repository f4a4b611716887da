use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tracing::info;

use super::VerificationError;
use crate::generation::{GenerationError, Generator};

pub const TEST_PROMPT: &str = "What is the capital of France?";
pub const TEST_MAX_TOKENS: u32 = 20;

pub const GGUF_MAGIC: &[u8; 4] = b"GGUF";
pub const SUPPORTED_GGUF_VERSIONS: [u32; 2] = [2, 3];
// magic, version, tensor count, metadata entry count
const GGUF_HEADER_LEN: usize = 4 + 4 + 8 + 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationReport {
    pub path: PathBuf,
    pub bytes: u64,
    pub response: String,
}

/// Check the artifact at `model_path` is a GGUF model, then run one short inference
/// through `generator`
#[inline]
pub async fn verify_model(
    model_path: &Path,
    generator: &dyn Generator,
) -> Result<VerificationReport, VerificationError> {
    let metadata = match tokio::fs::metadata(model_path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(VerificationError::Missing(model_path.to_path_buf()));
        }
        Err(e) => return Err(VerificationError::Io(e)),
    };
    if metadata.len() == 0 {
        return Err(VerificationError::Empty(model_path.to_path_buf()));
    }
    let version = read_gguf_header(model_path).await?;
    info!(
        "Found GGUF v{} model file {} ({} bytes)",
        version,
        model_path.display(),
        metadata.len()
    );

    info!("Running test inference with {}", generator.model());
    let response = generator
        .complete(TEST_PROMPT, Some(TEST_MAX_TOKENS))
        .await?
        .trim()
        .to_string();
    if response.is_empty() {
        return Err(GenerationError::EmptyResponse.into());
    }

    Ok(VerificationReport {
        path: model_path.to_path_buf(),
        bytes: metadata.len(),
        response,
    })
}

/// Validate the fixed GGUF header and return its format version
async fn read_gguf_header(model_path: &Path) -> Result<u32, VerificationError> {
    let invalid = |reason: String| VerificationError::InvalidArtifact {
        path: model_path.to_path_buf(),
        reason,
    };

    let mut header = [0u8; GGUF_HEADER_LEN];
    let mut file = tokio::fs::File::open(model_path).await?;
    if let Err(e) = file.read_exact(&mut header).await {
        return if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Err(invalid(format!(
                "file is shorter than the {GGUF_HEADER_LEN} byte header"
            )))
        } else {
            Err(VerificationError::Io(e))
        };
    }

    if header[..4] != GGUF_MAGIC[..] {
        return Err(invalid("missing GGUF magic bytes".to_string()));
    }

    let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    if !SUPPORTED_GGUF_VERSIONS.contains(&version) {
        return Err(invalid(format!("unsupported GGUF version {version}")));
    }

    Ok(version)
}
