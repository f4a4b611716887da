// Embeddings module
// Text-to-vector capability and its Ollama and hashed implementations

pub mod hashed;
pub mod ollama;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::chunking::Chunk;
use crate::config::Config;
use crate::config::EmbeddingBackend;
use crate::{Result, ThesiaError};

pub use hashed::HashedEmbedder;
pub use ollama::OllamaClient;

/// Maps text to fixed-dimension vectors
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed several texts, returning one vector per input in the same order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| ThesiaError::Embedding("embedder returned no vector".to_string()))
    }

    /// Length of every vector this embedder produces
    fn dimension(&self) -> usize;
}

/// Build the embedder selected in the configuration
#[inline]
pub fn from_config(config: &Config) -> Result<Arc<dyn Embedder>> {
    let dimension = config.model.embedding.dimension as usize;
    let embedder: Arc<dyn Embedder> = match config.model.embedding.backend {
        EmbeddingBackend::Ollama => Arc::new(OllamaClient::new(config)?),
        EmbeddingBackend::Hashed => Arc::new(HashedEmbedder::new(dimension)),
    };
    Ok(embedder)
}

/// Fill in the embedding of every chunk, in batches of `batch_size`
#[inline]
pub async fn embed_chunks(
    embedder: &dyn Embedder,
    chunks: &mut [Chunk],
    batch_size: usize,
) -> Result<()> {
    if chunks.is_empty() {
        return Ok(());
    }

    for batch in chunks.chunks_mut(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
        let vectors = embedder.embed_batch(&texts).await?;

        if vectors.len() != batch.len() {
            return Err(ThesiaError::Embedding(format!(
                "Mismatch between request and response counts: {} vs {}",
                batch.len(),
                vectors.len()
            )));
        }

        for (chunk, vector) in batch.iter_mut().zip(vectors) {
            chunk.embedding = vector;
        }
    }

    debug!("Embedded {} chunks", chunks.len());
    Ok(())
}
