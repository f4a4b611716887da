// Database module
// Vector index capability with a persistent LanceDB store and an in-memory one

pub mod inmemory;
pub mod lancedb;

use async_trait::async_trait;
use std::sync::Arc;

use crate::Result;
use crate::chunking::Chunk;
use crate::config::Config;

pub use inmemory::InMemoryVectorIndex;
pub use self::lancedb::LanceVectorStore;

/// A stored chunk matched by a similarity search
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub chunk: Chunk,
    /// Cosine similarity, higher is more relevant
    pub score: f32,
}

/// Persistent similarity index over embedded chunks
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn is_empty(&self) -> Result<bool>;

    /// Store chunks, which must already carry their embeddings. Returns the number stored.
    async fn add_chunks(&self, chunks: &[Chunk]) -> Result<usize>;

    /// Up to `k` chunks ordered by descending score
    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchResult>>;

    async fn count(&self) -> Result<usize>;

    /// Compact storage after a bulk insert
    async fn optimize(&self) -> Result<()> {
        Ok(())
    }
}

/// Open the persistent index under the configured data directory
#[inline]
pub async fn open(config: &Config) -> Result<Arc<dyn VectorIndex>> {
    let store = LanceVectorStore::open(&config.vector_store_path()).await?;
    Ok(Arc::new(store))
}

/// Cosine similarity, zero when either vector has no length
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}
