use async_trait::async_trait;
use std::cmp::Ordering;
use tokio::sync::RwLock;

use super::{SearchResult, VectorIndex, cosine_similarity};
use crate::chunking::Chunk;
use crate::{Result, ThesiaError};

/// Vector index held in process memory, lost on exit.
///
/// Chunks are kept in insertion order and the sort is stable, so equal scores always come
/// back in the order they were added.
#[derive(Debug, Default)]
pub struct InMemoryVectorIndex {
    chunks: RwLock<Vec<Chunk>>,
}

impl InMemoryVectorIndex {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn is_empty(&self) -> Result<bool> {
        Ok(self.chunks.read().await.is_empty())
    }

    async fn add_chunks(&self, chunks: &[Chunk]) -> Result<usize> {
        let mut stored = self.chunks.write().await;

        let expected = stored
            .first()
            .or_else(|| chunks.first())
            .map(|c| c.embedding.len());
        if let Some(dimension) = expected {
            if let Some(bad) = chunks.iter().find(|c| c.embedding.len() != dimension) {
                return Err(ThesiaError::Index(format!(
                    "cannot add a {}-dimensional vector to a {dimension}-dimensional index",
                    bad.embedding.len()
                )));
            }
        }

        stored.extend_from_slice(chunks);
        Ok(chunks.len())
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchResult>> {
        let stored = self.chunks.read().await;

        let mut scored: Vec<SearchResult> = stored
            .iter()
            .map(|chunk| SearchResult {
                score: cosine_similarity(&chunk.embedding, query),
                chunk: chunk.clone(),
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.chunks.read().await.len())
    }
}
