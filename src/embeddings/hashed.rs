use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::Embedder;
use crate::Result;

/// Offline bag-of-words embedder: every token lands in a hashed bucket, vectors are L2
/// normalised. Buckets come from SHA-256, so vectors persisted by one build stay valid for
/// the next. Needs no model server.
#[derive(Debug, Clone, Copy)]
pub struct HashedEmbedder {
    dimension: usize,
}

impl HashedEmbedder {
    #[inline]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    #[inline]
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        for token in tokens(text) {
            vector[bucket(&token, self.dimension)] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for HashedEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
}

fn bucket(token: &str, dimension: usize) -> usize {
    let digest = Sha256::digest(token.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_le_bytes(prefix) % dimension as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn vectors_are_normalised() {
        let embedder = HashedEmbedder::new(64);
        let vector = embedder.embed_text("The capital of France is Paris.");
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert_eq!(vector.len(), 64);
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn blank_text_is_zero_vector() {
        let embedder = HashedEmbedder::new(8);
        assert!(embedder.embed_text("  ...  ").iter().all(|v| *v == 0.0));
    }

    #[test]
    fn shared_words_score_higher() {
        let embedder = HashedEmbedder::new(384);
        let question = embedder.embed_text("What is the capital of France?");
        let relevant = embedder.embed_text("The capital of France is Paris.");
        let unrelated = embedder.embed_text("Rust ownership prevents data races.");

        assert!(cosine(&question, &relevant) > cosine(&question, &unrelated));
    }

    #[test]
    fn buckets_are_fixed_across_builds() {
        assert_eq!(bucket("paris", 384), 150);
        assert_eq!(bucket("capital", 384), 61);
        assert_eq!(bucket("france", 64), 44);

        let vector = HashedEmbedder::new(64).embed_text("Paris");
        assert!((vector[22] - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn embed_batch_keeps_order() {
        let embedder = HashedEmbedder::new(32);
        let texts = vec!["alpha".to_string(), "beta".to_string()];
        let vectors = embedder.embed_batch(&texts).await.expect("hashing never fails");

        assert_eq!(vectors[0], embedder.embed_text("alpha"));
        assert_eq!(vectors[1], embedder.embed_text("beta"));
        assert_eq!(embedder.dimension(), 32);
    }
}
