#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ConfigError;
use crate::corpus::{Document, DocumentMetadata};

/// Preferred cut points, strongest first
const SEPARATORS: [&[char]; 3] = [&['\n', '\n'], &['\n'], &[' ']];

/// A window of a document's text, the unit that gets embedded and retrieved
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// The window text
    pub content: String,
    /// Provenance inherited from the document
    pub metadata: DocumentMetadata,
    /// Position of this window within its document
    pub chunk_index: usize,
    /// Embedding vector, empty until the chunk has been embedded
    pub embedding: Vec<f32>,
}

/// Configuration for text chunking, sizes are in characters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum window length
    pub chunk_size: usize,
    /// Characters shared by adjacent windows of one document
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

impl ChunkingConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100_000).contains(&self.chunk_size) {
            return Err(ConfigError::InvalidChunkSize(self.chunk_size));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::InvalidChunkOverlap {
                overlap: self.chunk_overlap,
                size: self.chunk_size,
            });
        }
        Ok(())
    }
}

/// Splits documents into overlapping windows
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    #[inline]
    pub fn new(config: ChunkingConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Chunk every document, keeping document order
    #[inline]
    pub fn split_documents(&self, documents: &[Document]) -> Vec<Chunk> {
        let chunks: Vec<Chunk> = documents
            .iter()
            .flat_map(|document| self.split_document(document))
            .collect();

        debug!(
            "Split {} documents into {} chunks (size {}, overlap {})",
            documents.len(),
            chunks.len(),
            self.config.chunk_size,
            self.config.chunk_overlap
        );

        chunks
    }

    #[inline]
    pub fn split_document(&self, document: &Document) -> Vec<Chunk> {
        split_text(&document.content, &self.config)
            .into_iter()
            .enumerate()
            .map(|(chunk_index, content)| Chunk {
                content,
                metadata: document.metadata.clone(),
                chunk_index,
                embedding: Vec::new(),
            })
            .collect()
    }
}

/// Split text into windows of at most `chunk_size` characters.
///
/// Each window after the first starts exactly `chunk_overlap` characters before the end of
/// the previous one, so dropping that prefix from every later window and concatenating
/// yields the original text. Blank text yields no windows.
#[inline]
pub fn split_text(text: &str, config: &ChunkingConfig) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let chars: Vec<char> = text.chars().collect();
    let size = config.chunk_size.max(1);
    let overlap = config.chunk_overlap.min(size - 1);

    let mut windows = Vec::new();
    let mut start = 0;

    loop {
        let hard_end = (start + size).min(chars.len());
        if hard_end == chars.len() {
            windows.push(chars[start..].iter().collect());
            break;
        }

        // Never cut so early that the next window would not move forward
        let min_end = (start + overlap + 1).max(start + size / 2);
        let end = find_break(&chars, start, min_end, hard_end).unwrap_or(hard_end);

        windows.push(chars[start..end].iter().collect());
        start = end - overlap;
    }

    windows
}

fn find_break(chars: &[char], start: usize, min_end: usize, hard_end: usize) -> Option<usize> {
    SEPARATORS.iter().find_map(|separator| {
        (min_end..=hard_end).rev().find(|&end| {
            end >= start + separator.len() && chars[end - separator.len()..end] == **separator
        })
    })
}
