// RAG pipeline module
// Ties corpus loading, chunking, embedding, retrieval, memory and generation together


use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::chunking::{Chunk, Chunker};
use crate::config::Config;
use crate::corpus::{CorpusLoader, LoadReport};
use crate::database::VectorIndex;
use crate::embeddings::{self, Embedder};
use crate::generation::{self, Generator};
use crate::memory::{ConversationMemory, ConversationTurn};
use crate::{Result, ThesiaError, database};

const DEFAULT_TOP_K: usize = 3;
const DEFAULT_EMBED_BATCH_SIZE: usize = 16;
const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    Uninitialized,
    Ready,
}

/// Where a piece of an answer came from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceRef {
    pub content: String,
    pub source: String,
    pub page: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResult {
    pub answer: String,
    pub sources: Vec<SourceRef>,
}

/// What `initialize` did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitializeReport {
    pub documents_loaded: usize,
    pub chunks_indexed: usize,
    /// Files that failed to parse and were left out
    pub skipped_files: Vec<PathBuf>,
    /// The index already held chunks, so the corpus was not read
    pub reused_existing_index: bool,
}

/// Question answering over the local corpus.
///
/// Starts `Uninitialized`; [`RagPipeline::initialize`] populates the index (once per store)
/// and moves it to `Ready`, after which [`RagPipeline::query`] may be called.
pub struct RagPipeline {
    loader: CorpusLoader,
    chunker: Chunker,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    memory: ConversationMemory,
    generator: Arc<dyn Generator>,
    top_k: usize,
    embed_batch_size: usize,
    fail_on_error: bool,
    query_timeout: Duration,
    state: PipelineState,
}

impl std::fmt::Debug for RagPipeline {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RagPipeline")
            .field("data_dir", &self.loader.data_dir())
            .field("top_k", &self.top_k)
            .field("history_len", &self.memory.len())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl RagPipeline {
    #[inline]
    pub fn new(
        loader: CorpusLoader,
        chunker: Chunker,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        memory: ConversationMemory,
        generator: Arc<dyn Generator>,
    ) -> Self {
        Self {
            loader,
            chunker,
            embedder,
            index,
            memory,
            generator,
            top_k: DEFAULT_TOP_K,
            embed_batch_size: DEFAULT_EMBED_BATCH_SIZE,
            fail_on_error: false,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            state: PipelineState::Uninitialized,
        }
    }

    /// Wire up the production collaborators described by `config`
    #[inline]
    pub async fn from_config(config: &Config) -> Result<Self> {
        config.validate_environment()?;

        let loader = CorpusLoader::new(config);
        let chunker = Chunker::new(config.chunking.clone())?;
        let embedder = embeddings::from_config(config)?;
        let index = database::open(config).await?;
        let memory = ConversationMemory::new(config.memory);
        let generator = generation::from_config(config)?;

        Ok(
            Self::new(loader, chunker, embedder, index, memory, generator)
                .with_top_k(config.retrieval.top_k)
                .with_embed_batch_size(config.ollama.batch_size as usize)
                .with_fail_on_error(config.ingestion.fail_on_error)
                .with_query_timeout(config.generator.timeout()),
        )
    }

    #[inline]
    #[must_use]
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_embed_batch_size(mut self, batch_size: usize) -> Self {
        self.embed_batch_size = batch_size.max(1);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_fail_on_error(mut self, fail_on_error: bool) -> Self {
        self.fail_on_error = fail_on_error;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    #[inline]
    pub fn state(&self) -> PipelineState {
        self.state
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.state == PipelineState::Ready
    }

    #[inline]
    pub fn history(&self) -> Vec<ConversationTurn> {
        self.memory.history()
    }

    /// Populate the index from the corpus if it is empty, then become `Ready`.
    ///
    /// Safe to call repeatedly: a populated index is reused as is.
    #[inline]
    pub async fn initialize(&mut self) -> Result<InitializeReport> {
        if !self.index.is_empty().await? {
            let stored = self.index.count().await?;
            info!("Reusing existing index with {} chunks", stored);
            self.loader.ensure_layout()?;
            self.state = PipelineState::Ready;
            return Ok(InitializeReport {
                reused_existing_index: true,
                ..InitializeReport::default()
            });
        }

        let load = self.load_corpus().await?;
        let skipped_files: Vec<PathBuf> = load.failures.iter().map(|f| f.path.clone()).collect();

        if self.fail_on_error {
            if let Some(failure) = load.failures.into_iter().next() {
                return Err(ThesiaError::Ingestion(failure));
            }
        }

        let mut chunks = self.chunker.split_documents(&load.documents);
        debug!(
            "Split {} documents into {} chunks",
            load.documents.len(),
            chunks.len()
        );

        embeddings::embed_chunks(self.embedder.as_ref(), &mut chunks, self.embed_batch_size)
            .await?;
        let chunks_indexed = self.index.add_chunks(&chunks).await?;
        if chunks_indexed > 0 {
            self.index.optimize().await?;
        }

        self.state = PipelineState::Ready;
        info!(
            "Pipeline ready: {} documents, {} chunks indexed, {} files skipped",
            load.documents.len(),
            chunks_indexed,
            skipped_files.len()
        );

        Ok(InitializeReport {
            documents_loaded: load.documents.len(),
            chunks_indexed,
            skipped_files,
            reused_existing_index: false,
        })
    }

    async fn load_corpus(&self) -> Result<LoadReport> {
        let loader = self.loader.clone();
        tokio::task::spawn_blocking(move || loader.load())
            .await
            .map_err(|e| ThesiaError::Other(anyhow::anyhow!("corpus loading task failed: {e}")))?
    }

    /// Answer a question from the indexed corpus and the conversation so far.
    ///
    /// The turn is only remembered when an answer was produced. On timeout the pending
    /// generation is abandoned, so a streaming backend stops echoing tokens at its next line.
    #[inline]
    pub async fn query(&mut self, question: &str) -> Result<QueryResult> {
        if !self.is_ready() {
            return Err(ThesiaError::NotInitialized);
        }

        let question = question.trim();
        if question.is_empty() {
            return Err(ThesiaError::InvalidQuestion(
                "question must not be empty".to_string(),
            ));
        }

        let history = self.memory.history();
        let generation = tokio::time::timeout(self.query_timeout, async {
            let query_vector = self.embedder.embed(question).await?;
            let retrieved: Vec<Chunk> = self
                .index
                .search(&query_vector, self.top_k)
                .await?
                .into_iter()
                .map(|result| result.chunk)
                .collect();
            debug!("Retrieved {} chunks for question", retrieved.len());

            self.generator
                .generate(question, &retrieved, &history)
                .await
                .map_err(ThesiaError::from)
        })
        .await
        .map_err(|_| {
            warn!("Query timed out after {:?}", self.query_timeout);
            ThesiaError::Timeout(self.query_timeout)
        })??;

        self.memory.append(question, generation.answer.clone());

        Ok(QueryResult {
            answer: generation.answer,
            sources: format_sources(&generation.sources),
        })
    }
}

/// Source references in retrieval order, duplicates removed
#[inline]
pub fn format_sources(chunks: &[Chunk]) -> Vec<SourceRef> {
    chunks
        .iter()
        .map(|chunk| SourceRef {
            content: chunk.content.clone(),
            source: chunk.metadata.source.clone(),
            page: chunk.metadata.page,
        })
        .unique()
        .collect()
}
