// LanceDB vector store
// Persists embedded chunks under data/vectorstore and answers cosine similarity queries


use arrow::array::{
    Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray, UInt32Array,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::{
    Connection, DistanceType,
    query::{ExecutableQuery, QueryBase},
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::{SearchResult, VectorIndex};
use crate::chunking::Chunk;
use crate::corpus::DocumentMetadata;
use crate::{Result, ThesiaError};

const TABLE_NAME: &str = "chunks";

/// Vector store backed by a LanceDB directory
pub struct LanceVectorStore {
    connection: Connection,
    path: PathBuf,
    table_name: String,
    /// Dimension of the existing table, `None` until the table has been created
    vector_dimension: Mutex<Option<usize>>,
}

impl std::fmt::Debug for LanceVectorStore {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LanceVectorStore")
            .field("path", &self.path)
            .field("table_name", &self.table_name)
            .finish_non_exhaustive()
    }
}

impl LanceVectorStore {
    /// Open (or create) the store at `db_path`, recovering from a corrupted directory
    #[inline]
    pub async fn open(db_path: &Path) -> Result<Self> {
        debug!("Initializing LanceDB at path: {:?}", db_path);

        std::fs::create_dir_all(db_path).map_err(|e| {
            ThesiaError::Index(format!("Failed to create vector database directory: {e}"))
        })?;

        let uri = db_path.display().to_string();

        let connection = match lancedb::connect(&uri).execute().await {
            Ok(conn) => conn,
            Err(e) => {
                error!("Failed to connect to LanceDB: {}", e);

                if !looks_corrupted(&e.to_string()) {
                    return Err(ThesiaError::Index(format!(
                        "Failed to connect to LanceDB: {e}"
                    )));
                }

                warn!("Database corruption detected, attempting recovery");
                attempt_corruption_recovery(db_path)?;
                lancedb::connect(&uri).execute().await.map_err(|e| {
                    ThesiaError::Index(format!("Failed to connect to LanceDB after recovery: {e}"))
                })?
            }
        };

        let store = Self {
            connection,
            path: db_path.to_path_buf(),
            table_name: TABLE_NAME.to_string(),
            vector_dimension: Mutex::new(None),
        };

        let dimension = store.detect_existing_dimension_with_recovery().await?;
        *store.vector_dimension.lock().await = dimension;

        info!("Vector store opened at {}", store.path.display());
        Ok(store)
    }

    async fn table_exists(&self) -> Result<bool> {
        let table_names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| ThesiaError::Index(format!("Failed to list tables: {e}")))?;
        Ok(table_names.contains(&self.table_name))
    }

    async fn open_table(&self) -> Result<Option<lancedb::table::Table>> {
        if !self.table_exists().await? {
            return Ok(None);
        }

        let table = self
            .connection
            .open_table(&self.table_name)
            .execute()
            .await
            .map_err(|e| ThesiaError::Index(format!("Failed to open table: {e}")))?;
        Ok(Some(table))
    }

    /// Detect vector dimension from existing table schema
    async fn detect_existing_dimension(&self) -> Result<Option<usize>> {
        let Some(table) = self.open_table().await? else {
            return Ok(None);
        };

        let schema = table
            .schema()
            .await
            .map_err(|e| ThesiaError::Index(format!("Failed to get table schema: {e}")))?;

        let dimension = schema
            .field_with_name("vector")
            .ok()
            .and_then(|field| match field.data_type() {
                DataType::FixedSizeList(_, size) => usize::try_from(*size).ok(),
                _ => None,
            })
            .ok_or_else(|| {
                ThesiaError::Index("Invalid schema: no fixed-size vector column".to_string())
            })?;

        debug!("Detected existing vector dimension: {}", dimension);
        Ok(Some(dimension))
    }

    async fn detect_existing_dimension_with_recovery(&self) -> Result<Option<usize>> {
        match self.detect_existing_dimension().await {
            Ok(dimension) => Ok(dimension),
            Err(e) if looks_corrupted(&e.to_string()) => {
                warn!("Table corruption detected while opening: {}", e);
                self.drop_table_if_exists().await?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Create schema with the specified vector dimension
    fn create_schema(vector_dim: usize) -> Result<Arc<Schema>> {
        let size = i32::try_from(vector_dim)
            .map_err(|_| ThesiaError::Index(format!("Vector dimension {vector_dim} too large")))?;

        Ok(Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), size),
                false,
            ),
            Field::new("source", DataType::Utf8, false),
            Field::new("page", DataType::UInt32, true),
            Field::new("chunk_index", DataType::UInt32, false),
            Field::new("content", DataType::Utf8, false),
            Field::new("created_at", DataType::Utf8, false),
        ])))
    }

    /// Make sure a table of `vector_dim` exists. An empty table of another dimension is
    /// recreated, a populated one is an error.
    async fn ensure_table(&self, vector_dim: usize) -> Result<()> {
        let mut current = self.vector_dimension.lock().await;

        match *current {
            Some(existing) if existing == vector_dim => return Ok(()),
            Some(existing) => {
                if self.count().await? > 0 {
                    return Err(ThesiaError::Index(format!(
                        "cannot add {vector_dim}-dimensional vectors to an index of \
                         {existing}-dimensional vectors"
                    )));
                }
                info!(
                    "Vector dimension changed from {} to {}, recreating empty table",
                    existing, vector_dim
                );
                self.drop_table_if_exists().await?;
            }
            None => {}
        }

        self.connection
            .create_empty_table(&self.table_name, Self::create_schema(vector_dim)?)
            .execute()
            .await
            .map_err(|e| ThesiaError::Index(format!("Failed to create table: {e}")))?;

        info!("Created table '{}' with {} dimensions", self.table_name, vector_dim);
        *current = Some(vector_dim);
        Ok(())
    }

    /// Create a RecordBatch from embedded chunks
    fn create_record_batch(chunks: &[Chunk], vector_dim: usize) -> Result<RecordBatch> {
        let len = chunks.len();
        let created_at = chrono::Utc::now().to_rfc3339();

        let mut ids = Vec::with_capacity(len);
        let mut flat_values = Vec::with_capacity(len * vector_dim);
        let mut sources = Vec::with_capacity(len);
        let mut pages = Vec::with_capacity(len);
        let mut chunk_indices = Vec::with_capacity(len);
        let mut contents = Vec::with_capacity(len);

        for chunk in chunks {
            if chunk.embedding.len() != vector_dim {
                return Err(ThesiaError::Index(format!(
                    "chunk {} of {} has a {}-dimensional vector, expected {vector_dim}",
                    chunk.chunk_index,
                    chunk.metadata.source,
                    chunk.embedding.len()
                )));
            }
            let chunk_index = u32::try_from(chunk.chunk_index).map_err(|_| {
                ThesiaError::Index(format!("chunk index {} out of range", chunk.chunk_index))
            })?;

            ids.push(uuid::Uuid::new_v4().to_string());
            flat_values.extend_from_slice(&chunk.embedding);
            sources.push(chunk.metadata.source.as_str());
            pages.push(chunk.metadata.page);
            chunk_indices.push(chunk_index);
            contents.push(chunk.content.as_str());
        }

        let size = i32::try_from(vector_dim)
            .map_err(|_| ThesiaError::Index(format!("Vector dimension {vector_dim} too large")))?;
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let vector_array =
            FixedSizeListArray::try_new(field, size, Arc::new(Float32Array::from(flat_values)), None)
                .map_err(|e| ThesiaError::Index(format!("Failed to create vector array: {e}")))?;

        let arrays: Vec<Arc<dyn Array>> = vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(vector_array),
            Arc::new(StringArray::from(sources)),
            Arc::new(UInt32Array::from(pages)),
            Arc::new(UInt32Array::from(chunk_indices)),
            Arc::new(StringArray::from(contents)),
            Arc::new(StringArray::from(vec![created_at.as_str(); len])),
        ];

        RecordBatch::try_new(Self::create_schema(vector_dim)?, arrays)
            .map_err(|e| ThesiaError::Index(format!("Failed to create record batch: {e}")))
    }

    /// Parse a single record batch from search results
    fn parse_search_batch(batch: &RecordBatch) -> Result<Vec<SearchResult>> {
        let sources = string_column(batch, "source")?;
        let contents = string_column(batch, "content")?;
        let pages = u32_column(batch, "page")?;
        let chunk_indices = u32_column(batch, "chunk_index")?;
        let distances = batch
            .column_by_name("_distance")
            .and_then(|col| col.as_any().downcast_ref::<Float32Array>());

        let results = (0..batch.num_rows())
            .map(|row| {
                let distance = distances
                    .map_or(0.0, |d| if d.is_null(row) { 0.0 } else { d.value(row) });

                SearchResult {
                    chunk: Chunk {
                        content: contents.value(row).to_string(),
                        metadata: DocumentMetadata {
                            source: sources.value(row).to_string(),
                            page: (!pages.is_null(row)).then_some(pages.value(row)),
                        },
                        chunk_index: chunk_indices.value(row) as usize,
                        embedding: Vec::new(),
                    },
                    // Convert cosine distance to similarity (higher is better)
                    score: 1.0 - distance,
                }
            })
            .collect();

        Ok(results)
    }

    /// Drop the chunks table if it exists
    async fn drop_table_if_exists(&self) -> Result<()> {
        if self.table_exists().await? {
            info!("Dropping existing table '{}'", self.table_name);
            self.connection
                .drop_table(&self.table_name)
                .await
                .map_err(|e| ThesiaError::Index(format!("Failed to drop table: {e}")))?;
        }
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for LanceVectorStore {
    async fn is_empty(&self) -> Result<bool> {
        Ok(self.count().await? == 0)
    }

    async fn add_chunks(&self, chunks: &[Chunk]) -> Result<usize> {
        let Some(first) = chunks.first() else {
            debug!("No chunks to store");
            return Ok(0);
        };

        let vector_dim = first.embedding.len();
        if vector_dim == 0 {
            return Err(ThesiaError::Index(
                "chunks must be embedded before they are stored".to_string(),
            ));
        }

        let record_batch = Self::create_record_batch(chunks, vector_dim)?;
        self.ensure_table(vector_dim).await?;

        let table = self
            .open_table()
            .await?
            .ok_or_else(|| ThesiaError::Index("Table disappeared before insert".to_string()))?;

        let schema = record_batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(record_batch)), schema);
        table
            .add(reader)
            .execute()
            .await
            .map_err(|e| ThesiaError::Index(format!("Failed to insert chunks: {e}")))?;

        info!("Stored {} chunks", chunks.len());
        Ok(chunks.len())
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchResult>> {
        debug!("Searching for similar vectors with limit: {}", k);

        let Some(table) = self.open_table().await? else {
            return Ok(Vec::new());
        };
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut stream = table
            .vector_search(query)
            .map_err(|e| ThesiaError::Index(format!("Failed to create vector search: {e}")))?
            .column("vector")
            .distance_type(DistanceType::Cosine)
            .limit(k)
            .execute()
            .await
            .map_err(|e| ThesiaError::Index(format!("Failed to execute search: {e}")))?;

        let mut results = Vec::new();
        while let Some(batch) = stream
            .try_next()
            .await
            .map_err(|e| ThesiaError::Index(format!("Failed to read result stream: {e}")))?
        {
            results.extend(Self::parse_search_batch(&batch)?);
        }

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        debug!("Found {} results", results.len());
        Ok(results)
    }

    async fn count(&self) -> Result<usize> {
        let Some(table) = self.open_table().await? else {
            return Ok(0);
        };

        table
            .count_rows(None)
            .await
            .map_err(|e| ThesiaError::Index(format!("Failed to count rows: {e}")))
    }

    async fn optimize(&self) -> Result<()> {
        let Some(table) = self.open_table().await? else {
            return Ok(());
        };

        table
            .optimize(lancedb::table::OptimizeAction::All)
            .await
            .map_err(|e| ThesiaError::Index(format!("Failed to optimize table: {e}")))?;

        info!("Vector database optimization completed");
        Ok(())
    }
}

fn looks_corrupted(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("corrupt")
        || message.contains("invalid")
        || message.contains("malformed")
        || message.contains("schema")
}

/// Move a corrupted store aside so a fresh one can be created in its place
fn attempt_corruption_recovery(db_path: &Path) -> Result<()> {
    warn!("Attempting database corruption recovery at {:?}", db_path);

    if db_path.exists() {
        let backup_path = db_path.with_extension("corrupted_backup");
        if let Err(e) = std::fs::rename(db_path, &backup_path) {
            error!("Failed to backup corrupted database: {}", e);
            std::fs::remove_dir_all(db_path).map_err(|e| {
                ThesiaError::Index(format!("Failed to remove corrupted database: {e}"))
            })?;
        } else {
            info!("Corrupted database backed up to {:?}", backup_path);
        }
    }

    std::fs::create_dir_all(db_path)?;
    info!("Database corruption recovery completed");
    Ok(())
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .ok_or_else(|| ThesiaError::Index(format!("Missing {name} column")))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| ThesiaError::Index(format!("Invalid {name} column type")))
}

fn u32_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a UInt32Array> {
    batch
        .column_by_name(name)
        .ok_or_else(|| ThesiaError::Index(format!("Missing {name} column")))?
        .as_any()
        .downcast_ref::<UInt32Array>()
        .ok_or_else(|| ThesiaError::Index(format!("Invalid {name} column type")))
}
