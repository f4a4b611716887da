
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

use crate::chunking::ChunkingConfig;
use crate::generation::{GeneratorBackend, GeneratorConfig};
use crate::memory::MemoryConfig;

pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const OPENAI_API_KEY_VAR: &str = "OPENAI_API_KEY";
pub const DEFAULT_EMBEDDING_DIMENSION: u32 = 384;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub data_dir: PathBuf,
    pub models_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            models_dir: PathBuf::from("models"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModelConfig {
    pub llm: LlmArtifactConfig,
    pub embedding: EmbeddingModelConfig,
}

/// The GGUF artifact fetched by `download-model` and checked by `verify-model`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LlmArtifactConfig {
    pub repo_id: String,
    pub filename: String,
    pub n_ctx: u32,
    pub n_gpu_layers: u32,
}

impl Default for LlmArtifactConfig {
    fn default() -> Self {
        Self {
            repo_id: "TheBloke/Llama-2-7B-Chat-GGUF".to_string(),
            filename: "llama-2-7b-chat.Q4_K_M.gguf".to_string(),
            n_ctx: 4096,
            n_gpu_layers: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EmbeddingModelConfig {
    pub backend: EmbeddingBackend,
    pub model: String,
    pub dimension: u32,
}

/// Where embeddings are computed
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// Ollama `/api/embed` with the configured model
    #[default]
    Ollama,
    /// Offline hashed bag-of-words vectors
    Hashed,
}

impl Default for EmbeddingModelConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::Ollama,
            model: "all-minilm:latest".to_string(),
            dimension: DEFAULT_EMBEDDING_DIMENSION,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OllamaConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub batch_size: u32,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            batch_size: 16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { top_k: 3 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IngestionConfig {
    pub fail_on_error: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid port: {0} (must be between 1 and 65535)")]
    InvalidPort(u16),
    #[error("Invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(u32),
    #[error("Invalid model name: {0:?} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid embedding dimension: {0} (must be between 16 and 4096)")]
    InvalidEmbeddingDimension(u32),
    #[error("Invalid chunk size: {0} (must be between 1 and 100000)")]
    InvalidChunkSize(usize),
    #[error("Invalid chunk overlap: {overlap} (must be smaller than chunk size {size})")]
    InvalidChunkOverlap { overlap: usize, size: usize },
    #[error("Invalid top_k: {0} (must be between 1 and 100)")]
    InvalidTopK(usize),
    #[error("Invalid temperature: {0} (must be between 0.0 and 2.0)")]
    InvalidTemperature(f32),
    #[error("Invalid top_p: {0} (must be greater than 0.0 and at most 1.0)")]
    InvalidTopP(f32),
    #[error("Invalid max_tokens: {0} (must be between 1 and 32768)")]
    InvalidMaxTokens(u32),
    #[error("Invalid context window: {0} (must be between 512 and 131072)")]
    InvalidContextWindow(u32),
    #[error("Invalid timeout: {0} seconds (must be between 1 and 3600)")]
    InvalidTimeout(u64),
    #[error("Invalid model artifact: {0}")]
    InvalidArtifact(String),
    #[error("Environment variable {0} is not set")]
    MissingApiKey(&'static str),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    /// Load `config.toml` from `config_dir`, falling back to defaults when the file is absent
    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_path = config_dir.as_ref().join(CONFIG_FILE_NAME);
        Self::load_file(&config_path, config_dir.as_ref())
    }

    /// Load an explicit config file; paths inside it resolve against `base_dir`
    #[inline]
    pub fn load_file(config_path: &Path, base_dir: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Ok(Self {
                base_dir: base_dir.to_path_buf(),
                ..Self::default()
            });
        }

        let content = fs::read_to_string(config_path).map_err(|source| ConfigError::Read {
            path: config_path.to_path_buf(),
            source,
        })?;

        let mut config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: config_path.to_path_buf(),
            source,
        })?;
        config.base_dir = base_dir.to_path_buf();

        config.validate()?;

        Ok(config)
    }

    #[inline]
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Get the base directory relative paths are resolved against
    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ollama.validate()?;
        self.validate_models()?;
        self.chunking.validate()?;
        self.generator.validate()?;

        if !(1..=100).contains(&self.retrieval.top_k) {
            return Err(ConfigError::InvalidTopK(self.retrieval.top_k));
        }

        if self.server.port == 0 {
            return Err(ConfigError::InvalidPort(self.server.port));
        }

        Ok(())
    }

    fn validate_models(&self) -> Result<(), ConfigError> {
        let embedding = &self.model.embedding;
        if embedding.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(embedding.model.clone()));
        }
        if !(16..=4096).contains(&embedding.dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(embedding.dimension));
        }

        let llm = &self.model.llm;
        if llm.repo_id.trim().is_empty() || !llm.repo_id.contains('/') {
            return Err(ConfigError::InvalidArtifact(format!(
                "repository id {:?} must look like 'owner/name'",
                llm.repo_id
            )));
        }
        if llm.filename.trim().is_empty() || llm.filename.contains(['/', '\\']) {
            return Err(ConfigError::InvalidArtifact(format!(
                "file name {:?} must be a plain file name",
                llm.filename
            )));
        }
        if !(512..=131_072).contains(&llm.n_ctx) {
            return Err(ConfigError::InvalidContextWindow(llm.n_ctx));
        }

        Ok(())
    }

    /// Fail fast when the selected generator needs credentials that are missing
    #[inline]
    pub fn validate_environment(&self) -> Result<(), ConfigError> {
        if self.generator.backend == GeneratorBackend::OpenAi {
            self.openai_api_key()?;
        }
        Ok(())
    }

    #[inline]
    pub fn openai_api_key(&self) -> Result<String, ConfigError> {
        match env::var(OPENAI_API_KEY_VAR) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(ConfigError::MissingApiKey(OPENAI_API_KEY_VAR)),
        }
    }

    #[inline]
    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        self.ollama.ollama_url()
    }

    #[inline]
    pub fn data_dir(&self) -> PathBuf {
        self.base_dir.join(&self.paths.data_dir)
    }

    #[inline]
    pub fn pdf_dir(&self) -> PathBuf {
        self.data_dir().join("pdfs")
    }

    #[inline]
    pub fn notes_dir(&self) -> PathBuf {
        self.data_dir().join("notes")
    }

    /// Get the path for the vector database directory
    #[inline]
    pub fn vector_store_path(&self) -> PathBuf {
        self.data_dir().join("vectorstore")
    }

    #[inline]
    pub fn models_dir(&self) -> PathBuf {
        self.base_dir.join(&self.paths.models_dir)
    }

    /// Local path of the configured model artifact
    #[inline]
    pub fn model_path(&self) -> PathBuf {
        self.models_dir().join(&self.model.llm.filename)
    }

    #[inline]
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl OllamaConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.protocol != "http" && self.protocol != "https" {
            return Err(ConfigError::InvalidProtocol(self.protocol.clone()));
        }

        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }

        let url = self.ollama_url()?;
        if url.host_str().is_none_or(str::is_empty) {
            return Err(ConfigError::InvalidUrl(url.to_string()));
        }

        if self.batch_size == 0 || self.batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }

        Ok(())
    }

    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))
    }
}
