// Answer generation module
// Language model backends that turn a question, retrieved context and chat history
// into an answer

mod ollama;
mod openai;
pub mod prompt;


use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::chunking::Chunk;
use crate::config::{Config, ConfigError};
use crate::http::RequestError;
use crate::memory::ConversationTurn;

pub use ollama::OllamaGenerator;
pub use openai::OpenAiGenerator;
pub use prompt::build_prompt;

pub const DEFAULT_LOCAL_MODEL: &str = "llama2:7b-chat";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-3.5-turbo-instruct";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";

/// Which language model service answers questions
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GeneratorBackend {
    /// Ollama server running the local chat model
    #[default]
    Local,
    /// OpenAI-compatible completions API
    OpenAi,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeneratorConfig {
    pub backend: GeneratorBackend,
    /// Model name, the backend's default when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    /// Print tokens to stdout as they arrive
    pub stream: bool,
    pub timeout_secs: u64,
    pub openai_base_url: String,
}

impl Default for GeneratorConfig {
    #[inline]
    fn default() -> Self {
        Self {
            backend: GeneratorBackend::Local,
            model: None,
            temperature: 0.7,
            max_tokens: 2000,
            top_p: 1.0,
            stream: true,
            timeout_secs: 120,
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
        }
    }
}

impl GeneratorConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(model) = &self.model {
            if model.trim().is_empty() {
                return Err(ConfigError::InvalidModel(model.clone()));
            }
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::InvalidTemperature(self.temperature));
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(ConfigError::InvalidTopP(self.top_p));
        }
        if !(1..=32_768).contains(&self.max_tokens) {
            return Err(ConfigError::InvalidMaxTokens(self.max_tokens));
        }
        if !(1..=3600).contains(&self.timeout_secs) {
            return Err(ConfigError::InvalidTimeout(self.timeout_secs));
        }
        self.openai_url()?;
        Ok(())
    }

    /// The configured model, or the backend's default
    #[inline]
    pub fn model_name(&self) -> &str {
        self.model.as_deref().unwrap_or(match self.backend {
            GeneratorBackend::Local => DEFAULT_LOCAL_MODEL,
            GeneratorBackend::OpenAi => DEFAULT_OPENAI_MODEL,
        })
    }

    #[inline]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    #[inline]
    pub fn openai_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.openai_base_url)
            .map_err(|_| ConfigError::InvalidUrl(self.openai_base_url.clone()))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GenerationError {
    #[error("Generator unreachable: {0}")]
    Unreachable(String),
    #[error("Authentication rejected (HTTP {0}), check the API key")]
    Auth(u16),
    #[error("Rate limit or quota exceeded (HTTP 429)")]
    Quota,
    #[error("Generator API returned HTTP {0}")]
    Api(u16),
    #[error("Malformed generator response: {0}")]
    MalformedResponse(String),
    #[error("Generator returned an empty response")]
    EmptyResponse,
    #[error("Generation timed out after {0:?}")]
    Timeout(Duration),
    #[error("Generation was abandoned by the caller")]
    Cancelled,
}

impl GenerationError {
    #[inline]
    pub fn from_request(error: RequestError, timeout: Duration) -> Self {
        match error {
            RequestError::Status(status @ (401 | 403)) => Self::Auth(status),
            RequestError::Status(429) => Self::Quota,
            RequestError::Status(status) => Self::Api(status),
            RequestError::Timeout => Self::Timeout(timeout),
            RequestError::Transport(message) | RequestError::Other(message) => {
                Self::Unreachable(message)
            }
        }
    }

    fn from_read(error: &std::io::Error, timeout: Duration) -> Self {
        if error.kind() == std::io::ErrorKind::TimedOut {
            Self::Timeout(timeout)
        } else {
            Self::Unreachable(format!("response stream interrupted: {error}"))
        }
    }
}

/// Generated answer plus the chunks it was grounded on
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub answer: String,
    pub sources: Vec<Chunk>,
}

/// Flag shared with a blocking generation so it stops once nobody awaits the answer
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    #[inline]
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Guard that cancels when dropped, including when its future is dropped mid-await
    #[inline]
    #[must_use]
    pub fn cancel_on_drop(&self) -> CancelOnDrop {
        CancelOnDrop(self.clone())
    }
}

#[derive(Debug)]
pub struct CancelOnDrop(Cancellation);

impl Drop for CancelOnDrop {
    #[inline]
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// Receives answer tokens as they stream in
pub type TokenSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Sink that echoes tokens to stdout
#[inline]
pub fn stdout_sink() -> TokenSink {
    Arc::new(|token: &str| {
        let mut stdout = std::io::stdout().lock();
        if let Err(e) = stdout
            .write_all(token.as_bytes())
            .and_then(|()| stdout.flush())
        {
            debug!("Failed to echo token: {}", e);
        }
    })
}

#[async_trait]
pub trait Generator: Send + Sync {
    /// Complete a raw prompt, `max_tokens` overriding the configured limit
    async fn complete(&self, prompt: &str, max_tokens: Option<u32>)
    -> Result<String, GenerationError>;

    /// Answer `question` from the retrieved `context` and the conversation so far
    async fn generate(
        &self,
        question: &str,
        context: &[Chunk],
        history: &[ConversationTurn],
    ) -> Result<Generation, GenerationError> {
        let prompt = build_prompt(question, context, history);
        let answer = self.complete(&prompt, None).await?;

        Ok(Generation {
            answer,
            sources: context.to_vec(),
        })
    }

    /// Model name used for completions
    fn model(&self) -> &str;
}

/// Build the generator backend selected in the configuration
#[inline]
pub fn from_config(config: &Config) -> crate::Result<Arc<dyn Generator>> {
    let sink = config.generator.stream.then(stdout_sink);

    let generator: Arc<dyn Generator> = match config.generator.backend {
        GeneratorBackend::Local => Arc::new(OllamaGenerator::new(config)?.with_sink(sink)),
        GeneratorBackend::OpenAi => Arc::new(OpenAiGenerator::new(config)?.with_sink(sink)),
    };

    debug!(
        "Using {:?} generator with model {}",
        config.generator.backend,
        generator.model()
    );
    Ok(generator)
}

/// `endpoint` resolved under `base`, keeping any path prefix `base` carries
fn endpoint_url(base: &Url, endpoint: &str) -> Result<Url, ConfigError> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let prefixed = format!("{}/", base.path());
        base.set_path(&prefixed);
    }
    base.join(endpoint.trim_start_matches('/'))
        .map_err(|_| ConfigError::InvalidUrl(base.to_string()))
}

/// Trim the answer and reject blank ones
fn finish_answer(answer: &str) -> Result<String, GenerationError> {
    let answer = answer.trim();
    if answer.is_empty() {
        Err(GenerationError::EmptyResponse)
    } else {
        Ok(answer.to_string())
    }
}
