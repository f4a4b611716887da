use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use super::{Cancellation, GenerationError, Generator, TokenSink, endpoint_url, finish_answer};
use crate::config::{Config, ConfigError};
use crate::http::{self, RetryPolicy};

/// Chat model served by a local Ollama instance
#[derive(Clone)]
pub struct OllamaGenerator {
    endpoint: Url,
    model: String,
    options: GenerateOptions,
    timeout: Duration,
    agent: ureq::Agent,
    retry: RetryPolicy,
    sink: Option<TokenSink>,
}

impl std::fmt::Debug for OllamaGenerator {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaGenerator")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("options", &self.options)
            .field("streaming", &self.sink.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
struct GenerateOptions {
    temperature: f32,
    top_p: f32,
    num_predict: u32,
    num_ctx: u32,
    num_gpu: u32,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    error: Option<String>,
}

impl OllamaGenerator {
    #[inline]
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        let base_url = config.ollama_url()?;
        let endpoint = endpoint_url(&base_url, "api/generate")?;
        let generator = &config.generator;

        Ok(Self {
            endpoint,
            model: generator.model_name().to_string(),
            options: GenerateOptions {
                temperature: generator.temperature,
                top_p: generator.top_p,
                num_predict: generator.max_tokens,
                num_ctx: config.model.llm.n_ctx,
                num_gpu: config.model.llm.n_gpu_layers,
            },
            timeout: generator.timeout(),
            agent: http::agent(generator.timeout()),
            retry: RetryPolicy::default(),
            sink: None,
        })
    }

    #[inline]
    #[must_use]
    pub fn with_sink(mut self, sink: Option<TokenSink>) -> Self {
        self.sink = sink;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn complete_blocking(
        &self,
        prompt: &str,
        max_tokens: Option<u32>,
        cancellation: &Cancellation,
    ) -> Result<String, GenerationError> {
        let mut options = self.options;
        if let Some(limit) = max_tokens {
            options.num_predict = limit;
        }

        let body = serde_json::to_string(&GenerateRequest {
            model: &self.model,
            prompt,
            stream: self.sink.is_some(),
            options,
        })
        .map_err(|e| GenerationError::MalformedResponse(format!("cannot encode request: {e}")))?;

        debug!(
            "Requesting completion from {} (model {}, {} prompt chars)",
            self.endpoint,
            self.model,
            prompt.len()
        );

        let mut response = http::with_retry(&self.retry, self.endpoint.as_str(), || {
            self.agent
                .post(self.endpoint.as_str())
                .header("Content-Type", "application/json")
                .send(&body)
        })
        .map_err(|e| GenerationError::from_request(e, self.timeout))?;

        let answer = match &self.sink {
            Some(sink) => {
                let reader = BufReader::new(response.body_mut().as_reader());
                read_stream(reader, sink, self.timeout, cancellation)?
            }
            None => {
                let text = response
                    .body_mut()
                    .read_to_string()
                    .map_err(|e| GenerationError::from_request(http::classify(e), self.timeout))?;
                parse_line(&text)?.response
            }
        };

        info!("Generated answer of {} chars", answer.len());
        finish_answer(&answer)
    }
}

/// Collect an NDJSON token stream, passing each token to `sink` until `cancellation` is raised
pub(super) fn read_stream(
    reader: impl BufRead,
    sink: &TokenSink,
    timeout: Duration,
    cancellation: &Cancellation,
) -> Result<String, GenerationError> {
    let mut answer = String::new();

    for line in reader.lines() {
        if cancellation.is_cancelled() {
            debug!("Dropping the rest of an abandoned token stream");
            return Err(GenerationError::Cancelled);
        }
        let line = line.map_err(|e| GenerationError::from_read(&e, timeout))?;
        if line.trim().is_empty() {
            continue;
        }

        let chunk = parse_line(&line)?;
        sink(&chunk.response);
        answer.push_str(&chunk.response);

        if chunk.done {
            sink("\n");
            return Ok(answer);
        }
    }

    Err(GenerationError::MalformedResponse(
        "stream ended before the final message".to_string(),
    ))
}

fn parse_line(line: &str) -> Result<GenerateResponse, GenerationError> {
    let parsed: GenerateResponse = serde_json::from_str(line)
        .map_err(|e| GenerationError::MalformedResponse(format!("invalid JSON from Ollama: {e}")))?;

    match parsed.error {
        Some(error) => Err(GenerationError::MalformedResponse(format!(
            "Ollama reported an error: {error}"
        ))),
        None => Ok(parsed),
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    async fn complete(
        &self,
        prompt: &str,
        max_tokens: Option<u32>,
    ) -> Result<String, GenerationError> {
        let cancellation = Cancellation::default();
        let _cancel_on_drop = cancellation.cancel_on_drop();
        let generator = self.clone();
        let prompt = prompt.to_string();

        tokio::task::spawn_blocking(move || {
            generator.complete_blocking(&prompt, max_tokens, &cancellation)
        })
        .await
        .map_err(|e| GenerationError::Unreachable(format!("generation task failed: {e}")))?
    }

    fn model(&self) -> &str {
        &self.model
    }
}
