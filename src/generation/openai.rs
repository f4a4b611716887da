use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use super::{Cancellation, GenerationError, Generator, TokenSink, endpoint_url, finish_answer};
use crate::config::{Config, ConfigError};
use crate::http::{self, RetryPolicy};

const STREAM_DATA_PREFIX: &str = "data:";
const STREAM_DONE: &str = "[DONE]";

/// Completion model behind an OpenAI-compatible `/v1/completions` endpoint
#[derive(Clone)]
pub struct OpenAiGenerator {
    endpoint: Url,
    api_key: String,
    model: String,
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
    timeout: Duration,
    agent: ureq::Agent,
    retry: RetryPolicy,
    sink: Option<TokenSink>,
}

impl std::fmt::Debug for OpenAiGenerator {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiGenerator")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("streaming", &self.sink.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    text: String,
}

impl OpenAiGenerator {
    /// Reads the API key from the environment, failing when it is missing
    #[inline]
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        let api_key = config.openai_api_key()?;
        let generator = &config.generator;
        let base_url = generator.openai_url()?;
        let endpoint = endpoint_url(&base_url, "v1/completions")?;

        Ok(Self {
            endpoint,
            api_key,
            model: generator.model_name().to_string(),
            temperature: generator.temperature,
            top_p: generator.top_p,
            max_tokens: generator.max_tokens,
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
        let body = serde_json::to_string(&CompletionRequest {
            model: &self.model,
            prompt,
            max_tokens: max_tokens.unwrap_or(self.max_tokens),
            temperature: self.temperature,
            top_p: self.top_p,
            stream: self.sink.is_some(),
        })
        .map_err(|e| GenerationError::MalformedResponse(format!("cannot encode request: {e}")))?;

        debug!("Requesting completion from {} (model {})", self.endpoint, self.model);

        let authorization = format!("Bearer {}", self.api_key);
        let mut response = http::with_retry(&self.retry, self.endpoint.as_str(), || {
            self.agent
                .post(self.endpoint.as_str())
                .header("Content-Type", "application/json")
                .header("Authorization", &authorization)
                .send(&body)
        })
        .map_err(|e| GenerationError::from_request(e, self.timeout))?;

        let answer = match &self.sink {
            Some(sink) => {
                let reader = BufReader::new(response.body_mut().as_reader());
                read_event_stream(reader, sink, self.timeout, cancellation)?
            }
            None => {
                let text = response
                    .body_mut()
                    .read_to_string()
                    .map_err(|e| GenerationError::from_request(http::classify(e), self.timeout))?;
                first_choice(&text)?
            }
        };

        info!("Generated answer of {} chars", answer.len());
        finish_answer(&answer)
    }
}

/// Collect a server-sent event stream of completion chunks until `[DONE]`, or until
/// `cancellation` is raised
pub(super) fn read_event_stream(
    reader: impl BufRead,
    sink: &TokenSink,
    timeout: Duration,
    cancellation: &Cancellation,
) -> Result<String, GenerationError> {
    let mut answer = String::new();

    for line in reader.lines() {
        if cancellation.is_cancelled() {
            debug!("Dropping the rest of an abandoned event stream");
            return Err(GenerationError::Cancelled);
        }
        let line = line.map_err(|e| GenerationError::from_read(&e, timeout))?;
        let Some(data) = line.strip_prefix(STREAM_DATA_PREFIX) else {
            continue;
        };

        let data = data.trim();
        if data == STREAM_DONE {
            sink("\n");
            return Ok(answer);
        }

        let token = first_choice(data)?;
        sink(&token);
        answer.push_str(&token);
    }

    Err(GenerationError::MalformedResponse(
        "event stream ended without [DONE]".to_string(),
    ))
}

fn first_choice(json: &str) -> Result<String, GenerationError> {
    let response: CompletionResponse = serde_json::from_str(json)
        .map_err(|e| GenerationError::MalformedResponse(format!("invalid completion JSON: {e}")))?;

    response
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.text)
        .ok_or_else(|| GenerationError::MalformedResponse("no choices in response".to_string()))
}

#[async_trait]
impl Generator for OpenAiGenerator {
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
