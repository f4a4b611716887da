// Shared blocking HTTP plumbing for the Ollama, OpenAI and model hub clients

use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const EXPONENTIAL_BACKOFF_BASE: u32 = 2;

/// Failure of a request after retries, classified for the callers' error kinds
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("HTTP status {0}")]
    Status(u16),
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request failed: {0}")]
    Other(String),
}

/// How often and how patiently a request is retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    #[inline]
    fn default() -> Self {
        Self {
            attempts: DEFAULT_RETRY_ATTEMPTS,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    #[inline]
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    #[inline]
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1)
    }
}

/// Sort a ureq failure into the kinds callers distinguish
#[inline]
pub fn classify(error: ureq::Error) -> RequestError {
    match error {
        ureq::Error::StatusCode(status) => RequestError::Status(status),
        ureq::Error::Timeout(_) => RequestError::Timeout,
        ureq::Error::ConnectionFailed | ureq::Error::HostNotFound | ureq::Error::Io(_) => {
            RequestError::Transport(error.to_string())
        }
        other => RequestError::Other(other.to_string()),
    }
}

/// Build an agent whose every request is bounded by `timeout`
#[inline]
pub fn agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}

/// Run `request_fn` until it succeeds, retrying server errors and transport failures.
///
/// Client errors (4xx) and timeouts are returned immediately. Blocks the calling thread
/// while backing off, so async callers run this inside `spawn_blocking`.
#[inline]
pub fn with_retry<T, F>(policy: &RetryPolicy, target: &str, mut request_fn: F) -> Result<T, RequestError>
where
    F: FnMut() -> Result<T, ureq::Error>,
{
    let mut last_error = None;

    for attempt in 1..=policy.attempts {
        debug!("HTTP request attempt {}/{} to {}", attempt, policy.attempts, target);

        match request_fn() {
            Ok(response) => {
                debug!("Request succeeded on attempt {}", attempt);
                return Ok(response);
            }
            Err(error) => {
                let classified = classify(error);
                match &classified {
                    RequestError::Status(status) if *status >= 500 => {
                        warn!(
                            "Server error (status {}), attempt {}/{}",
                            status, attempt, policy.attempts
                        );
                    }
                    RequestError::Transport(message) => {
                        warn!(
                            "Transport error: {}, attempt {}/{}",
                            message, attempt, policy.attempts
                        );
                    }
                    RequestError::Status(status) => {
                        warn!("Client error (status {}), not retrying", status);
                        return Err(classified);
                    }
                    RequestError::Timeout => {
                        warn!("Request to {} timed out, not retrying", target);
                        return Err(classified);
                    }
                    RequestError::Other(message) => {
                        warn!("Non-retryable error: {}", message);
                        return Err(classified);
                    }
                }

                last_error = Some(classified);

                if attempt < policy.attempts {
                    let delay = policy.delay_for(attempt);
                    debug!("Waiting {:?} before retry", delay);
                    std::thread::sleep(delay);
                }
            }
        }
    }

    error!("All retry attempts failed for request to {}", target);

    Err(last_error.unwrap_or_else(|| RequestError::Other("request failed after retries".to_string())))
}
