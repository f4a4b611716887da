use indicatif::{ProgressBar, ProgressStyle};
use std::env;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::DownloadError;
use crate::config::LlmArtifactConfig;
use crate::http::{self, RequestError, RetryPolicy};

pub const DEFAULT_HF_ENDPOINT: &str = "https://huggingface.co";
pub const HF_ENDPOINT_VAR: &str = "HF_ENDPOINT";
pub const HF_TOKEN_VAR: &str = "HF_TOKEN";

const PART_EXTENSION: &str = "part";
// Multi-gigabyte artifacts over slow links
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(6 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadReport {
    pub path: PathBuf,
    pub bytes: u64,
    /// The file was already in place and nothing was fetched
    pub already_present: bool,
}

/// Fetches model files from a Hugging Face compatible hub
#[derive(Debug, Clone)]
pub struct ModelDownloader {
    endpoint: String,
    token: Option<String>,
    agent: ureq::Agent,
    retry: RetryPolicy,
    show_progress: bool,
}

impl ModelDownloader {
    #[inline]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            token: None,
            agent: http::agent(DOWNLOAD_TIMEOUT),
            retry: RetryPolicy::default(),
            show_progress: console::user_attended_stderr(),
        }
    }

    /// Endpoint from `HF_ENDPOINT` and bearer token from `HF_TOKEN`, when set
    #[inline]
    pub fn from_env() -> Self {
        let endpoint = env::var(HF_ENDPOINT_VAR)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_HF_ENDPOINT.to_string());
        let token = env::var(HF_TOKEN_VAR)
            .ok()
            .filter(|value| !value.trim().is_empty());

        Self::new(endpoint).with_token(token)
    }

    #[inline]
    #[must_use]
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    #[inline]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    #[inline]
    pub fn artifact_url(&self, repo_id: &str, filename: &str) -> String {
        format!("{}/{}/resolve/main/{}", self.endpoint, repo_id, filename)
    }

    /// Download `artifact` into `dest_dir`, unless it is already there.
    ///
    /// Bytes land in `<filename>.part` first; the final name only appears once the
    /// transfer is complete. Blocks the calling thread.
    #[inline]
    pub fn download(
        &self,
        artifact: &LlmArtifactConfig,
        dest_dir: &Path,
    ) -> Result<DownloadReport, DownloadError> {
        let destination = dest_dir.join(&artifact.filename);
        if let Ok(metadata) = fs::metadata(&destination) {
            if metadata.len() > 0 {
                info!("Model already present at {}", destination.display());
                return Ok(DownloadReport {
                    path: destination,
                    bytes: metadata.len(),
                    already_present: true,
                });
            }
        }

        fs::create_dir_all(dest_dir)?;
        let url = self.artifact_url(&artifact.repo_id, &artifact.filename);
        info!("Downloading {} to {}", url, destination.display());

        let mut response = http::with_retry(&self.retry, &url, || {
            let mut request = self.agent.get(&url);
            if let Some(token) = &self.token {
                request = request.header("Authorization", &format!("Bearer {token}"));
            }
            request.call()
        })
        .map_err(|e| match e {
            RequestError::Status(status) => DownloadError::Status {
                url: url.clone(),
                status,
            },
            other => DownloadError::Unreachable(other.to_string()),
        })?;

        let expected = response
            .headers()
            .get("content-length")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok());
        debug!("Expected size: {:?} bytes", expected);

        let part_path = destination.with_extension(match destination.extension() {
            Some(ext) => format!("{}.{PART_EXTENSION}", ext.to_string_lossy()),
            None => PART_EXTENSION.to_string(),
        });

        let bar = self.progress_bar(expected);
        let received = {
            let mut writer = BufWriter::new(File::create(&part_path)?);
            let mut reader = bar.wrap_read(response.body_mut().as_reader());
            let copied = io::copy(&mut reader, &mut writer);
            let copied = match copied {
                Ok(copied) => copied,
                Err(e) => {
                    bar.abandon();
                    warn!("Download of {} interrupted: {}", url, e);
                    drop(writer);
                    remove_partial(&part_path);
                    return Err(DownloadError::Unreachable(e.to_string()));
                }
            };
            writer.flush()?;
            writer
                .into_inner()
                .map_err(io::IntoInnerError::into_error)?
                .sync_all()?;
            copied
        };
        bar.finish_and_clear();

        if let Some(expected) = expected {
            if received != expected {
                remove_partial(&part_path);
                return Err(DownloadError::Incomplete { expected, received });
            }
        }

        fs::rename(&part_path, &destination)?;
        info!("Downloaded {} bytes to {}", received, destination.display());

        Ok(DownloadReport {
            path: destination,
            bytes: received,
            already_present: false,
        })
    }

    fn progress_bar(&self, length: Option<u64>) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }

        let bar = length.map_or_else(ProgressBar::new_spinner, ProgressBar::new);
        let style = ProgressStyle::with_template(
            "{spinner} [{bytes}/{total_bytes}] {bytes_per_sec} eta {eta}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.with_style(style)
    }
}

fn remove_partial(part_path: &Path) {
    if let Err(e) = fs::remove_file(part_path) {
        debug!("Could not remove {}: {}", part_path.display(), e);
    }
}
