//! Bounded-timeout HTTP fetches for subscriptions and rule-set files.

use std::io;
use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};

use crate::assembler::write_atomic;
use crate::settings::NetworkSettings;

/// Errors raised while fetching a remote resource.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Connection, TLS or protocol failure.
    #[error("network error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("{url} returned HTTP {status}")]
    Status {
        /// Requested URL.
        url: String,
        /// Response status code.
        status: u16,
    },

    /// The deadline passed before the body was read.
    #[error("download of {0} timed out")]
    Timeout(String),

    /// Writing the downloaded file failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for downloads.
pub type Result<T> = std::result::Result<T, DownloadError>;

/// HTTP client with a fixed user agent and deadline.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: reqwest::Client,
    timeout: Duration,
}

impl Downloader {
    /// Creates a downloader.
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self { client, timeout })
    }

    /// Creates a downloader from the network settings.
    pub fn from_settings(settings: &NetworkSettings) -> Result<Self> {
        Self::new(
            &settings.user_agent,
            Duration::from_secs(settings.download_timeout_secs.max(1)),
        )
    }

    /// Returns the deadline applied to every request.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Fetches `url` and returns the body.
    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        debug!(url, "downloading");
        let request = async {
            let response = self.client.get(url).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(DownloadError::Status {
                    url: url.to_string(),
                    status: status.as_u16(),
                });
            }
            Ok::<_, DownloadError>(response.bytes().await?.to_vec())
        };

        match tokio::time::timeout(self.timeout, request).await {
            Ok(Err(DownloadError::Http(e))) if e.is_timeout() => {
                Err(DownloadError::Timeout(url.to_string()))
            }
            Ok(result) => result,
            Err(_) => Err(DownloadError::Timeout(url.to_string())),
        }
    }

    /// Fetches `url` and atomically replaces `path` with the body.
    pub async fn download_to(&self, url: &str, path: &Path) -> Result<u64> {
        let body = self.fetch(url).await?;
        write_atomic(path, &body)?;
        info!(url, path = %path.display(), bytes = body.len(), "downloaded file");
        Ok(body.len() as u64)
    }
}
