// SPDX-License-Identifier: GPL-3.0-only
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadMode {
    /// Stream straight into a fresh temporary file
    Foreground,
    /// Resumable transfer into a partial file kept across attempts
    Background,
}

/// Outcome of one attempted URL, reported in pings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadMetrics {
    pub url: String,
    pub downloader: DownloadMode,
    pub error: i32,
    pub downloaded_bytes: i64,
    /// -1 when the server didn't announce a length
    pub total_bytes: i64,
    pub download_time_ms: u64,
}

#[derive(thiserror::Error, Debug)]
pub enum DownloadError {
    #[error("No download URLs available")]
    NoUrls,

    #[error("Server responded with HTTP {0}")]
    Status(u16),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DownloadError {
    /// Numeric code recorded on the item. HTTP statuses are passed through,
    /// everything else is negative.
    pub fn code(&self) -> i32 {
        match self {
            DownloadError::NoUrls => -1,
            DownloadError::Status(status) => i32::from(*status),
            DownloadError::Network(e) if e.is_timeout() => -2,
            DownloadError::Network(e) if e.is_connect() => -3,
            DownloadError::Network(_) => -4,
            DownloadError::Io(_) => -5,
        }
    }
}

/// Called with the number of bytes received so far. Values may go
/// backwards when the downloader moves on to the next URL.
pub type ProgressCallback = Arc<dyn Fn(u64) + Send + Sync>;

#[derive(Debug)]
pub struct DownloadOutcome {
    /// Path of the downloaded file, owned by the caller on success
    pub result: Result<PathBuf, DownloadError>,
    pub metrics: Vec<DownloadMetrics>,
}

#[async_trait]
pub trait CrxDownloader: Send + Sync {
    /// Try `urls` in order until one succeeds.
    async fn download(
        &self,
        urls: &[Url],
        mode: DownloadMode,
        progress: ProgressCallback,
    ) -> DownloadOutcome;
}
