// SPDX-License-Identifier: GPL-3.0-only
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use crate::downloader::client::{HttpClient, Transfer};
use crate::downloader::traits::{
    CrxDownloader, DownloadError, DownloadMetrics, DownloadMode, DownloadOutcome, ProgressCallback,
};

/// Downloads packages over HTTP into a single directory.
pub struct HttpCrxDownloader {
    client: HttpClient,
    download_dir: PathBuf,
}

impl HttpCrxDownloader {
    pub async fn new(download_dir: PathBuf) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&download_dir).await?;

        Ok(Self {
            client: HttpClient::new()?,
            download_dir,
        })
    }

    fn final_path(&self, url: &Url) -> PathBuf {
        let filename = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|name| !name.is_empty())
            .unwrap_or("download.crx");

        self.download_dir
            .join(format!("{}-{}", Uuid::new_v4(), filename))
    }

    /// Partial files are keyed by URL so a later attempt at the same URL
    /// picks up where the previous one stopped.
    fn partial_path(&self, url: &Url) -> PathBuf {
        let key = hex::encode(Sha256::digest(url.as_str().as_bytes()));
        self.download_dir.join(format!("{}.partial", key))
    }

    async fn fetch_foreground(
        &self,
        url: &Url,
        progress: &ProgressCallback,
    ) -> (Result<PathBuf, DownloadError>, Option<Transfer>) {
        let output_path = self.final_path(url);

        match self.client.fetch_to_file(url, &output_path, false, progress).await {
            Ok(transfer) => (Ok(output_path), Some(transfer)),
            Err(e) => {
                remove_quietly(&output_path).await;
                (Err(e), None)
            }
        }
    }

    async fn fetch_background(
        &self,
        url: &Url,
        progress: &ProgressCallback,
    ) -> (Result<PathBuf, DownloadError>, Option<Transfer>) {
        let partial = self.partial_path(url);

        match self.client.fetch_to_file(url, &partial, true, progress).await {
            Ok(transfer) => {
                let output_path = self.final_path(url);
                match tokio::fs::rename(&partial, &output_path).await {
                    Ok(()) => (Ok(output_path), Some(transfer)),
                    Err(e) => (Err(DownloadError::Io(e)), Some(transfer)),
                }
            }
            Err(DownloadError::Status(416)) => {
                // The partial file no longer matches what the server has.
                remove_quietly(&partial).await;
                (Err(DownloadError::Status(416)), None)
            }
            Err(e) => (Err(e), None),
        }
    }
}

#[async_trait]
impl CrxDownloader for HttpCrxDownloader {
    async fn download(
        &self,
        urls: &[Url],
        mode: DownloadMode,
        progress: ProgressCallback,
    ) -> DownloadOutcome {
        let mut metrics = Vec::with_capacity(urls.len());
        let mut last_error = DownloadError::NoUrls;

        for url in urls {
            let started = Instant::now();
            let (result, transfer) = match mode {
                DownloadMode::Foreground => self.fetch_foreground(url, &progress).await,
                DownloadMode::Background => self.fetch_background(url, &progress).await,
            };

            let downloaded_bytes = match (&transfer, mode) {
                (Some(transfer), _) => transfer.downloaded as i64,
                (None, DownloadMode::Background) => file_len(&self.partial_path(url)).await,
                (None, DownloadMode::Foreground) => 0,
            };

            metrics.push(DownloadMetrics {
                url: url.to_string(),
                downloader: mode,
                error: result.as_ref().err().map_or(0, DownloadError::code),
                downloaded_bytes,
                total_bytes: transfer
                    .and_then(|transfer| transfer.total)
                    .map_or(-1, |total| total as i64),
                download_time_ms: started.elapsed().as_millis() as u64,
            });

            match result {
                Ok(path) => {
                    info!(url = %url, path = %path.display(), ?mode, "Package downloaded");
                    return DownloadOutcome {
                        result: Ok(path),
                        metrics,
                    };
                }
                Err(e) => {
                    warn!(url = %url, error = %e, ?mode, "Download failed, trying next URL");
                    last_error = e;
                }
            }
        }

        DownloadOutcome {
            result: Err(last_error),
            metrics,
        }
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove download file");
        }
    }
}

async fn file_len(path: &Path) -> i64 {
    tokio::fs::metadata(path)
        .await
        .map_or(0, |meta| meta.len() as i64)
}
