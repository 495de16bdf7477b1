// SPDX-License-Identifier: GPL-3.0-only
use futures_util::StreamExt;
use reqwest::{Client, StatusCode, header};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use url::Url;

use crate::downloader::traits::{DownloadError, ProgressCallback};

const USER_AGENT: &str = concat!("crx-updater/", env!("CARGO_PKG_VERSION"));

/// Bytes received by one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transfer {
    /// Size of the file on disk after the transfer
    pub downloaded: u64,
    /// Full size announced by the server, if any
    pub total: Option<u64>,
}

pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new() -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(300)) // 5 minute timeout for large downloads
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self { client })
    }

    /// Stream `url` into `output_path`.
    ///
    /// With `resume` set and a non-empty file already present, a `Range`
    /// request continues where the file ends. A server that ignores the range
    /// restarts the file from scratch.
    pub async fn fetch_to_file(
        &self,
        url: &Url,
        output_path: &Path,
        resume: bool,
        progress: &ProgressCallback,
    ) -> Result<Transfer, DownloadError> {
        let offset = if resume {
            match tokio::fs::metadata(output_path).await {
                Ok(meta) => meta.len(),
                Err(_) => 0,
            }
        } else {
            0
        };

        info!(url = %url, path = %output_path.display(), offset, "Starting download");

        let mut request = self.client.get(url.clone());
        if offset > 0 {
            request = request.header(header::RANGE, format!("bytes={}-", offset));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status(status.as_u16()));
        }

        let resumed = offset > 0 && status == StatusCode::PARTIAL_CONTENT;
        let mut downloaded = if resumed { offset } else { 0 };
        let total = response.content_length().map(|len| len + downloaded);

        let mut file = if resumed {
            debug!(url = %url, offset, "Server accepted range request");
            tokio::fs::OpenOptions::new()
                .append(true)
                .open(output_path)
                .await?
        } else {
            tokio::fs::File::create(output_path).await?
        };

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            progress(downloaded);
        }
        file.flush().await?;

        info!(url = %url, path = %output_path.display(), downloaded, "Download completed");
        Ok(Transfer { downloaded, total })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tempfile::TempDir;

    fn recording_progress() -> (ProgressCallback, Arc<AtomicU64>) {
        let last = Arc::new(AtomicU64::new(0));
        let sink = Arc::clone(&last);
        let callback: ProgressCallback = Arc::new(move |bytes| sink.store(bytes, Ordering::SeqCst));
        (callback, last)
    }

    #[tokio::test]
    async fn test_fetch_to_file() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/pkg.crx")
            .with_status(200)
            .with_body("package bytes")
            .create_async()
            .await;

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("pkg.crx");
        let url = Url::parse(&format!("{}/pkg.crx", server.url())).unwrap();
        let (progress, last) = recording_progress();

        let transfer = HttpClient::new()
            .unwrap()
            .fetch_to_file(&url, &path, false, &progress)
            .await
            .unwrap();

        assert_eq!(transfer.downloaded, 13);
        assert_eq!(transfer.total, Some(13));
        assert_eq!(last.load(Ordering::SeqCst), 13);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "package bytes");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_resumes_partial_file() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/pkg.crx")
            .match_header("range", "bytes=6-")
            .with_status(206)
            .with_body("world")
            .create_async()
            .await;

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("pkg.partial");
        std::fs::write(&path, "hello ").unwrap();
        let url = Url::parse(&format!("{}/pkg.crx", server.url())).unwrap();
        let (progress, _) = recording_progress();

        let transfer = HttpClient::new()
            .unwrap()
            .fetch_to_file(&url, &path, true, &progress)
            .await
            .unwrap();

        assert_eq!(transfer.downloaded, 11);
        assert_eq!(transfer.total, Some(11));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello world");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_restarts_when_range_ignored() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/pkg.crx")
            .with_status(200)
            .with_body("hello world")
            .create_async()
            .await;

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("pkg.partial");
        std::fs::write(&path, "stale").unwrap();
        let url = Url::parse(&format!("{}/pkg.crx", server.url())).unwrap();
        let (progress, _) = recording_progress();

        HttpClient::new()
            .unwrap()
            .fetch_to_file(&url, &path, true, &progress)
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello world");
    }

    #[tokio::test]
    async fn test_fetch_http_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/missing.crx")
            .with_status(404)
            .create_async()
            .await;

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("missing.crx");
        let url = Url::parse(&format!("{}/missing.crx", server.url())).unwrap();
        let (progress, _) = recording_progress();

        let err = HttpClient::new()
            .unwrap()
            .fetch_to_file(&url, &path, false, &progress)
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::Status(404)));
        assert!(!path.exists());
    }
}
