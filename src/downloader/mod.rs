// SPDX-License-Identifier: GPL-3.0-only
pub mod traits;
pub mod client;
pub mod crx;

pub use traits::{
    CrxDownloader, DownloadError, DownloadMetrics, DownloadMode, DownloadOutcome, ProgressCallback,
};
pub use client::HttpClient;
pub use crx::HttpCrxDownloader;
