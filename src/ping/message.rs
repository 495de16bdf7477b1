// SPDX-License-Identifier: GPL-3.0-only
use serde::Serialize;

use crate::checker::request::{OsInfo, PROTOCOL_VERSION};
use crate::config::Configurator;
use crate::crx::{ItemDetails, State};
use crate::downloader::{DownloadMetrics, DownloadMode};

const EVENT_UPDATE_COMPLETE: u32 = 3;
const EVENT_DOWNLOAD_COMPLETE: u32 = 14;

fn is_zero(value: &i32) -> bool {
    *value == 0
}

#[derive(Debug, Serialize)]
pub struct PingRequest {
    pub request: PingBody,
}

#[derive(Debug, Serialize)]
pub struct PingBody {
    pub protocol: &'static str,
    pub prodversion: String,
    pub updaterchannel: String,
    pub lang: String,
    pub os: OsInfo,
    pub apps: Vec<PingApp>,
}

#[derive(Debug, Serialize)]
pub struct PingApp {
    pub appid: String,
    pub version: String,
    pub nextversion: String,
    pub events: Vec<PingEvent>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum PingEvent {
    UpdateComplete(UpdateCompleteEvent),
    DownloadComplete(DownloadCompleteEvent),
}

#[derive(Debug, Serialize)]
pub struct UpdateCompleteEvent {
    pub eventtype: u32,
    pub eventresult: u8,
    #[serde(skip_serializing_if = "is_zero")]
    pub errorcat: i32,
    #[serde(skip_serializing_if = "is_zero")]
    pub errorcode: i32,
    #[serde(skip_serializing_if = "is_zero")]
    pub extracode1: i32,
    #[serde(skip_serializing_if = "is_zero")]
    pub differrorcat: i32,
    #[serde(skip_serializing_if = "is_zero")]
    pub differrorcode: i32,
    #[serde(skip_serializing_if = "is_zero")]
    pub diffextracode1: i32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub previousfp: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub nextfp: String,
}

#[derive(Debug, Serialize)]
pub struct DownloadCompleteEvent {
    pub eventtype: u32,
    pub eventresult: u8,
    pub downloader: &'static str,
    #[serde(skip_serializing_if = "is_zero")]
    pub errorcode: i32,
    pub url: String,
    pub downloaded: i64,
    pub total: i64,
    pub download_time_ms: u64,
}

impl From<&DownloadMetrics> for DownloadCompleteEvent {
    fn from(metrics: &DownloadMetrics) -> Self {
        Self {
            eventtype: EVENT_DOWNLOAD_COMPLETE,
            eventresult: u8::from(metrics.error == 0),
            downloader: match metrics.downloader {
                DownloadMode::Foreground => "direct",
                DownloadMode::Background => "background",
            },
            errorcode: metrics.error,
            url: metrics.url.clone(),
            downloaded: metrics.downloaded_bytes,
            total: metrics.total_bytes,
            download_time_ms: metrics.download_time_ms,
        }
    }
}

/// Summarize one finished item as a ping.
pub fn build_ping(config: &dyn Configurator, item: &ItemDetails) -> PingRequest {
    let mut events = vec![PingEvent::UpdateComplete(UpdateCompleteEvent {
        eventtype: EVENT_UPDATE_COMPLETE,
        eventresult: u8::from(item.state == State::Updated),
        errorcat: item.error_category.code(),
        errorcode: item.error_code,
        extracode1: item.extra_code1,
        differrorcat: item.diff_error_category.code(),
        differrorcode: item.diff_error_code,
        diffextracode1: item.diff_extra_code1,
        previousfp: item.previous_fp.clone(),
        nextfp: item.next_fp.clone(),
    })];
    events.extend(
        item.download_metrics
            .iter()
            .map(|metrics| PingEvent::DownloadComplete(metrics.into())),
    );

    PingRequest {
        request: PingBody {
            protocol: PROTOCOL_VERSION,
            prodversion: config.host_version().to_string(),
            updaterchannel: config.channel(),
            lang: config.lang(),
            os: OsInfo {
                platform: config.os_name(),
                arch: config.arch(),
            },
            apps: vec![PingApp {
                appid: item.id.clone(),
                version: item.previous_version.to_string(),
                nextversion: item
                    .next_version
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default(),
                events,
            }],
        },
    }
}
