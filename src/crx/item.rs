// SPDX-License-Identifier: GPL-3.0-only
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use url::Url;

use crate::downloader::DownloadMetrics;
use crate::errors::ErrorCategory;
use crate::installer::CrxInstaller;
use crate::version::Version;

/// Continuation run once an item reaches a terminal state.
pub type ReadyCallback = Box<dyn FnOnce() + Send + 'static>;

/// Lifecycle of a registered component within one check cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    New,
    Checking,
    CanUpdate,
    DownloadingDiff,
    Downloading,
    UpdatingDiff,
    Updating,
    Updated,
    UpToDate,
    NoUpdate,
}

impl State {
    /// States that end a check cycle.
    pub fn is_terminal(self) -> bool {
        matches!(self, State::Updated | State::UpToDate | State::NoUpdate)
    }

    /// States from which the engine may start a fresh check.
    pub fn is_checkable(self) -> bool {
        self == State::New || self.is_terminal()
    }

    pub fn is_downloading(self) -> bool {
        matches!(self, State::Downloading | State::DownloadingDiff)
    }

    pub fn is_updating(self) -> bool {
        matches!(self, State::Updating | State::UpdatingDiff)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            State::New => "new",
            State::Checking => "checking",
            State::CanUpdate => "can_update",
            State::DownloadingDiff => "downloading_diff",
            State::Downloading => "downloading",
            State::UpdatingDiff => "updating_diff",
            State::Updating => "updating",
            State::Updated => "updated",
            State::UpToDate => "up_to_date",
            State::NoUpdate => "no_update",
        }
    }
}

impl FromStr for State {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            State::New,
            State::Checking,
            State::CanUpdate,
            State::DownloadingDiff,
            State::Downloading,
            State::UpdatingDiff,
            State::Updating,
            State::Updated,
            State::UpToDate,
            State::NoUpdate,
        ]
        .into_iter()
        .find(|state| state.as_str() == s)
        .ok_or_else(|| format!("unknown state {}", s))
    }
}

/// What a component announces about itself when it registers.
#[derive(Clone)]
pub struct CrxComponent {
    pub pk_hash: Vec<u8>,
    pub installer: Arc<dyn CrxInstaller>,
    pub version: Version,
    pub fingerprint: String,
    pub name: String,
    pub installer_attributes: BTreeMap<String, String>,
    pub allow_background_download: bool,
    pub updates_enabled: bool,
}

impl CrxComponent {
    pub fn new(
        name: impl Into<String>,
        pk_hash: Vec<u8>,
        version: Version,
        installer: Arc<dyn CrxInstaller>,
    ) -> Self {
        Self {
            pk_hash,
            installer,
            version,
            fingerprint: String::new(),
            name: name.into(),
            installer_attributes: BTreeMap::new(),
            allow_background_download: false,
            updates_enabled: true,
        }
    }
}

impl fmt::Debug for CrxComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrxComponent")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("fingerprint", &self.fingerprint)
            .field("installer_attributes", &self.installer_attributes)
            .field("allow_background_download", &self.allow_background_download)
            .field("updates_enabled", &self.updates_enabled)
            .finish_non_exhaustive()
    }
}

/// Per-component bookkeeping owned by the update engine. Only the engine's
/// state transition function changes `state`.
pub struct VersionedItem {
    pub id: String,
    pub component: CrxComponent,
    pub state: State,

    pub previous_version: Version,
    pub next_version: Option<Version>,
    pub previous_fp: String,
    pub next_fp: String,

    pub crx_urls: Vec<Url>,
    pub crx_diffurls: Vec<Url>,
    pub package_hash: Option<String>,
    pub package_hashdiff: Option<String>,

    pub on_demand: bool,
    pub diff_update_failed: bool,
    pub unregistered: bool,

    pub error_category: ErrorCategory,
    pub error_code: i32,
    pub extra_code1: i32,
    pub diff_error_category: ErrorCategory,
    pub diff_error_code: i32,
    pub diff_extra_code1: i32,

    pub download_metrics: Vec<DownloadMetrics>,
    pub last_check: Option<DateTime<Utc>>,
    pub ready_callbacks: Vec<ReadyCallback>,
}

impl VersionedItem {
    pub fn new(id: String, component: CrxComponent) -> Self {
        Self {
            id,
            previous_version: component.version.clone(),
            previous_fp: component.fingerprint.clone(),
            component,
            state: State::New,
            next_version: None,
            next_fp: String::new(),
            crx_urls: Vec::new(),
            crx_diffurls: Vec::new(),
            package_hash: None,
            package_hashdiff: None,
            on_demand: false,
            diff_update_failed: false,
            unregistered: false,
            error_category: ErrorCategory::None,
            error_code: 0,
            extra_code1: 0,
            diff_error_category: ErrorCategory::None,
            diff_error_code: 0,
            diff_extra_code1: 0,
            download_metrics: Vec::new(),
            last_check: None,
            ready_callbacks: Vec::new(),
        }
    }

    /// Clear everything learned by the previous check before a new one.
    pub fn reset_for_check(&mut self, now: DateTime<Utc>) {
        self.last_check = Some(now);
        self.crx_urls.clear();
        self.crx_diffurls.clear();
        self.package_hash = None;
        self.package_hashdiff = None;
        self.previous_version = self.component.version.clone();
        self.next_version = None;
        self.previous_fp = self.component.fingerprint.clone();
        self.next_fp.clear();
        self.diff_update_failed = false;
        self.error_category = ErrorCategory::None;
        self.error_code = 0;
        self.extra_code1 = 0;
        self.diff_error_category = ErrorCategory::None;
        self.diff_error_code = 0;
        self.diff_extra_code1 = 0;
        self.download_metrics.clear();
    }

    /// Seconds since the last check, or `None` if never checked.
    pub fn since_last_check(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.last_check.map(|last| now - last)
    }

    pub fn has_diff_update(&self) -> bool {
        !self.crx_diffurls.is_empty()
    }

    pub fn details(&self) -> ItemDetails {
        ItemDetails {
            id: self.id.clone(),
            name: self.component.name.clone(),
            state: self.state,
            version: self.component.version.clone(),
            fingerprint: self.component.fingerprint.clone(),
            previous_version: self.previous_version.clone(),
            next_version: self.next_version.clone(),
            previous_fp: self.previous_fp.clone(),
            next_fp: self.next_fp.clone(),
            crx_urls: self.crx_urls.iter().map(Url::to_string).collect(),
            crx_diffurls: self.crx_diffurls.iter().map(Url::to_string).collect(),
            on_demand: self.on_demand,
            diff_update_failed: self.diff_update_failed,
            unregistered: self.unregistered,
            error_category: self.error_category,
            error_code: self.error_code,
            extra_code1: self.extra_code1,
            diff_error_category: self.diff_error_category,
            diff_error_code: self.diff_error_code,
            diff_extra_code1: self.diff_extra_code1,
            download_metrics: self.download_metrics.clone(),
            last_check: self.last_check,
        }
    }
}

impl fmt::Debug for VersionedItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionedItem")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("component", &self.component)
            .field("next_version", &self.next_version)
            .field("on_demand", &self.on_demand)
            .field("diff_update_failed", &self.diff_update_failed)
            .field("ready_callbacks", &self.ready_callbacks.len())
            .finish_non_exhaustive()
    }
}

/// Read-only snapshot of a `VersionedItem` handed out to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemDetails {
    pub id: String,
    pub name: String,
    pub state: State,
    pub version: Version,
    pub fingerprint: String,
    pub previous_version: Version,
    pub next_version: Option<Version>,
    pub previous_fp: String,
    pub next_fp: String,
    pub crx_urls: Vec<String>,
    pub crx_diffurls: Vec<String>,
    pub on_demand: bool,
    pub diff_update_failed: bool,
    pub unregistered: bool,
    pub error_category: ErrorCategory,
    pub error_code: i32,
    pub extra_code1: i32,
    pub diff_error_category: ErrorCategory,
    pub diff_error_code: i32,
    pub diff_extra_code1: i32,
    pub download_metrics: Vec<DownloadMetrics>,
    pub last_check: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::NullInstaller;

    fn test_item() -> VersionedItem {
        let component = CrxComponent::new(
            "test",
            vec![1; 32],
            Version::parse("1.0").unwrap(),
            Arc::new(NullInstaller),
        );
        VersionedItem::new("id".to_string(), component)
    }

    #[test]
    fn test_state_classes() {
        assert!(State::New.is_checkable());
        assert!(State::UpToDate.is_checkable());
        assert!(!State::CanUpdate.is_checkable());
        assert!(!State::Checking.is_terminal());
        assert!(State::DownloadingDiff.is_downloading());
        assert!(State::UpdatingDiff.is_updating());
    }

    #[test]
    fn test_state_names_match_serde() {
        for state in [State::New, State::CanUpdate, State::UpToDate, State::NoUpdate] {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{}\"", state.as_str()));
            assert_eq!(state.as_str().parse::<State>().unwrap(), state);
        }
        assert!("bogus".parse::<State>().is_err());
    }

    #[test]
    fn test_reset_for_check_clears_cycle_fields() {
        let mut item = test_item();
        item.next_version = Version::parse("2.0");
        item.next_fp = "fp2".to_string();
        item.crx_urls.push(Url::parse("https://example.com/a.crx").unwrap());
        item.diff_update_failed = true;
        item.error_category = ErrorCategory::Network;
        item.error_code = 7;
        item.diff_error_code = 3;
        item.component.fingerprint = "fp1".to_string();

        let now = Utc::now();
        item.reset_for_check(now);

        assert_eq!(item.last_check, Some(now));
        assert!(item.next_version.is_none());
        assert!(item.next_fp.is_empty());
        assert!(item.crx_urls.is_empty());
        assert!(!item.diff_update_failed);
        assert_eq!(item.error_category, ErrorCategory::None);
        assert_eq!(item.error_code, 0);
        assert_eq!(item.diff_error_code, 0);
        assert_eq!(item.previous_fp, "fp1");
        assert_eq!(item.previous_version, "1.0");
    }

    #[test]
    fn test_details_serializes() {
        let item = test_item();
        let json = serde_json::to_string(&item.details()).unwrap();
        assert!(json.contains("\"state\":\"new\""));
        assert!(json.contains("\"version\":\"1.0\""));
    }
}
