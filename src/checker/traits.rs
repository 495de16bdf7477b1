// SPDX-License-Identifier: GPL-3.0-only
use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::checker::response::UpdateResults;
use crate::crx::VersionedItem;
use crate::version::Version;

/// What the server needs to know about one component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckItem {
    pub id: String,
    pub version: Version,
    pub fingerprint: String,
    pub installer_attributes: BTreeMap<String, String>,
    pub on_demand: bool,
}

impl CheckItem {
    pub fn from_item(item: &VersionedItem) -> Self {
        Self {
            id: item.id.clone(),
            version: item.component.version.clone(),
            fingerprint: item.component.fingerprint.clone(),
            installer_attributes: item.component.installer_attributes.clone(),
            on_demand: item.on_demand,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum CheckError {
    #[error("No update URLs configured")]
    NoUrls,

    #[error("Update server responded with HTTP {0}")]
    Status(u16),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Malformed update response: {0}")]
    Parse(String),
}

impl CheckError {
    pub fn code(&self) -> i32 {
        match self {
            CheckError::NoUrls => -1,
            CheckError::Status(status) => i32::from(*status),
            CheckError::Network(e) if e.is_timeout() => -2,
            CheckError::Network(e) if e.is_connect() => -3,
            CheckError::Network(_) => -4,
            CheckError::Parse(_) => -10,
        }
    }
}

#[async_trait]
pub trait UpdateChecker: Send + Sync {
    /// Ask the update server about `items` in a single round trip.
    async fn check_for_updates(
        &self,
        items: Vec<CheckItem>,
        extra: &str,
    ) -> Result<UpdateResults, CheckError>;
}
