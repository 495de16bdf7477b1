// SPDX-License-Identifier: GPL-3.0-only
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crx::{ItemDetails, State};
use crate::errors::ErrorCategory;

/// One finished pass of a component through the update pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateRecord {
    /// Assigned by the store, `None` until recorded
    pub id: Option<i64>,

    pub crx_id: String,

    /// Component display name at the time of the update
    pub name: String,

    /// Terminal state the pass ended in
    pub state: State,

    pub previous_version: String,

    /// Version that was offered, if any
    pub next_version: Option<String>,

    pub error_category: ErrorCategory,
    pub error_code: i32,
    pub extra_code1: i32,
    pub diff_error_category: ErrorCategory,
    pub diff_error_code: i32,
    pub diff_update_failed: bool,

    pub recorded_at: DateTime<Utc>,
}

impl UpdateRecord {
    pub fn from_details(details: &ItemDetails) -> Self {
        Self {
            id: None,
            crx_id: details.id.clone(),
            name: details.name.clone(),
            state: details.state,
            previous_version: details.previous_version.to_string(),
            next_version: details.next_version.as_ref().map(ToString::to_string),
            error_category: details.error_category,
            error_code: details.error_code,
            extra_code1: details.extra_code1,
            diff_error_category: details.diff_error_category,
            diff_error_code: details.diff_error_code,
            diff_update_failed: details.diff_update_failed,
            recorded_at: Utc::now(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.state == State::Updated
    }
}
