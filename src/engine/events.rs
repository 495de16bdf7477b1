// SPDX-License-Identifier: GPL-3.0-only
use serde::{Deserialize, Serialize};

/// Notifications broadcast by the engine. Item events carry the component id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "id", rename_all = "snake_case")]
pub enum Event {
    UpdaterStarted,
    UpdaterSleeping,
    CheckingForUpdates(String),
    UpdateFound(String),
    UpdateDownloading(String),
    UpdateReady(String),
    Updated(String),
    NotUpdated(String),
}

impl Event {
    pub fn id(&self) -> Option<&str> {
        match self {
            Event::UpdaterStarted | Event::UpdaterSleeping => None,
            Event::CheckingForUpdates(id)
            | Event::UpdateFound(id)
            | Event::UpdateDownloading(id)
            | Event::UpdateReady(id)
            | Event::Updated(id)
            | Event::NotUpdated(id) => Some(id),
        }
    }
}

/// Result of a request made to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ok,
    Replaced,
    InProgress,
    Error,
}
