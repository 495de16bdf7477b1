// SPDX-License-Identifier: GPL-3.0-only
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::crx::ItemDetails;
use crate::engine::ComponentUpdateService;
use crate::history::{models::UpdateRecord, traits::History};

/// Writes a history record whenever a component finishes a pass.
pub struct HistoryRecorder {
    service: ComponentUpdateService,
    history: Arc<dyn History>,
}

impl HistoryRecorder {
    pub fn new(service: ComponentUpdateService, history: Arc<dyn History>) -> Self {
        Self { service, history }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        let mut outcomes = self.service.subscribe_outcomes();
        tokio::spawn(async move {
            info!("History recorder started");
            loop {
                match outcomes.recv().await {
                    Ok(details) => self.on_finished(&details).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "History recorder fell behind, outcomes lost");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    async fn on_finished(&self, details: &ItemDetails) {
        if let Err(e) = self.history.record(UpdateRecord::from_details(details)).await {
            error!(id = %details.id, error = %e, "Failed to record update outcome");
        }
    }
}
