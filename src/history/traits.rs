// SPDX-License-Identifier: GPL-3.0-only
use async_trait::async_trait;

use crate::history::models::UpdateRecord;

#[async_trait]
pub trait History: Send + Sync {
    /// Store a record, returning its assigned id
    async fn record(&self, record: UpdateRecord) -> anyhow::Result<i64>;

    /// Most recent records first
    async fn list_recent(&self, limit: u32) -> anyhow::Result<Vec<UpdateRecord>>;

    /// All records of one component, most recent first
    async fn list_for(&self, crx_id: &str) -> anyhow::Result<Vec<UpdateRecord>>;
}
