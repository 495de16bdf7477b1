// SPDX-License-Identifier: GPL-3.0-only
use async_trait::async_trait;
use chrono::DateTime;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqliteRow};
use sqlx::Row;
use std::path::Path;
use tracing::{debug, error, info};

use crate::crx::State;
use crate::errors::ErrorCategory;
use crate::history::{models::UpdateRecord, traits::History};

pub struct SqliteHistory {
    pool: SqlitePool,
}

impl SqliteHistory {
    pub async fn new(db_path: &Path) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;

        let history = Self { pool };
        history.init_schema().await?;

        Ok(history)
    }

    async fn init_schema(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS update_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                crx_id TEXT NOT NULL,
                name TEXT NOT NULL,
                state TEXT NOT NULL,
                previous_version TEXT NOT NULL,
                next_version TEXT,
                error_category INTEGER NOT NULL,
                error_code INTEGER NOT NULL,
                extra_code1 INTEGER NOT NULL,
                diff_error_category INTEGER NOT NULL,
                diff_error_code INTEGER NOT NULL,
                diff_update_failed INTEGER NOT NULL,
                recorded_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_update_history_crx_id ON update_history (crx_id)",
        )
        .execute(&self.pool)
        .await?;

        info!("Initialized SQLite history schema");
        Ok(())
    }

    fn record_from_row(row: &SqliteRow) -> anyhow::Result<UpdateRecord> {
        let state: String = row.try_get("state")?;

        Ok(UpdateRecord {
            id: Some(row.try_get("id")?),
            crx_id: row.try_get("crx_id")?,
            name: row.try_get("name")?,
            state: state.parse::<State>().map_err(|e| anyhow::anyhow!(e))?,
            previous_version: row.try_get("previous_version")?,
            next_version: row.try_get("next_version")?,
            error_category: ErrorCategory::from_code(row.try_get("error_category")?),
            error_code: row.try_get("error_code")?,
            extra_code1: row.try_get("extra_code1")?,
            diff_error_category: ErrorCategory::from_code(row.try_get("diff_error_category")?),
            diff_error_code: row.try_get("diff_error_code")?,
            diff_update_failed: row.try_get("diff_update_failed")?,
            recorded_at: DateTime::parse_from_rfc3339(&row.try_get::<String, _>("recorded_at")?)?
                .with_timezone(&chrono::Utc),
        })
    }

    fn records_from_rows(rows: Vec<SqliteRow>) -> Vec<UpdateRecord> {
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            match Self::record_from_row(&row) {
                Ok(record) => records.push(record),
                Err(e) => {
                    error!(error = %e, "Failed to parse history record from database");
                }
            }
        }
        records
    }
}

#[async_trait]
impl History for SqliteHistory {
    async fn record(&self, record: UpdateRecord) -> anyhow::Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO update_history (crx_id, name, state, previous_version, next_version, error_category, error_code, extra_code1, diff_error_category, diff_error_code, diff_update_failed, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(&record.crx_id)
        .bind(&record.name)
        .bind(record.state.as_str())
        .bind(&record.previous_version)
        .bind(&record.next_version)
        .bind(record.error_category.code())
        .bind(record.error_code)
        .bind(record.extra_code1)
        .bind(record.diff_error_category.code())
        .bind(record.diff_error_code)
        .bind(record.diff_update_failed)
        .bind(record.recorded_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        debug!(crx_id = %record.crx_id, id, state = record.state.as_str(), "Recorded update outcome");
        Ok(id)
    }

    async fn list_recent(&self, limit: u32) -> anyhow::Result<Vec<UpdateRecord>> {
        let rows = sqlx::query("SELECT * FROM update_history ORDER BY id DESC LIMIT ?1")
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;

        Ok(Self::records_from_rows(rows))
    }

    async fn list_for(&self, crx_id: &str) -> anyhow::Result<Vec<UpdateRecord>> {
        let rows = sqlx::query("SELECT * FROM update_history WHERE crx_id = ?1 ORDER BY id DESC")
            .bind(crx_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(Self::records_from_rows(rows))
    }
}
