//! SQLite state manager

use crate::config::DatabaseConfig;
use crate::error::TrackerResult;
use crate::transfer::Transfer;

use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// State manager for SQLite persistence
pub struct StateManager {
    pool: SqlitePool,
}

impl StateManager {
    /// Open (or create) the database
    pub async fn new(config: &DatabaseConfig) -> TrackerResult<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)?.create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Create tables
    pub async fn run_migrations(&self) -> TrackerResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS transfers (
                id TEXT PRIMARY KEY,
                source_chain TEXT NOT NULL,
                destination_chain TEXT NOT NULL,
                status TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_transfers_status
            ON transfers (status)
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Database migrations complete");
        Ok(())
    }

    /// Health check
    pub async fn health_check(&self) -> TrackerResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Insert or replace a transfer
    pub async fn save_transfer(&self, transfer: &Transfer) -> TrackerResult<()> {
        let payload = serde_json::to_string(transfer)?;

        sqlx::query(
            r#"
            INSERT INTO transfers
                (id, source_chain, destination_chain, status, payload, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT (id)
            DO UPDATE SET status = ?4, payload = ?5, updated_at = ?7
            "#,
        )
        .bind(&transfer.id)
        .bind(transfer.source_chain.as_str())
        .bind(transfer.destination_chain.as_str())
        .bind(transfer.status.as_str())
        .bind(payload)
        .bind(transfer.created_at.timestamp_millis())
        .bind(transfer.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        debug!("Saved transfer {} ({})", transfer.id, transfer.status);
        Ok(())
    }

    /// All stored transfers, newest first. Unreadable rows are skipped.
    pub async fn load_transfers(&self) -> TrackerResult<Vec<Transfer>> {
        let rows = sqlx::query("SELECT id, payload FROM transfers ORDER BY created_at DESC, id")
            .fetch_all(&self.pool)
            .await?;

        let transfers = rows
            .into_iter()
            .filter_map(|row| {
                let id: String = row.get("id");
                let payload: String = row.get("payload");
                match serde_json::from_str::<Transfer>(&payload) {
                    Ok(transfer) => Some(transfer),
                    Err(e) => {
                        warn!("Skipping unreadable transfer {}: {}", id, e);
                        None
                    }
                }
            })
            .collect();

        Ok(transfers)
    }

    pub async fn delete_transfer(&self, id: &str) -> TrackerResult<bool> {
        let result = sqlx::query("DELETE FROM transfers WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Transfer counts per status
    pub async fn get_stats(&self) -> TrackerResult<TransferStats> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS count FROM transfers GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let by_status: BTreeMap<String, u64> = rows
            .into_iter()
            .map(|row| {
                let status: String = row.get("status");
                let count: i64 = row.get("count");
                (status, count as u64)
            })
            .collect();

        Ok(TransferStats {
            total: by_status.values().sum(),
            by_status,
        })
    }
}

/// Transfer statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransferStats {
    pub total: u64,
    pub by_status: BTreeMap<String, u64>,
}
