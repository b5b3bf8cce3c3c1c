//! SQLite store for parsed messages and per-account watermarks.
//!
//! This module is split into:
//! - `mod.rs` - Cache struct, connection pool, watermark operations
//! - `schema.rs` - Database schema initialization
//! - `messages.rs` - Message record storage
//! - `sink.rs` - `MessageSink` implementation feeding the cache

mod messages;
mod schema;
mod sink;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::sync::SyncWatermark;

/// Connection pool size. One writer per account session plus the odd reader.
const POOL_SIZE: u32 = 8;

#[derive(Clone)]
pub struct Cache {
    pool: SqlitePool,
}

impl Cache {
    #[cfg(test)]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn open(path: &Path) -> Result<Self> {
        let db_url = format!("sqlite:{}?mode=rwc", path.display());

        let options = SqliteConnectOptions::from_str(&db_url)?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(POOL_SIZE)
            .connect_with(options)
            .await
            .context("Failed to create connection pool")?;

        schema::init_schema(&pool).await?;

        Ok(Self { pool })
    }

    #[cfg(test)]
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

        // A single connection, otherwise every connection gets its own empty database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("Failed to create in-memory connection pool")?;

        schema::init_schema(&pool).await?;

        Ok(Self { pool })
    }

    //
    // Watermark Operations
    //

    pub async fn load_watermark(&self, account_id: &str) -> Result<Option<SyncWatermark>> {
        let row = sqlx::query("SELECT uid_validity, last_seen FROM watermarks WHERE account_id = ?")
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| {
            SyncWatermark::new(account_id).with_last_seen(
                row.get::<Option<i64>, _>("uid_validity").map(|v| v as u32),
                row.get::<i64, _>("last_seen") as u32,
            )
        }))
    }

    /// Overwrite the stored watermark, including moving it backwards after
    /// a UIDVALIDITY change.
    pub async fn save_watermark(&self, watermark: &SyncWatermark) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO watermarks (account_id, uid_validity, last_seen, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(account_id) DO UPDATE SET
                uid_validity = excluded.uid_validity,
                last_seen = excluded.last_seen,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&watermark.account_id)
        .bind(watermark.uid_validity.map(|v| v as i64))
        .bind(watermark.last_seen as i64)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
