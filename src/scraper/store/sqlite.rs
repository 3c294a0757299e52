use super::{LeaseRecord, MIGRATOR, PersistentStore, PurgeReport, StoreResult, StoredEntry};
use crate::scraper::clock::{from_millis, to_millis};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// SQLite-backed store, the default for a single host
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a database file and apply migrations
    pub async fn open(path: &Path, max_connections: u32) -> StoreResult<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        info!("Opened SQLite cache at {}", path.display());
        Self::with_pool(pool).await
    }

    /// Private in-memory database, kept alive by a single pinned connection
    pub async fn in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    pub async fn with_pool(pool: SqlitePool) -> StoreResult<Self> {
        MIGRATOR.run(&pool).await?;
        Ok(Self { pool })
    }

    fn entry_from_row(row: &SqliteRow) -> StoreResult<StoredEntry> {
        Ok(StoredEntry {
            key: row.try_get("cache_key")?,
            payload: row.try_get("payload")?,
            ttl_class: row.try_get("ttl_class")?,
            written_at: from_millis(row.try_get("written_at")?),
            expires_at: from_millis(row.try_get("expires_at")?),
        })
    }
}

#[async_trait]
impl PersistentStore for SqliteStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn get_entry(&self, key: &str) -> StoreResult<Option<StoredEntry>> {
        let row = sqlx::query(
            "SELECT cache_key, payload, ttl_class, written_at, expires_at \
             FROM cache_entries WHERE cache_key = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::entry_from_row).transpose()
    }

    async fn put_entry(&self, entry: &StoredEntry) -> StoreResult<bool> {
        let result = sqlx::query(
            "INSERT INTO cache_entries (cache_key, payload, ttl_class, written_at, expires_at) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT(cache_key) DO UPDATE SET \
                 payload = excluded.payload, \
                 ttl_class = excluded.ttl_class, \
                 written_at = excluded.written_at, \
                 expires_at = excluded.expires_at \
             WHERE excluded.written_at >= cache_entries.written_at",
        )
        .bind(&entry.key)
        .bind(&entry.payload)
        .bind(&entry.ttl_class)
        .bind(to_millis(entry.written_at))
        .bind(to_millis(entry.expires_at))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_entry(&self, key: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM cache_entries WHERE cache_key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_expired_entry(&self, key: &str, now: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query("DELETE FROM cache_entries WHERE cache_key = ? AND expires_at <= ?")
            .bind(key)
            .bind(to_millis(now))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn try_insert_lease(&self, lease: &LeaseRecord, now: DateTime<Utc>) -> StoreResult<bool> {
        let result = sqlx::query(
            "INSERT INTO scrape_leases (lease_key, holder, acquired_at, expires_at) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT(lease_key) DO UPDATE SET \
                 holder = excluded.holder, \
                 acquired_at = excluded.acquired_at, \
                 expires_at = excluded.expires_at \
             WHERE scrape_leases.expires_at <= ?",
        )
        .bind(&lease.key)
        .bind(&lease.holder)
        .bind(to_millis(lease.acquired_at))
        .bind(to_millis(lease.expires_at))
        .bind(to_millis(now))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_lease(&self, key: &str) -> StoreResult<Option<LeaseRecord>> {
        let row = sqlx::query(
            "SELECT lease_key, holder, acquired_at, expires_at FROM scrape_leases WHERE lease_key = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(LeaseRecord {
            key: row.try_get("lease_key")?,
            holder: row.try_get("holder")?,
            acquired_at: from_millis(row.try_get("acquired_at")?),
            expires_at: from_millis(row.try_get("expires_at")?),
        }))
    }

    async fn delete_lease(&self, key: &str, holder: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM scrape_leases WHERE lease_key = ? AND holder = ?")
            .bind(key)
            .bind(holder)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_expired_lease(&self, key: &str, now: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query("DELETE FROM scrape_leases WHERE lease_key = ? AND expires_at <= ?")
            .bind(key)
            .bind(to_millis(now))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<PurgeReport> {
        let now = to_millis(now);
        let entries = sqlx::query("DELETE FROM cache_entries WHERE expires_at <= ?")
            .bind(now)
            .execute(&self.pool)
            .await?
            .rows_affected();
        let leases = sqlx::query("DELETE FROM scrape_leases WHERE expires_at <= ?")
            .bind(now)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(PurgeReport { entries, leases })
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
