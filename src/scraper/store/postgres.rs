use super::{LeaseRecord, MIGRATOR, PersistentStore, PurgeReport, StoreResult, StoredEntry};
use crate::scraper::clock::{from_millis, to_millis};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use std::time::Duration;
use tracing::info;

/// PostgreSQL-backed store for deployments running several processes
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(10))
            .connect(url)
            .await?;

        info!("Connected to PostgreSQL cache");
        Self::with_pool(pool).await
    }

    pub async fn with_pool(pool: PgPool) -> StoreResult<Self> {
        MIGRATOR.run(&pool).await?;
        Ok(Self { pool })
    }

    fn entry_from_row(row: &PgRow) -> StoreResult<StoredEntry> {
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
impl PersistentStore for PostgresStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn get_entry(&self, key: &str) -> StoreResult<Option<StoredEntry>> {
        let row = sqlx::query(
            "SELECT cache_key, payload, ttl_class, written_at, expires_at \
             FROM cache_entries WHERE cache_key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::entry_from_row).transpose()
    }

    async fn put_entry(&self, entry: &StoredEntry) -> StoreResult<bool> {
        let result = sqlx::query(
            "INSERT INTO cache_entries (cache_key, payload, ttl_class, written_at, expires_at) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (cache_key) DO UPDATE SET \
                 payload = EXCLUDED.payload, \
                 ttl_class = EXCLUDED.ttl_class, \
                 written_at = EXCLUDED.written_at, \
                 expires_at = EXCLUDED.expires_at \
             WHERE EXCLUDED.written_at >= cache_entries.written_at",
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
        sqlx::query("DELETE FROM cache_entries WHERE cache_key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_expired_entry(&self, key: &str, now: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query("DELETE FROM cache_entries WHERE cache_key = $1 AND expires_at <= $2")
            .bind(key)
            .bind(to_millis(now))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn try_insert_lease(&self, lease: &LeaseRecord, now: DateTime<Utc>) -> StoreResult<bool> {
        let result = sqlx::query(
            "INSERT INTO scrape_leases (lease_key, holder, acquired_at, expires_at) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (lease_key) DO UPDATE SET \
                 holder = EXCLUDED.holder, \
                 acquired_at = EXCLUDED.acquired_at, \
                 expires_at = EXCLUDED.expires_at \
             WHERE scrape_leases.expires_at <= $5",
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
            "SELECT lease_key, holder, acquired_at, expires_at FROM scrape_leases WHERE lease_key = $1",
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
        let result = sqlx::query("DELETE FROM scrape_leases WHERE lease_key = $1 AND holder = $2")
            .bind(key)
            .bind(holder)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_expired_lease(&self, key: &str, now: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query("DELETE FROM scrape_leases WHERE lease_key = $1 AND expires_at <= $2")
            .bind(key)
            .bind(to_millis(now))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<PurgeReport> {
        let now = to_millis(now);
        let entries = sqlx::query("DELETE FROM cache_entries WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?
            .rows_affected();
        let leases = sqlx::query("DELETE FROM scrape_leases WHERE expires_at <= $1")
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
