//! Persistent tier shared across processes: cached payloads and scrape leases.

mod memory;
mod postgres;
mod sqlite;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;

use crate::scraper::clock::Clock;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Schema shared by the SQLite and PostgreSQL backends
pub(crate) static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Cached payload as persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub key: String,
    pub payload: String,
    pub ttl_class: String,
    pub written_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl StoredEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Exclusive claim on a scrape
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseRecord {
    pub key: String,
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl LeaseRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub entries: u64,
    pub leases: u64,
}

/// Backend for the persistent cache tier and the lease table
#[async_trait]
pub trait PersistentStore: Send + Sync {
    fn backend(&self) -> &'static str;

    async fn get_entry(&self, key: &str) -> StoreResult<Option<StoredEntry>>;

    /// Upsert unless the stored row was written later. Returns whether the
    /// row now holds `entry`.
    async fn put_entry(&self, entry: &StoredEntry) -> StoreResult<bool>;

    async fn delete_entry(&self, key: &str) -> StoreResult<()>;

    /// Delete `key` only if it expired at `now`
    async fn delete_expired_entry(&self, key: &str, now: DateTime<Utc>) -> StoreResult<()>;

    /// Insert a lease, taking over an expired one. Returns `true` when
    /// `lease` is now the holder.
    async fn try_insert_lease(&self, lease: &LeaseRecord, now: DateTime<Utc>) -> StoreResult<bool>;

    async fn get_lease(&self, key: &str) -> StoreResult<Option<LeaseRecord>>;

    /// Delete the lease if `holder` still owns it
    async fn delete_lease(&self, key: &str, holder: &str) -> StoreResult<bool>;

    async fn delete_expired_lease(&self, key: &str, now: DateTime<Utc>) -> StoreResult<()>;

    async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<PurgeReport>;

    async fn close(&self);
}

/// Periodically drop expired entries and leases
pub fn spawn_reaper(
    store: Arc<dyn PersistentStore>,
    clock: Arc<dyn Clock>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // first tick fires immediately
        interval.tick().await;

        loop {
            interval.tick().await;
            match store.purge_expired(clock.now()).await {
                Ok(report) if report.entries + report.leases > 0 => info!(
                    "Purged {} expired entries and {} expired leases from {}",
                    report.entries,
                    report.leases,
                    store.backend()
                ),
                Ok(_) => debug!("Nothing to purge in {}", store.backend()),
                Err(e) => error!("Failed to purge {}: {}", store.backend(), e),
            }
        }
    })
}
