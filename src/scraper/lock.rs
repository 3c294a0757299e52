//! Lease-based scrape lock.
//!
//! A lease is a row in the persistent store keyed by resource. It is taken
//! with an atomic conditional insert, released by its holder only, and
//! expires on its own if the holder crashes.

use crate::scraper::clock::{Clock, add_duration};
use crate::scraper::store::{LeaseRecord, PersistentStore, StoreResult};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// Lock timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockConfig {
    /// Lifetime of a lease, bounds how long a crashed holder blocks others
    pub lease_duration: Duration,
    /// How long a waiter blocks before scraping anyway
    pub wait_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lease_duration: Duration::from_secs(300),
            wait_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Held lease, needed to release it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub key: String,
    pub token: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquisition {
    Acquired(Lease),
    /// Someone else holds a live lease
    WouldBlock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Cleared,
    TimedOut,
}

#[derive(Clone)]
pub struct ScrapeLock {
    store: Arc<dyn PersistentStore>,
    clock: Arc<dyn Clock>,
    config: LockConfig,
}

impl ScrapeLock {
    pub fn new(store: Arc<dyn PersistentStore>, clock: Arc<dyn Clock>, config: LockConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    pub const fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Try once to take the lease on `key`
    pub async fn acquire(&self, key: &str, lease: Duration) -> StoreResult<Acquisition> {
        let now = self.clock.now();
        let token = Uuid::new_v4();
        let record = LeaseRecord {
            key: key.to_string(),
            holder: token.to_string(),
            acquired_at: now,
            expires_at: add_duration(now, lease),
        };

        if self.store.try_insert_lease(&record, now).await? {
            debug!("Acquired lease {} ({})", key, token);
            Ok(Acquisition::Acquired(Lease {
                key: record.key,
                token,
                expires_at: record.expires_at,
            }))
        } else {
            debug!("Lease {} is held elsewhere", key);
            Ok(Acquisition::WouldBlock)
        }
    }

    /// Release a lease. Returns `false` if it had already expired and been
    /// taken over or reaped.
    pub async fn release(&self, lease: &Lease) -> StoreResult<bool> {
        let released = self
            .store
            .delete_lease(&lease.key, &lease.token.to_string())
            .await?;
        if !released {
            warn!("Lease {} was no longer held by {}", lease.key, lease.token);
        }
        Ok(released)
    }

    /// Whether a live lease exists on `key`. Expired leases are reaped.
    pub async fn is_held(&self, key: &str) -> StoreResult<bool> {
        let now = self.clock.now();
        match self.store.get_lease(key).await? {
            Some(lease) if lease.is_expired(now) => {
                debug!("Reaping expired lease {} held by {}", key, lease.holder);
                self.store.delete_expired_lease(key, now).await?;
                Ok(false)
            }
            Some(_) => Ok(true),
            None => Ok(false),
        }
    }

    /// Poll until the lease on `key` is gone or `timeout` elapses
    pub async fn wait_for(&self, key: &str, timeout: Duration) -> StoreResult<WaitOutcome> {
        let deadline = Instant::now() + timeout;

        loop {
            if !self.is_held(key).await? {
                return Ok(WaitOutcome::Cleared);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(WaitOutcome::TimedOut);
            }
            tokio::time::sleep(self.config.poll_interval.min(deadline - now)).await;
        }
    }
}
