//! Two-tier cache: a moka tier in front of the shared [`PersistentStore`].
//!
//! Expiry is checked against the injected [`Clock`] on every read, the moka
//! lifetime only bounds memory. Store failures are logged and the cache
//! keeps serving from the in-process tier.

use crate::scraper::clock::{Clock, add_duration};
use crate::scraper::store::{PersistentStore, StoreError, StoredEntry};
use crate::scraper::types::{AnimeStatus, CatalogQuery, SeasonNumber};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use moka::future::Cache;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Lifetime class of a cached value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TtlClass {
    Catalog,
    Planning,
    Detail(AnimeStatus),
    Episode(AnimeStatus),
    /// Results assembled with failed parts
    Partial,
}

impl TtlClass {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Catalog => "catalog",
            Self::Planning => "planning",
            Self::Detail(AnimeStatus::Ongoing) => "detail:ongoing",
            Self::Detail(AnimeStatus::Finished) => "detail:finished",
            Self::Episode(AnimeStatus::Ongoing) => "episode:ongoing",
            Self::Episode(AnimeStatus::Finished) => "episode:finished",
            Self::Partial => "partial",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Some(match label {
            "catalog" => Self::Catalog,
            "planning" => Self::Planning,
            "detail:ongoing" => Self::Detail(AnimeStatus::Ongoing),
            "detail:finished" => Self::Detail(AnimeStatus::Finished),
            "episode:ongoing" => Self::Episode(AnimeStatus::Ongoing),
            "episode:finished" => Self::Episode(AnimeStatus::Finished),
            "partial" => Self::Partial,
            _ => return None,
        })
    }
}

/// Cache key layout
pub struct CacheKey;

impl CacheKey {
    pub fn homepage() -> String {
        "as:homepage".to_string()
    }

    pub fn planning() -> String {
        "as:planning".to_string()
    }

    pub fn catalog(query: &CatalogQuery) -> String {
        let mut key = match query.search_text() {
            Some(text) => format!("as:search:{}", text.to_lowercase()),
            None => Self::homepage(),
        };
        if let Some(language) = query.language {
            key.push_str(&format!(":lang={}", language.path()));
        }
        if let Some(genre) = query.genre.as_deref() {
            key.push_str(&format!(":genre={}", genre.trim().to_lowercase()));
        }
        key
    }

    pub fn detail(slug: &str) -> String {
        format!("as:{slug}")
    }

    pub fn episode(slug: &str, season: SeasonNumber, episode: u32) -> String {
        format!("as:{slug}:s{season}e{episode}")
    }

    pub fn lock(key: &str) -> String {
        format!("lock:{key}")
    }

    /// Statistics bucket for a key
    pub fn category(key: &str) -> &'static str {
        let Some(rest) = key.strip_prefix("as:") else {
            return "other";
        };
        if rest == "homepage" || rest.starts_with("homepage:") || rest.starts_with("search:") {
            "catalog"
        } else if rest == "planning" {
            "planning"
        } else if rest.contains(':') {
            "episode"
        } else {
            "detail"
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries held in process
    pub memory_capacity: u64,
    pub catalog_ttl: Duration,
    pub planning_ttl: Duration,
    pub detail_ongoing_ttl: Duration,
    pub detail_finished_ttl: Duration,
    pub episode_ongoing_ttl: Duration,
    pub episode_finished_ttl: Duration,
    pub partial_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_capacity: 2000,
            catalog_ttl: Duration::from_secs(3600),             // 1 hour
            planning_ttl: Duration::from_secs(3600),            // 1 hour
            detail_ongoing_ttl: Duration::from_secs(3600),      // 1 hour
            detail_finished_ttl: Duration::from_secs(604_800),  // 7 days
            episode_ongoing_ttl: Duration::from_secs(3600),     // 1 hour
            episode_finished_ttl: Duration::from_secs(86_400),  // 24 hours
            partial_ttl: Duration::from_secs(300),              // 5 minutes
        }
    }
}

impl CacheConfig {
    pub const fn ttl_for(&self, class: TtlClass) -> Duration {
        match class {
            TtlClass::Catalog => self.catalog_ttl,
            TtlClass::Planning => self.planning_ttl,
            TtlClass::Detail(AnimeStatus::Ongoing) => self.detail_ongoing_ttl,
            TtlClass::Detail(AnimeStatus::Finished) => self.detail_finished_ttl,
            TtlClass::Episode(AnimeStatus::Ongoing) => self.episode_ongoing_ttl,
            TtlClass::Episode(AnimeStatus::Finished) => self.episode_finished_ttl,
            TtlClass::Partial => self.partial_ttl,
        }
    }

    fn longest_ttl(&self) -> Duration {
        [
            self.catalog_ttl,
            self.planning_ttl,
            self.detail_ongoing_ttl,
            self.detail_finished_ttl,
            self.episode_ongoing_ttl,
            self.episode_finished_ttl,
            self.partial_ttl,
        ]
        .into_iter()
        .max()
        .unwrap_or(Duration::from_secs(3600))
    }
}

/// Cached value with its lifetime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub payload: String,
    pub ttl_class: TtlClass,
    pub written_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn ttl(&self) -> Duration {
        (self.expires_at - self.written_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    fn from_stored(stored: StoredEntry) -> Option<Self> {
        Some(Self {
            ttl_class: TtlClass::from_label(&stored.ttl_class)?,
            payload: stored.payload,
            written_at: stored.written_at,
            expires_at: stored.expires_at,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HitCounter {
    pub hits: u64,
    pub misses: u64,
}

/// Cache statistics
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub memory_entries: u64,
    pub by_category: BTreeMap<&'static str, HitCounter>,
}

/// Two-tier cache with adaptive lifetimes
#[derive(Clone)]
pub struct CacheStore {
    memory: Cache<String, Arc<CacheEntry>>,
    store: Arc<dyn PersistentStore>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
    counters: Arc<DashMap<&'static str, HitCounter>>,
}

impl CacheStore {
    pub fn new(config: CacheConfig, store: Arc<dyn PersistentStore>, clock: Arc<dyn Clock>) -> Self {
        let memory = Cache::builder()
            .max_capacity(config.memory_capacity)
            .time_to_live(config.longest_ttl())
            .build();

        Self {
            memory,
            store,
            clock,
            config,
            counters: Arc::new(DashMap::new()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Look up a live entry, local tier first
    pub async fn entry(&self, key: &str) -> Option<CacheEntry> {
        let now = self.clock.now();

        if let Some(entry) = self.memory.get(key).await {
            if !entry.is_expired(now) {
                return Some((*entry).clone());
            }
            self.memory.invalidate(key).await;
        }

        match self.store.get_entry(key).await {
            Ok(Some(stored)) if !stored.is_expired(now) => {
                let class = stored.ttl_class.clone();
                let Some(entry) = CacheEntry::from_stored(stored) else {
                    warn!("Unknown TTL class '{}' for {}, ignoring entry", class, key);
                    return None;
                };
                self.memory
                    .insert(key.to_string(), Arc::new(entry.clone()))
                    .await;
                Some(entry)
            }
            Ok(Some(_)) => {
                if let Err(e) = self.store.delete_expired_entry(key, now).await {
                    self.report_store_error("reap", key, &e);
                }
                None
            }
            Ok(None) => None,
            Err(e) => {
                self.report_store_error("read", key, &e);
                None
            }
        }
    }

    /// Get the cached payload for `key`
    pub async fn get(&self, key: &str) -> Option<String> {
        let found = self.entry(key).await.map(|entry| entry.payload);
        self.record(key, found.is_some());
        if found.is_some() {
            debug!("Cache hit for {}", key);
        }
        found
    }

    /// Store `payload` in both tiers, returning the lifetime applied
    pub async fn set(&self, key: &str, payload: String, class: TtlClass) -> Duration {
        let ttl = self.config.ttl_for(class);
        let written_at = self.clock.now();
        let expires_at = add_duration(written_at, ttl);

        let stored = StoredEntry {
            key: key.to_string(),
            payload: payload.clone(),
            ttl_class: class.label().to_string(),
            written_at,
            expires_at,
        };

        self.memory
            .insert(
                key.to_string(),
                Arc::new(CacheEntry {
                    payload,
                    ttl_class: class,
                    written_at,
                    expires_at,
                }),
            )
            .await;

        match self.store.put_entry(&stored).await {
            Ok(true) => debug!("Cached {} for {:?} ({})", key, ttl, class.label()),
            Ok(false) => {
                // a later write won, read it back from the store next time
                debug!("Newer entry already stored for {}", key);
                self.memory.invalidate(key).await;
            }
            Err(e) => self.report_store_error("write", key, &e),
        }

        ttl
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let payload = self.get(key).await?;
        match serde_json::from_str(&payload) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Dropping undecodable cache entry {}: {}", key, e);
                self.invalidate(key).await;
                None
            }
        }
    }

    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, class: TtlClass) -> Option<Duration> {
        match serde_json::to_string(value) {
            Ok(payload) => Some(self.set(key, payload, class).await),
            Err(e) => {
                error!("Failed to encode cache entry {}: {}", key, e);
                None
            }
        }
    }

    pub async fn invalidate(&self, key: &str) {
        self.memory.invalidate(key).await;
        if let Err(e) = self.store.delete_entry(key).await {
            self.report_store_error("delete", key, &e);
        }
    }

    /// Drop every in-process entry
    pub fn clear_local(&self) {
        self.memory.invalidate_all();
    }

    /// Get cache statistics
    pub async fn stats(&self) -> CacheStats {
        self.memory.run_pending_tasks().await;
        CacheStats {
            memory_entries: self.memory.entry_count(),
            by_category: self
                .counters
                .iter()
                .map(|counter| (*counter.key(), *counter.value()))
                .collect(),
        }
    }

    fn record(&self, key: &str, hit: bool) {
        let mut counter = self.counters.entry(CacheKey::category(key)).or_default();
        if hit {
            counter.hits += 1;
        } else {
            counter.misses += 1;
        }
    }

    fn report_store_error(&self, operation: &str, key: &str, err: &StoreError) {
        error!(
            backend = self.store.backend(),
            "Persistent cache {} failed for {}, serving from memory only: {}",
            operation,
            key,
            err
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scraper::clock::ManualClock;
    use crate::scraper::store::{LeaseRecord, MemoryStore, PurgeReport, StoreResult};
    use crate::scraper::types::Language;
    use async_trait::async_trait;

    fn cache_with(store: Arc<dyn PersistentStore>) -> (CacheStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let cache = CacheStore::new(CacheConfig::default(), store, clock.clone());
        (cache, clock)
    }

    #[tokio::test]
    async fn test_round_trip_then_expiry() {
        let (cache, clock) = cache_with(Arc::new(MemoryStore::new()));
        cache
            .set("as:homepage", "[1,2]".to_string(), TtlClass::Catalog)
            .await;
        assert_eq!(cache.get("as:homepage").await.as_deref(), Some("[1,2]"));

        clock.advance(Duration::from_secs(3601));
        assert!(cache.get("as:homepage").await.is_none());
    }

    #[tokio::test]
    async fn test_persistent_tier_serves_a_fresh_process() {
        let store: Arc<dyn PersistentStore> = Arc::new(MemoryStore::new());
        let (first, clock) = cache_with(store.clone());
        first
            .set_json("as:frieren", &vec!["a", "b"], TtlClass::Detail(AnimeStatus::Finished))
            .await;

        let second = CacheStore::new(CacheConfig::default(), store, clock);
        let value: Vec<String> = second.get_json("as:frieren").await.unwrap();
        assert_eq!(value, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_adaptive_ttl_follows_status() {
        let (cache, _) = cache_with(Arc::new(MemoryStore::new()));
        let config = cache.config().clone();

        let ongoing = cache
            .set("as:a", "{}".into(), TtlClass::Detail(AnimeStatus::Ongoing))
            .await;
        let finished = cache
            .set("as:b", "{}".into(), TtlClass::Detail(AnimeStatus::Finished))
            .await;

        assert!(finished >= ongoing);
        assert_eq!(
            finished.as_secs() / ongoing.as_secs(),
            config.detail_finished_ttl.as_secs() / config.detail_ongoing_ttl.as_secs()
        );
        assert_eq!(cache.entry("as:b").await.unwrap().ttl(), finished);
    }

    #[tokio::test]
    async fn test_stats_count_hits_and_misses_per_category() {
        let (cache, _) = cache_with(Arc::new(MemoryStore::new()));
        assert!(cache.get("as:planning").await.is_none());
        cache.set("as:planning", "[]".into(), TtlClass::Planning).await;
        assert!(cache.get("as:planning").await.is_some());

        let stats = cache.stats().await;
        assert_eq!(
            stats.by_category["planning"],
            HitCounter { hits: 1, misses: 1 }
        );
        assert_eq!(stats.memory_entries, 1);
    }

    /// Store that fails every call
    struct BrokenStore;

    #[async_trait]
    impl PersistentStore for BrokenStore {
        fn backend(&self) -> &'static str {
            "broken"
        }
        async fn get_entry(&self, _: &str) -> StoreResult<Option<StoredEntry>> {
            Err(sqlx::Error::PoolClosed.into())
        }
        async fn put_entry(&self, _: &StoredEntry) -> StoreResult<bool> {
            Err(sqlx::Error::PoolClosed.into())
        }
        async fn delete_entry(&self, _: &str) -> StoreResult<()> {
            Err(sqlx::Error::PoolClosed.into())
        }
        async fn delete_expired_entry(&self, _: &str, _: DateTime<Utc>) -> StoreResult<()> {
            Err(sqlx::Error::PoolClosed.into())
        }
        async fn try_insert_lease(&self, _: &LeaseRecord, _: DateTime<Utc>) -> StoreResult<bool> {
            Err(sqlx::Error::PoolClosed.into())
        }
        async fn get_lease(&self, _: &str) -> StoreResult<Option<LeaseRecord>> {
            Err(sqlx::Error::PoolClosed.into())
        }
        async fn delete_lease(&self, _: &str, _: &str) -> StoreResult<bool> {
            Err(sqlx::Error::PoolClosed.into())
        }
        async fn delete_expired_lease(&self, _: &str, _: DateTime<Utc>) -> StoreResult<()> {
            Err(sqlx::Error::PoolClosed.into())
        }
        async fn purge_expired(&self, _: DateTime<Utc>) -> StoreResult<PurgeReport> {
            Err(sqlx::Error::PoolClosed.into())
        }
        async fn close(&self) {}
    }

    #[tokio::test]
    async fn test_unreachable_store_degrades_to_memory() {
        let (cache, _) = cache_with(Arc::new(BrokenStore));
        assert!(cache.get("as:x").await.is_none());
        cache.set("as:x", "1".into(), TtlClass::Catalog).await;
        assert_eq!(cache.get("as:x").await.as_deref(), Some("1"));
    }

    #[test]
    fn test_key_layout() {
        assert_eq!(
            CacheKey::episode("one-piece", SeasonNumber::sub(2, 2), 5),
            "as:one-piece:s2-2e5"
        );
        assert_eq!(CacheKey::lock("as:one-piece"), "lock:as:one-piece");
        let query = CatalogQuery::search("  Frieren ").with_language(Some(Language::Vf));
        assert_eq!(CacheKey::catalog(&query), "as:search:frieren:lang=vf");
        assert_eq!(CacheKey::catalog(&CatalogQuery::homepage()), "as:homepage");
        assert_eq!(CacheKey::category("as:search:x"), "catalog");
        assert_eq!(CacheKey::category("as:one-piece:s1e1"), "episode");
        assert_eq!(CacheKey::category("as:one-piece"), "detail");
    }

    #[test]
    fn test_ttl_class_labels_round_trip() {
        for class in [
            TtlClass::Catalog,
            TtlClass::Planning,
            TtlClass::Detail(AnimeStatus::Finished),
            TtlClass::Episode(AnimeStatus::Ongoing),
            TtlClass::Partial,
        ] {
            assert_eq!(TtlClass::from_label(class.label()), Some(class));
        }
    }
}
