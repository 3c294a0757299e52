pub mod cache;
pub mod clock;
pub mod dataset;
pub mod http;
pub mod lock;
pub mod orchestrator;
pub mod parser;
pub mod provider;
pub mod season;
pub mod site;
pub mod store;
pub mod types;

#[cfg(test)]
mod tests;

pub use cache::{CacheConfig, CacheKey, CacheStats, CacheStore, TtlClass};
pub use clock::{Clock, ManualClock, SystemClock};
pub use dataset::DatasetIndex;
pub use http::{FetchError, Fetcher, HttpFetcher, RetryPolicy};
pub use lock::{Acquisition, Lease, LockConfig, ScrapeLock, WaitOutcome};
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use provider::{ExtractorRegistry, StreamExtractor};
pub use season::SeasonResolver;
pub use site::SiteClient;
pub use store::{MemoryStore, PersistentStore, PostgresStore, SqliteStore, StoreError};

use crate::config::{DatabaseBackend, Settings};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

/// Scraper result type
pub type Result<T> = std::result::Result<T, ScraperError>;

/// Scraper error types
#[derive(Debug, thiserror::Error)]
pub enum ScraperError {
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Season unavailable: {0}")]
    SeasonUnavailable(String),

    #[error("Timed out waiting for lock {0}")]
    LockTimeout(String),

    #[error("Persistent store unavailable: {0}")]
    CacheUnavailable(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything a running instance needs, wired from settings
pub struct Pipeline {
    pub orchestrator: Arc<Orchestrator>,
    pub store: Arc<dyn PersistentStore>,
    pub clock: Arc<dyn Clock>,
    tasks: Vec<JoinHandle<()>>,
}

impl Pipeline {
    /// Stop background tasks and close the store
    pub async fn shutdown(self) {
        for task in &self.tasks {
            task.abort();
        }
        self.store.close().await;
        info!("Pipeline shut down");
    }
}

/// Open the configured persistent backend
pub async fn open_store(settings: &Settings) -> Result<Arc<dyn PersistentStore>> {
    let database = &settings.database;
    let store: Arc<dyn PersistentStore> = match database.backend {
        DatabaseBackend::Sqlite => {
            Arc::new(SqliteStore::open(&database.path, database.max_connections).await?)
        }
        DatabaseBackend::Postgres => {
            let url = database.url.as_deref().ok_or_else(|| {
                ScraperError::Config("database.url is required for the postgres backend".to_string())
            })?;
            Arc::new(PostgresStore::connect(url, database.max_connections).await?)
        }
        DatabaseBackend::Memory => Arc::new(MemoryStore::new()),
    };
    info!("Using {} persistent store", store.backend());
    Ok(store)
}

/// Build the store, cache, lock, extractors and orchestrator from settings
pub async fn build_pipeline(settings: &Settings) -> Result<Pipeline> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = open_store(settings).await?;
    let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(&settings.http_config())?);

    let cache = Arc::new(CacheStore::new(
        settings.cache_config(),
        store.clone(),
        clock.clone(),
    ));
    let lock = ScrapeLock::new(store.clone(), clock.clone(), settings.lock_config());
    let site = SiteClient::new(fetcher.clone(), &settings.site.base_url)?;
    let registry = Arc::new(ExtractorRegistry::with_default_providers(fetcher.clone()));

    let mut tasks = Vec::new();
    if settings.lock.reaper_interval_secs > 0 {
        tasks.push(store::spawn_reaper(
            store.clone(),
            clock.clone(),
            Duration::from_secs(settings.lock.reaper_interval_secs),
        ));
    }

    let mut orchestrator = Orchestrator::new(site, registry, cache, lock, settings.orchestrator_config());
    if settings.dataset.enabled {
        let dataset = Arc::new(DatasetIndex::load(&settings.dataset.path).await?);
        if let Some(url) = &settings.dataset.url {
            tasks.push(dataset::spawn_refresher(
                dataset.clone(),
                fetcher,
                url.clone(),
                Some(settings.dataset.path.clone()),
                Duration::from_secs(settings.dataset.refresh_interval_secs.max(60)),
            ));
        }
        orchestrator = orchestrator.with_dataset(dataset);
    }

    Ok(Pipeline {
        orchestrator: Arc::new(orchestrator),
        store,
        clock,
        tasks,
    })
}
