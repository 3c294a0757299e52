//! Settings: built-in defaults, an optional file and `SAMASTREAM__*`
//! environment variables, validated before use.

use crate::scraper::cache::CacheConfig;
use crate::scraper::http::{HttpConfig, RetryPolicy};
use crate::scraper::lock::LockConfig;
use crate::scraper::orchestrator::OrchestratorConfig;
use crate::scraper::types::Language;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use validator::{Validate, ValidationError};

const ENV_PREFIX: &str = "SAMASTREAM";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Failed to load settings: {0}")]
    Load(#[from] ConfigError),

    #[error("Invalid settings: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_ttl_order"))]
pub struct Settings {
    #[validate(nested)]
    pub site: SiteSettings,
    #[validate(nested)]
    pub http: HttpSettings,
    #[validate(nested)]
    pub cache: CacheSettings,
    #[validate(nested)]
    pub lock: LockSettings,
    #[validate(nested)]
    pub database: DatabaseSettings,
    pub dataset: DatasetSettings,
    #[validate(nested)]
    pub scrape: ScrapeSettings,
    pub log: LogSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SiteSettings {
    #[validate(url)]
    pub base_url: String,
    #[validate(length(min = 1))]
    pub languages: Vec<Language>,
    pub excluded_domains: Vec<String>,
}

impl Default for SiteSettings {
    fn default() -> Self {
        Self {
            base_url: "https://anime-sama.fr".to_string(),
            languages: Language::ALL.to_vec(),
            excluded_domains: vec!["vk.com".to_string(), "vkvideo.ru".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct HttpSettings {
    #[validate(range(min = 1, max = 300))]
    pub timeout_secs: u64,
    #[validate(range(min = 1, max = 10))]
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub proxy: Option<String>,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            max_attempts: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 5000,
            proxy: None,
        }
    }
}

/// Lifetimes in seconds
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CacheSettings {
    #[validate(range(min = 1))]
    pub memory_capacity: u64,
    #[validate(range(min = 1))]
    pub catalog_ttl: u64,
    #[validate(range(min = 1))]
    pub planning_ttl: u64,
    #[validate(range(min = 1))]
    pub detail_ongoing_ttl: u64,
    #[validate(range(min = 1))]
    pub detail_finished_ttl: u64,
    #[validate(range(min = 1))]
    pub episode_ongoing_ttl: u64,
    #[validate(range(min = 1))]
    pub episode_finished_ttl: u64,
    #[validate(range(min = 1))]
    pub partial_ttl: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        let defaults = CacheConfig::default();
        Self {
            memory_capacity: defaults.memory_capacity,
            catalog_ttl: defaults.catalog_ttl.as_secs(),
            planning_ttl: defaults.planning_ttl.as_secs(),
            detail_ongoing_ttl: defaults.detail_ongoing_ttl.as_secs(),
            detail_finished_ttl: defaults.detail_finished_ttl.as_secs(),
            episode_ongoing_ttl: defaults.episode_ongoing_ttl.as_secs(),
            episode_finished_ttl: defaults.episode_finished_ttl.as_secs(),
            partial_ttl: defaults.partial_ttl.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LockSettings {
    #[validate(range(min = 1))]
    pub lease_secs: u64,
    pub wait_timeout_secs: u64,
    #[validate(range(min = 10))]
    pub poll_interval_ms: u64,
    /// Zero disables the periodic purge
    pub reaper_interval_secs: u64,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            lease_secs: 300,
            wait_timeout_secs: 30,
            poll_interval_ms: 1000,
            reaper_interval_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    #[default]
    Sqlite,
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DatabaseSettings {
    pub backend: DatabaseBackend,
    pub path: PathBuf,
    pub url: Option<String>,
    #[validate(range(min = 1, max = 100))]
    pub max_connections: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            backend: DatabaseBackend::Sqlite,
            path: data_dir().join("samastream.db"),
            url: None,
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetSettings {
    pub enabled: bool,
    pub path: PathBuf,
    /// Remote copy refreshed in the background when set
    pub url: Option<String>,
    pub refresh_interval_secs: u64,
}

impl Default for DatasetSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            path: data_dir().join("dataset.json"),
            url: None,
            refresh_interval_secs: 86_400,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ScrapeSettings {
    #[validate(range(min = 1))]
    pub season_timeout_secs: u64,
    #[validate(range(min = 1, max = 32))]
    pub max_parallel_seasons: usize,
    #[validate(range(min = 1, max = 64))]
    pub max_parallel_extractions: usize,
}

impl Default for ScrapeSettings {
    fn default() -> Self {
        Self {
            season_timeout_secs: 30,
            max_parallel_seasons: 4,
            max_parallel_extractions: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
    pub json: bool,
    /// Daily rolling files are written here when set
    pub directory: Option<PathBuf>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            directory: None,
        }
    }
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("samastream")
}

fn validate_ttl_order(settings: &Settings) -> Result<(), ValidationError> {
    let cache = &settings.cache;
    if cache.detail_finished_ttl < cache.detail_ongoing_ttl
        || cache.episode_finished_ttl < cache.episode_ongoing_ttl
    {
        let mut error = ValidationError::new("ttl_order");
        error.message = Some("finished lifetimes must not be shorter than ongoing ones".into());
        return Err(error);
    }
    Ok(())
}

/// Add a scheme when missing and drop trailing slashes
pub fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    }
}

impl Settings {
    /// Defaults, then `file` (or `samastream.*` in the working directory),
    /// then the environment
    pub fn load(file: Option<&Path>) -> Result<Self, SettingsError> {
        let defaults = Config::try_from(&Self::default())?;
        let source = match file {
            Some(path) => File::from(path).required(true),
            None => File::with_name("samastream").required(false),
        };

        let mut settings: Self = Config::builder()
            .add_source(defaults)
            .add_source(source)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("site.languages")
                    .with_list_parse_key("site.excluded_domains")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.site.base_url = normalize_base_url(&settings.site.base_url);
        settings.validate()?;
        Ok(settings)
    }

    pub fn cache_config(&self) -> CacheConfig {
        let cache = &self.cache;
        CacheConfig {
            memory_capacity: cache.memory_capacity,
            catalog_ttl: Duration::from_secs(cache.catalog_ttl),
            planning_ttl: Duration::from_secs(cache.planning_ttl),
            detail_ongoing_ttl: Duration::from_secs(cache.detail_ongoing_ttl),
            detail_finished_ttl: Duration::from_secs(cache.detail_finished_ttl),
            episode_ongoing_ttl: Duration::from_secs(cache.episode_ongoing_ttl),
            episode_finished_ttl: Duration::from_secs(cache.episode_finished_ttl),
            partial_ttl: Duration::from_secs(cache.partial_ttl),
        }
    }

    pub fn lock_config(&self) -> LockConfig {
        LockConfig {
            lease_duration: Duration::from_secs(self.lock.lease_secs),
            wait_timeout: Duration::from_secs(self.lock.wait_timeout_secs),
            poll_interval: Duration::from_millis(self.lock.poll_interval_ms),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.http.max_attempts,
            base_delay: Duration::from_millis(self.http.backoff_base_ms),
            max_delay: Duration::from_millis(self.http.backoff_max_ms),
        }
    }

    pub fn http_config(&self) -> HttpConfig {
        HttpConfig {
            timeout: Duration::from_secs(self.http.timeout_secs),
            proxy: self.http.proxy.clone(),
            retry: self.retry_policy(),
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            languages: self.site.languages.clone(),
            excluded_domains: self.site.excluded_domains.clone(),
            season_timeout: Duration::from_secs(self.scrape.season_timeout_secs),
            max_parallel_seasons: self.scrape.max_parallel_seasons,
            max_parallel_extractions: self.scrape.max_parallel_extractions,
            extraction_retry: self.retry_policy(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.cache_config().partial_ttl, Duration::from_secs(300));
        assert_eq!(settings.orchestrator_config().languages.len(), 4);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[site]
base_url = "anime-sama.test/"
languages = ["vostfr", "vf"]

[cache]
detail_finished_ttl = 7200

[database]
backend = "memory"
"#
        )
        .unwrap();

        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.site.base_url, "https://anime-sama.test");
        assert_eq!(settings.site.languages, vec![Language::Vostfr, Language::Vf]);
        assert_eq!(settings.cache.detail_finished_ttl, 7200);
        assert_eq!(settings.cache.catalog_ttl, 3600);
        assert_eq!(settings.database.backend, DatabaseBackend::Memory);
    }

    #[test]
    fn test_finished_shorter_than_ongoing_is_rejected() {
        let mut settings = Settings::default();
        settings.cache.episode_finished_ttl = 10;
        settings.cache.episode_ongoing_ttl = 20;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(normalize_base_url("anime-sama.fr/"), "https://anime-sama.fr");
        assert_eq!(normalize_base_url("http://local.test//"), "http://local.test");
    }
}
