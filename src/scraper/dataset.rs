//! Pre-scraped embed dataset merged into stream resolution.
//!
//! The dataset is a JSON document listing known embed URLs per anime,
//! season and episode. It is loaded from disk at startup and may be
//! refreshed from a remote URL in the background.

use crate::scraper::http::Fetcher;
use crate::scraper::types::{CatalogEntry, EmbedRef, Language, SeasonNumber};
use crate::scraper::{Result, ScraperError};
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, Deserialize)]
struct DatasetFile {
    #[serde(default)]
    anime: Vec<DatasetAnime>,
}

#[derive(Debug, Clone, Deserialize)]
struct DatasetAnime {
    slug: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    genres: Vec<String>,
    #[serde(default)]
    cover: Option<String>,
    #[serde(default)]
    streams: Vec<DatasetStream>,
}

/// Catalog fields the dataset knows for an anime
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatasetMetadata {
    pub title: Option<String>,
    pub genres: Vec<String>,
    pub cover: Option<String>,
}

impl DatasetMetadata {
    /// Fill the fields landing-page parsing left empty
    pub fn fill(&self, entry: &mut CatalogEntry) {
        if entry.title.trim().is_empty()
            && let Some(title) = &self.title
        {
            entry.title = title.clone();
        }
        if entry.genres.is_empty() {
            entry.genres = self.genres.iter().cloned().collect();
        }
        if entry.cover.is_none() {
            entry.cover = self.cover.clone();
        }
    }
}

#[derive(Debug, Default)]
struct AnimeRecord {
    metadata: DatasetMetadata,
    episodes: HashMap<(u32, u32), Vec<EmbedRef>>,
}

#[derive(Debug, Clone, Deserialize)]
struct DatasetStream {
    season: u32,
    episode: u32,
    language: String,
    #[serde(default)]
    urls: Vec<String>,
}

/// In-memory index of the dataset, keyed by slug then (season, episode)
#[derive(Debug, Default)]
pub struct DatasetIndex {
    anime: RwLock<HashMap<String, AnimeRecord>>,
}

impl DatasetIndex {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let index = Self::empty();
        index.replace_from_json(json)?;
        Ok(index)
    }

    /// Load from `path`, an absent file gives an empty index
    pub async fn load(path: &Path) -> Result<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(json) => {
                let index = Self::from_json(&json)?;
                info!("Loaded dataset with {} anime from {}", index.len(), path.display());
                Ok(index)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No dataset at {}, starting empty", path.display());
                Ok(Self::empty())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Swap the whole index for the content of `json`
    pub fn replace_from_json(&self, json: &str) -> Result<()> {
        let file: DatasetFile = serde_json::from_str(json)
            .map_err(|e| ScraperError::Parse(format!("Invalid dataset: {e}")))?;

        let mut anime = HashMap::with_capacity(file.anime.len());
        for entry in file.anime {
            let record: &mut AnimeRecord = anime.entry(entry.slug).or_default();
            record.metadata = DatasetMetadata {
                title: entry.title.filter(|t| !t.trim().is_empty()),
                genres: entry.genres,
                cover: entry.cover,
            };
            for stream in entry.streams {
                let Ok(language) = stream.language.parse::<Language>() else {
                    debug!("Skipping dataset stream with language {}", stream.language);
                    continue;
                };
                let links = record.episodes.entry((stream.season, stream.episode)).or_default();
                for url in stream.urls {
                    let embed = EmbedRef::new(language, url);
                    if !links.contains(&embed) {
                        links.push(embed);
                    }
                }
            }
        }

        *self.anime.write() = anime;
        Ok(())
    }

    /// Known embeds for one episode. Sub-seasons are not addressed by the
    /// dataset.
    pub fn embeds(&self, slug: &str, season: SeasonNumber, episode: u32) -> Vec<EmbedRef> {
        if season.is_sub() {
            return Vec::new();
        }
        self.anime
            .read()
            .get(slug)
            .and_then(|record| record.episodes.get(&(season.number, episode)))
            .cloned()
            .unwrap_or_default()
    }

    pub fn metadata(&self, slug: &str) -> Option<DatasetMetadata> {
        self.anime.read().get(slug).map(|record| record.metadata.clone())
    }

    pub fn contains(&self, slug: &str) -> bool {
        self.anime.read().contains_key(slug)
    }

    pub fn len(&self) -> usize {
        self.anime.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Download the dataset, replace the index and optionally save a copy
    pub async fn refresh(&self, fetcher: &dyn Fetcher, url: &str, save_to: Option<&Path>) -> Result<()> {
        let json = fetcher.fetch_text(url).await?;
        self.replace_from_json(&json)?;

        if let Some(path) = save_to {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(path, &json).await?;
        }

        info!("Dataset refreshed with {} anime", self.len());
        Ok(())
    }
}

/// Refresh the dataset from `url` every `every`
pub fn spawn_refresher(
    index: Arc<DatasetIndex>,
    fetcher: Arc<dyn Fetcher>,
    url: String,
    save_to: Option<PathBuf>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            if let Err(e) = index.refresh(fetcher.as_ref(), &url, save_to.as_deref()).await {
                warn!("Dataset refresh from {} failed: {}", url, e);
            }
        }
    })
}
