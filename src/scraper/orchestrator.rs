//! Request pipeline: cache lookup, scrape lock, parallel season scraping,
//! stream extraction and cache write-back.

use crate::scraper::cache::{CacheKey, CacheStore, TtlClass};
use crate::scraper::dataset::DatasetIndex;
use crate::scraper::http::{FetchError, RetryPolicy};
use crate::scraper::lock::{Acquisition, Lease, ScrapeLock, WaitOutcome};
use crate::scraper::parser::SeasonPage;
use crate::scraper::provider::ExtractorRegistry;
use crate::scraper::season::SeasonResolver;
use crate::scraper::site::{SiteClient, is_on_planning};
use crate::scraper::types::{
    AnimeDetail, AnimeStatus, CatalogEntry, CatalogQuery, EmbedRef, EpisodeLocation, Language,
    ProviderKind, ResolvedStream, SeasonKind, SeasonNumber, SeasonStatus, SeasonUnit, StreamOutcome,
    StreamPreferences,
};
use crate::scraper::{Result, ScraperError};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Pipeline tuning
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Language variants probed for every season path
    pub languages: Vec<Language>,
    /// Embeds whose URL contains one of these are never extracted
    pub excluded_domains: Vec<String>,
    /// Budget for one season sub-task, all languages included
    pub season_timeout: Duration,
    pub max_parallel_seasons: usize,
    pub max_parallel_extractions: usize,
    /// Applied to extractions that fail with a network error
    pub extraction_retry: RetryPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            languages: Language::ALL.to_vec(),
            excluded_domains: vec!["vk.com".to_string(), "vkvideo.ru".to_string()],
            season_timeout: Duration::from_secs(30),
            max_parallel_seasons: 4,
            max_parallel_extractions: 8,
            extraction_retry: RetryPolicy::default(),
        }
    }
}

/// Freshly scraped value and the lifetime to cache it with, `None` to skip
/// caching
struct Scraped<T> {
    value: T,
    ttl: Option<TtlClass>,
}

impl<T> Scraped<T> {
    fn cached(value: T, class: TtlClass) -> Self {
        Self {
            value,
            ttl: Some(class),
        }
    }

    fn uncached(value: T) -> Self {
        Self { value, ttl: None }
    }
}

pub struct Orchestrator {
    site: SiteClient,
    registry: Arc<ExtractorRegistry>,
    cache: Arc<CacheStore>,
    lock: ScrapeLock,
    dataset: Option<Arc<DatasetIndex>>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        site: SiteClient,
        registry: Arc<ExtractorRegistry>,
        cache: Arc<CacheStore>,
        lock: ScrapeLock,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            site,
            registry,
            cache,
            lock,
            dataset: None,
            config,
        }
    }

    /// Merge embeds and metadata from a pre-scraped dataset
    pub fn with_dataset(mut self, dataset: Arc<DatasetIndex>) -> Self {
        self.dataset = Some(dataset);
        self
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn lock(&self) -> &ScrapeLock {
        &self.lock
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Homepage listing for an empty query, site search otherwise
    pub async fn resolve_catalog(&self, query: &CatalogQuery) -> Result<Vec<CatalogEntry>> {
        if query.search_text().is_none() {
            let entries = self
                .get_or_scrape(&CacheKey::homepage(), || async {
                    let entries = self.site.homepage().await?;
                    info!("Scraped {} homepage entries", entries.len());
                    Ok(Self::catalog_result(entries))
                })
                .await?;
            return Ok(query.filter(entries));
        }

        self.get_or_scrape(&CacheKey::catalog(query), || async {
            let entries = self.site.search(query).await?;
            info!(
                "Search '{}' returned {} entries",
                query.search_text().unwrap_or_default(),
                entries.len()
            );
            Ok(Self::catalog_result(entries))
        })
        .await
    }

    fn catalog_result(entries: Vec<CatalogEntry>) -> Scraped<Vec<CatalogEntry>> {
        if entries.is_empty() {
            Scraped::uncached(entries)
        } else {
            Scraped::cached(entries, TtlClass::Catalog)
        }
    }

    /// Lifecycle status from the planning page. Any failure counts as
    /// ongoing so the shorter lifetime applies.
    pub async fn anime_status(&self, slug: &str) -> AnimeStatus {
        let planning = self
            .get_or_scrape(&CacheKey::planning(), || async {
                let slugs = self.site.planning().await?;
                debug!("Planning lists {} anime", slugs.len());
                Ok(if slugs.is_empty() {
                    Scraped::uncached(slugs)
                } else {
                    Scraped::cached(slugs, TtlClass::Planning)
                })
            })
            .await;

        match planning {
            Ok(slugs) if slugs.is_empty() => AnimeStatus::Ongoing,
            Ok(slugs) if is_on_planning(slug, &slugs) => AnimeStatus::Ongoing,
            Ok(_) => AnimeStatus::Finished,
            Err(e) => {
                warn!(anime = %slug, "Planning unavailable, assuming ongoing: {}", e);
                AnimeStatus::Ongoing
            }
        }
    }

    /// Landing page plus every season, scraped in parallel
    pub async fn resolve_detail(&self, slug: &str) -> Result<AnimeDetail> {
        self.get_or_scrape(&CacheKey::detail(slug), || self.scrape_detail(slug))
            .await
    }

    async fn scrape_detail(&self, slug: &str) -> Result<Scraped<AnimeDetail>> {
        info!(anime = %slug, "Scraping anime detail");
        let started = Instant::now();

        let mut landing = self.site.landing(slug).await?;
        if let Some(metadata) = self
            .dataset
            .as_ref()
            .and_then(|dataset| dataset.metadata(slug))
        {
            metadata.fill(&mut landing.entry);
        }
        if landing.entry.title.trim().is_empty() {
            landing.entry.title = slug.to_string();
        }

        let resolved = SeasonResolver::resolve(&landing.blocks);
        let status = self.anime_status(slug).await;

        let seasons: Vec<SeasonUnit> = stream::iter(resolved.units)
            .map(|unit| self.scrape_unit(slug, unit))
            .buffered(self.config.max_parallel_seasons.max(1))
            .collect()
            .await;

        let detail = AnimeDetail {
            entry: landing.entry,
            status,
            seasons,
            warnings: resolved.warnings,
            scraped_at: self.cache.clock().now(),
        };

        let class = if detail.is_partial() {
            TtlClass::Partial
        } else {
            TtlClass::Detail(status)
        };
        info!(
            anime = %slug,
            seasons = detail.seasons.len(),
            episodes = detail.episode_count(),
            partial = detail.is_partial(),
            "Scraped anime detail in {:?}",
            started.elapsed()
        );
        Ok(Scraped::cached(detail, class))
    }

    /// Scrape one season sub-task, failures stay inside the unit's status
    async fn scrape_unit(&self, slug: &str, mut unit: SeasonUnit) -> SeasonUnit {
        let number = unit.number;
        match tokio::time::timeout(self.config.season_timeout, self.scrape_unit_paths(slug, &unit)).await {
            Ok((pages, errors)) => {
                for (_, language_pages) in &pages {
                    for (language, _) in language_pages {
                        unit.add_language(*language);
                    }
                }
                for (_, language_pages) in pages {
                    let episodes = SeasonResolver::episodes_from_pages(&language_pages, |url| {
                        self.registry.identify(url)
                    });
                    unit.append_episodes(episodes);
                }

                unit.status = match (errors.is_empty(), unit.episodes.is_empty()) {
                    (true, false) => SeasonStatus::Complete,
                    (true, true) => SeasonStatus::Partial {
                        reason: "no episode list found".to_string(),
                    },
                    (false, false) => SeasonStatus::Partial {
                        reason: errors.join("; "),
                    },
                    (false, true) => SeasonStatus::Failed {
                        reason: errors.join("; "),
                    },
                };
                if !unit.status.is_complete() {
                    warn!(anime = %slug, season = %number, "Season incomplete: {:?}", unit.status);
                }
            }
            Err(_) => {
                warn!(
                    anime = %slug,
                    season = %number,
                    "Season scrape exceeded {:?}",
                    self.config.season_timeout
                );
                unit.status = SeasonStatus::Failed {
                    reason: format!("timed out after {:?}", self.config.season_timeout),
                };
            }
        }
        unit
    }

    /// Every path and language of a unit, fetched concurrently
    async fn scrape_unit_paths(
        &self,
        slug: &str,
        unit: &SeasonUnit,
    ) -> (Vec<(String, Vec<(Language, SeasonPage)>)>, Vec<String>) {
        let keep_named = unit.kind == SeasonKind::Film;
        let mut pages = Vec::with_capacity(unit.paths.len());
        let mut errors = Vec::new();

        for path in &unit.paths {
            let fetches = self.config.languages.iter().map(|&language| async move {
                let page = self.site.season_page(slug, path, language, keep_named).await;
                (language, page)
            });

            let mut found = Vec::new();
            for (language, page) in futures::future::join_all(fetches).await {
                match page {
                    Ok(Some(page)) => found.push((language, page)),
                    Ok(None) => debug!(anime = %slug, season = %path, language = %language, "Language absent"),
                    Err(e) => errors.push(Self::describe_fetch_error(path, language, &e)),
                }
            }
            pages.push((path.clone(), found));
        }

        (pages, errors)
    }

    fn describe_fetch_error(path: &str, language: Language, error: &FetchError) -> String {
        format!("{path}/{}: {error}", language.path())
    }

    /// Playable streams for one episode
    pub async fn resolve_streams(
        &self,
        slug: &str,
        season: SeasonNumber,
        episode: u32,
    ) -> Result<Vec<ResolvedStream>> {
        self.get_or_scrape(&CacheKey::episode(slug, season, episode), || {
            self.scrape_streams(slug, season, episode)
        })
        .await
    }

    /// [`Self::resolve_streams`] filtered and ordered by language
    pub async fn resolve_streams_with(
        &self,
        slug: &str,
        season: SeasonNumber,
        episode: u32,
        preferences: &StreamPreferences,
    ) -> Result<Vec<ResolvedStream>> {
        let streams = self.resolve_streams(slug, season, episode).await?;
        Ok(preferences.apply(streams))
    }

    async fn scrape_streams(
        &self,
        slug: &str,
        season: SeasonNumber,
        episode: u32,
    ) -> Result<Scraped<Vec<ResolvedStream>>> {
        let detail = self.resolve_detail(slug).await?;

        let mut season_complete = true;
        let mut unavailable = None;
        let mut embeds: Vec<(ProviderKind, EmbedRef)> = Vec::new();
        match detail.locate_episode(season, episode) {
            EpisodeLocation::Found(unit, found) => {
                season_complete = unit.status.is_complete();
                embeds.extend(found.all_embeds().map(|(provider, embed)| (provider, embed.clone())));
            }
            EpisodeLocation::Unavailable(unit) => {
                season_complete = false;
                warn!(
                    anime = %slug,
                    season = %unit.number,
                    episode,
                    "Episode lies in a season that was not fully scraped"
                );
                unavailable = Some(format!(
                    "season {} of {slug}: {}",
                    unit.number,
                    unit.status.reason().unwrap_or("incomplete")
                ));
            }
            EpisodeLocation::Missing => {}
        }

        if let Some(dataset) = &self.dataset {
            embeds.extend(
                dataset
                    .embeds(slug, season, episode)
                    .into_iter()
                    .map(|embed| (self.registry.identify(&embed.url), embed)),
            );
        }

        if embeds.is_empty() {
            return Err(match unavailable {
                Some(reason) => ScraperError::SeasonUnavailable(reason),
                None => ScraperError::NotFound(format!(
                    "Episode {episode} of season {season} for {slug}"
                )),
            });
        }

        let embeds = self.usable_embeds(embeds);
        info!(
            anime = %slug,
            season = %season,
            episode,
            embeds = embeds.len(),
            "Extracting streams"
        );

        let streams: Vec<ResolvedStream> = stream::iter(embeds)
            .map(|(provider, embed)| self.extract_one(provider, embed))
            .buffered(self.config.max_parallel_extractions.max(1))
            .collect()
            .await;

        let retryable_failure = streams
            .iter()
            .any(|stream| stream.failure().is_some_and(|failure| failure.is_retryable()));
        let class = if retryable_failure || !season_complete {
            TtlClass::Partial
        } else {
            TtlClass::Episode(detail.status)
        };

        info!(
            anime = %slug,
            season = %season,
            episode,
            resolved = streams.iter().filter(|stream| stream.is_resolved()).count(),
            failed = streams.iter().filter(|stream| !stream.is_resolved()).count(),
            "Extraction finished"
        );
        Ok(Scraped::cached(streams, class))
    }

    /// Drop duplicate URLs and excluded domains
    fn usable_embeds(&self, embeds: Vec<(ProviderKind, EmbedRef)>) -> Vec<(ProviderKind, EmbedRef)> {
        let mut seen = HashSet::new();
        embeds
            .into_iter()
            .filter(|(_, embed)| seen.insert(embed.url.trim().to_string()))
            .filter(|(_, embed)| {
                let excluded = self
                    .config
                    .excluded_domains
                    .iter()
                    .any(|domain| embed.url.contains(domain.as_str()));
                if excluded {
                    debug!("Skipping excluded embed {}", embed.url);
                }
                !excluded
            })
            .collect()
    }

    async fn extract_one(&self, provider: ProviderKind, embed: EmbedRef) -> ResolvedStream {
        let result = self
            .config
            .extraction_retry
            .run(|| self.registry.extract(&embed.url), |failure| failure.is_retryable())
            .await;

        let outcome = match result {
            Ok(url) => StreamOutcome::Resolved { url },
            Err(failure) => {
                warn!(provider = %provider, embed = %embed.url, "Extraction failed: {}", failure);
                StreamOutcome::Failed { failure }
            }
        };

        ResolvedStream {
            provider,
            language: embed.language,
            embed_url: embed.url,
            outcome,
            resolved_at: self.cache.clock().now(),
        }
    }

    /// Cache-then-lock wrapper around a scrape.
    ///
    /// A caller finding the lease taken waits for it to clear and re-reads
    /// the cache. Past the wait timeout, or when the lock store fails, it
    /// scrapes without the lease.
    async fn get_or_scrape<T, F, Fut>(&self, key: &str, scrape: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Scraped<T>>>,
    {
        if let Some(hit) = self.cache.get_json::<T>(key).await {
            return Ok(hit);
        }

        let lock_key = CacheKey::lock(key);
        let config = *self.lock.config();
        let deadline = Instant::now() + config.wait_timeout;

        let lease = loop {
            match self.lock.acquire(&lock_key, config.lease_duration).await {
                Ok(Acquisition::Acquired(lease)) => {
                    // a previous holder may have filled the cache meanwhile
                    if let Some(hit) = self.cache.get_json::<T>(key).await {
                        self.release(&lease).await;
                        return Ok(hit);
                    }
                    break Some(lease);
                }
                Ok(Acquisition::WouldBlock) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    debug!("Waiting up to {:?} for {}", remaining, lock_key);
                    match self.lock.wait_for(&lock_key, remaining).await {
                        Ok(WaitOutcome::Cleared) => {
                            if let Some(hit) = self.cache.get_json::<T>(key).await {
                                return Ok(hit);
                            }
                            if remaining.is_zero() {
                                warn!("{}, scraping anyway", ScraperError::LockTimeout(lock_key.clone()));
                                break None;
                            }
                        }
                        Ok(WaitOutcome::TimedOut) => {
                            warn!("{}, scraping anyway", ScraperError::LockTimeout(lock_key.clone()));
                            break None;
                        }
                        Err(e) => {
                            error!("{}, scraping without lock", ScraperError::CacheUnavailable(e.to_string()));
                            break None;
                        }
                    }
                }
                Err(e) => {
                    error!("{}, scraping without lock", ScraperError::CacheUnavailable(e.to_string()));
                    break None;
                }
            }
        };

        let result = scrape().await;
        if let Ok(Scraped {
            value,
            ttl: Some(class),
        }) = &result
        {
            self.cache.set_json(key, value, *class).await;
        }
        if let Some(lease) = &lease {
            self.release(lease).await;
        }

        result.map(|scraped| scraped.value)
    }

    async fn release(&self, lease: &Lease) {
        if let Err(e) = self.lock.release(lease).await {
            error!("Failed to release {}: {}", lease.key, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scraper::cache::CacheConfig;
    use crate::scraper::clock::ManualClock;
    use crate::scraper::lock::LockConfig;
    use crate::scraper::store::{MemoryStore, PersistentStore};
    use crate::scraper::tests::fixtures::ScriptedFetcher;

    const BASE: &str = "https://anime-sama.test";

    fn orchestrator(fetcher: ScriptedFetcher) -> Orchestrator {
        let fetcher = Arc::new(fetcher);
        let store: Arc<dyn PersistentStore> = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::starting_now());
        let cache = Arc::new(CacheStore::new(CacheConfig::default(), store.clone(), clock.clone()));
        let lock = ScrapeLock::new(store, clock, LockConfig::default());
        Orchestrator::new(
            SiteClient::new(fetcher.clone(), BASE).unwrap(),
            Arc::new(ExtractorRegistry::with_default_providers(fetcher)),
            cache,
            lock,
            OrchestratorConfig {
                extraction_retry: RetryPolicy::none(),
                ..OrchestratorConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn test_empty_catalog_is_not_cached() {
        let fetcher = ScriptedFetcher::new().page(&format!("{BASE}/"), "<html></html>");
        let orchestrator = orchestrator(fetcher);

        let entries = orchestrator
            .resolve_catalog(&CatalogQuery::homepage())
            .await
            .unwrap();
        assert!(entries.is_empty());
        assert!(orchestrator.cache().get(&CacheKey::homepage()).await.is_none());
    }

    #[tokio::test]
    async fn test_planning_decides_status() {
        let planning = r#"cartePlanningAnime("Frieren", "frieren/saison2/vostfr", "img.jpg");"#;
        let fetcher = ScriptedFetcher::new().page(&format!("{BASE}/planning/"), planning);
        let orchestrator = orchestrator(fetcher);

        assert_eq!(orchestrator.anime_status("frieren").await, AnimeStatus::Ongoing);
        assert_eq!(orchestrator.anime_status("naruto").await, AnimeStatus::Finished);
    }

    #[tokio::test]
    async fn test_unreachable_planning_counts_as_ongoing() {
        let orchestrator = orchestrator(ScriptedFetcher::new());
        assert_eq!(orchestrator.anime_status("naruto").await, AnimeStatus::Ongoing);
    }

    #[test]
    fn test_excluded_and_duplicate_embeds_are_dropped() {
        let orchestrator = orchestrator(ScriptedFetcher::new());
        let embeds = vec![
            (ProviderKind::Sibnet, EmbedRef::new(Language::Vostfr, "https://video.sibnet.ru/shell.php?videoid=1")),
            (ProviderKind::Sibnet, EmbedRef::new(Language::Vf, "https://video.sibnet.ru/shell.php?videoid=1")),
            (ProviderKind::Unknown, EmbedRef::new(Language::Vostfr, "https://vk.com/video_ext.php?oid=1")),
        ];

        let kept = orchestrator.usable_embeds(embeds);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].1.language, Language::Vostfr);
    }
}
