//! Scraper integration tests

/// In-process fakes shared by the unit and scenario tests
pub(crate) mod fixtures {
    use crate::scraper::cache::{CacheConfig, CacheStore};
    use crate::scraper::clock::ManualClock;
    use crate::scraper::dataset::DatasetIndex;
    use crate::scraper::http::{FetchError, FetchRequest, FetchResponse, Fetcher, RetryPolicy};
    use crate::scraper::lock::{LockConfig, ScrapeLock};
    use crate::scraper::orchestrator::{Orchestrator, OrchestratorConfig};
    use crate::scraper::provider::ExtractorRegistry;
    use crate::scraper::site::SiteClient;
    use crate::scraper::store::{MemoryStore, PersistentStore};
    use crate::scraper::types::Language;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    pub const BASE: &str = "https://anime-sama.test";

    /// Fetcher answering from a fixed URL table. Unknown URLs are 404.
    #[derive(Default)]
    pub struct ScriptedFetcher {
        routes: HashMap<String, Result<FetchResponse, FetchError>>,
        hits: Mutex<HashMap<String, usize>>,
        delay: Duration,
    }

    impl ScriptedFetcher {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn page(self, url: &str, body: &str) -> Self {
            self.respond(url, FetchResponse::ok(url, body))
        }

        pub fn respond(mut self, url: &str, response: FetchResponse) -> Self {
            self.routes.insert(url.to_string(), Ok(response));
            self
        }

        pub fn fail(mut self, url: &str, error: FetchError) -> Self {
            self.routes.insert(url.to_string(), Err(error));
            self
        }

        /// Latency added to every request
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub fn hits(&self, url: &str) -> usize {
            self.hits.lock().get(url).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl Fetcher for ScriptedFetcher {
        async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
            *self.hits.lock().entry(request.url.clone()).or_default() += 1;
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            match self.routes.get(&request.url) {
                Some(answer) => answer.clone(),
                None => Err(FetchError::Status {
                    url: request.url.clone(),
                    status: 404,
                }),
            }
        }

        fn retry_policy(&self) -> RetryPolicy {
            RetryPolicy::none()
        }
    }

    /// Orchestrator over a scripted site, a memory store and a manual clock
    pub struct Harness {
        pub orchestrator: Orchestrator,
        pub fetcher: Arc<ScriptedFetcher>,
        pub clock: Arc<ManualClock>,
    }

    impl Harness {
        pub fn new(fetcher: ScriptedFetcher) -> Self {
            Self::build(fetcher, None, LockConfig {
                lease_duration: Duration::from_secs(60),
                wait_timeout: Duration::from_secs(5),
                poll_interval: Duration::from_millis(5),
            })
        }

        pub fn build(fetcher: ScriptedFetcher, dataset: Option<DatasetIndex>, lock: LockConfig) -> Self {
            let fetcher = Arc::new(fetcher);
            let store: Arc<dyn PersistentStore> = Arc::new(MemoryStore::new());
            let clock = Arc::new(ManualClock::starting_now());
            let cache = Arc::new(CacheStore::new(CacheConfig::default(), store.clone(), clock.clone()));

            let mut orchestrator = Orchestrator::new(
                SiteClient::new(fetcher.clone(), BASE).expect("valid base URL"),
                Arc::new(ExtractorRegistry::with_default_providers(fetcher.clone())),
                cache,
                ScrapeLock::new(store, clock.clone(), lock),
                OrchestratorConfig {
                    languages: vec![Language::Vostfr],
                    season_timeout: Duration::from_secs(5),
                    extraction_retry: RetryPolicy::none(),
                    ..OrchestratorConfig::default()
                },
            );
            if let Some(dataset) = dataset {
                orchestrator = orchestrator.with_dataset(Arc::new(dataset));
            }

            Self {
                orchestrator,
                fetcher,
                clock,
            }
        }
    }

    pub fn season_url(slug: &str, path: &str) -> String {
        format!("{BASE}/catalogue/{slug}/{path}/vostfr/")
    }

    /// Season page and its episodes.js with the given player arrays
    pub fn with_season(fetcher: ScriptedFetcher, slug: &str, path: &str, html_extra: &str, arrays: &[&[&str]]) -> ScriptedFetcher {
        let season = season_url(slug, path);
        let script: String = arrays
            .iter()
            .enumerate()
            .map(|(index, urls)| {
                let quoted: Vec<String> = urls.iter().map(|url| format!("'{url}'")).collect();
                format!("var eps{} = [{}];\n", index + 1, quoted.join(", "))
            })
            .collect();

        fetcher
            .page(
                &season,
                &format!(r#"<script src="episodes.js?filever=7"></script><script>{html_extra}</script>"#),
            )
            .page(&format!("{season}episodes.js?filever=7"), &script)
    }

    pub fn sibnet(id: u32) -> String {
        format!("https://video.sibnet.ru/shell.php?videoid={id}")
    }

    /// Sibnet shell plus the redirect to its CDN file
    pub fn with_sibnet(fetcher: ScriptedFetcher, id: u32) -> ScriptedFetcher {
        let media = format!("https://video.sibnet.ru/v/{id}.mp4");
        fetcher
            .page(
                &sibnet(id),
                &format!(r#"<script>player.src([{{src: "/v/{id}.mp4", type: "video/mp4"}}]);</script>"#),
            )
            .respond(
                &media,
                FetchResponse::redirect(&media, format!("https://dv1.sibnet.ru/{id}.mp4")),
            )
    }

    pub const SAMPLE_SLUG: &str = "test-anime";

    /// Anime with seasons 1, 2, 2-2, a film container and an OAV container
    pub fn sample_site() -> ScriptedFetcher {
        let landing = r#"
            <h4 id="titreOeuvre">Test Anime</h4>
            <h2>Genres</h2><a>Action, Drame</a>
            <script>
                panneauAnime("nom", "url");
                panneauAnime("Saison 1", "saison1/vostfr");
                panneauAnime("Saison 2", "saison2/vostfr");
                panneauAnime("Saison 2 Partie 2", "saison2-2/vostfr");
                panneauAnime("Films", "film/vostfr");
                panneauAnime("OAV", "oav/vostfr");
            </script>
        "#;

        let s1e1 = sibnet(101);
        let s1e2 = sibnet(102);
        let s2: Vec<String> = (201..=203).map(sibnet).collect();
        let s22: Vec<String> = (221..=222).map(sibnet).collect();
        let film = sibnet(901);
        let oav = sibnet(1);

        let mut fetcher = ScriptedFetcher::new().page(&format!("{BASE}/catalogue/{SAMPLE_SLUG}/"), landing);
        fetcher = with_season(
            fetcher,
            SAMPLE_SLUG,
            "saison1",
            "",
            &[
                &[s1e1.as_str(), s1e2.as_str()],
                &["https://sendvid.com/embed/s1e1", "https://sendvid.com/embed/s1e2"],
            ],
        );
        fetcher = with_season(
            fetcher,
            SAMPLE_SLUG,
            "saison2",
            "",
            &[&s2.iter().map(String::as_str).collect::<Vec<_>>()],
        );
        fetcher = with_season(
            fetcher,
            SAMPLE_SLUG,
            "saison2-2",
            "",
            &[&s22.iter().map(String::as_str).collect::<Vec<_>>()],
        );
        fetcher = with_season(fetcher, SAMPLE_SLUG, "film", r#"newSPF("Le Film");"#, &[&[film.as_str()]]);
        fetcher = with_season(fetcher, SAMPLE_SLUG, "oav", "", &[&[oav.as_str()]]);

        for id in [101, 102, 201, 202, 203, 221, 222, 901, 1] {
            fetcher = with_sibnet(fetcher, id);
        }
        // the sendvid page has no player
        fetcher.page("https://sendvid.com/embed/s1e1", "<html><body>removed</body></html>")
    }
}

#[cfg(test)]
mod detail_tests {
    use super::fixtures::*;
    use crate::scraper::cache::{CacheKey, TtlClass};
    use crate::scraper::dataset::DatasetIndex;
    use crate::scraper::http::FetchError;
    use crate::scraper::lock::LockConfig;
    use crate::scraper::types::{AnimeStatus, SeasonKind, SeasonNumber, SeasonStatus};
    use std::collections::HashSet;
    use std::time::Duration;

    #[tokio::test]
    async fn test_sample_anime_yields_canonical_units() {
        let harness = Harness::new(sample_site());
        let detail = harness.orchestrator.resolve_detail(SAMPLE_SLUG).await.unwrap();

        let numbers: Vec<SeasonNumber> = detail.seasons.iter().map(|unit| unit.number).collect();
        assert_eq!(
            numbers,
            vec![
                SeasonNumber::special(),
                SeasonNumber::new(1),
                SeasonNumber::new(2),
                SeasonNumber::sub(2, 2),
                SeasonNumber::film(),
            ]
        );

        let sub = detail.season(SeasonNumber::sub(2, 2)).unwrap();
        assert_eq!(sub.kind, SeasonKind::SubSeason);
        assert_eq!(detail.parent_of(sub).map(|unit| unit.number), Some(SeasonNumber::new(2)));

        let film = detail.season(SeasonNumber::film()).unwrap();
        assert_eq!(film.kind, SeasonKind::Film);
        assert_eq!(film.episodes[0].title.as_deref(), Some("Le Film"));

        let parent = detail.season(SeasonNumber::new(2)).unwrap();
        assert_eq!(parent.episodes.len(), 3);
        let parent_urls: HashSet<&str> = parent
            .episodes
            .iter()
            .flat_map(|episode| episode.all_embeds().map(|(_, embed)| embed.url.as_str()))
            .collect();
        for episode in &sub.episodes {
            for (_, embed) in episode.all_embeds() {
                assert!(!parent_urls.contains(embed.url.as_str()));
            }
        }

        assert!(detail.seasons.iter().all(|unit| unit.status.is_complete()));
        assert_eq!(detail.entry.title, "Test Anime");
        // planning unreachable
        assert_eq!(detail.status, AnimeStatus::Ongoing);
    }

    #[tokio::test]
    async fn test_concurrent_requests_scrape_once() {
        let harness = Harness::new(sample_site().with_delay(Duration::from_millis(20)));
        let requests = (0..6).map(|_| harness.orchestrator.resolve_detail(SAMPLE_SLUG));

        let results = futures::future::join_all(requests).await;
        assert!(results.iter().all(Result::is_ok));
        assert_eq!(
            harness
                .fetcher
                .hits(&format!("{BASE}/catalogue/{SAMPLE_SLUG}/")),
            1
        );
    }

    #[tokio::test]
    async fn test_failed_season_is_flagged_and_cached_briefly() {
        let season = season_url(SAMPLE_SLUG, "saison2");
        let fetcher = sample_site().fail(
            &season,
            FetchError::Status {
                url: season.clone(),
                status: 503,
            },
        );
        let harness = Harness::new(fetcher);

        let detail = harness.orchestrator.resolve_detail(SAMPLE_SLUG).await.unwrap();
        let failed = detail.season(SeasonNumber::new(2)).unwrap();
        assert!(matches!(failed.status, SeasonStatus::Failed { .. }));
        assert!(failed.episodes.is_empty());
        assert_eq!(detail.season(SeasonNumber::new(1)).unwrap().episodes.len(), 2);

        let cache = harness.orchestrator.cache();
        let entry = cache.entry(&CacheKey::detail(SAMPLE_SLUG)).await.unwrap();
        assert_eq!(entry.ttl_class, TtlClass::Partial);

        harness.clock.advance(Duration::from_secs(301));
        assert!(cache.get(&CacheKey::detail(SAMPLE_SLUG)).await.is_none());
    }

    #[tokio::test]
    async fn test_dataset_title_fills_untitled_landing() {
        let landing = r#"<h2>Genres</h2><a>Action</a>"#;
        let dataset = DatasetIndex::from_json(
            r#"{"anime": [{"slug": "untitled", "title": "Real Title", "streams": []}]}"#,
        )
        .unwrap();
        let fetcher = ScriptedFetcher::new()
            .page(&format!("{BASE}/catalogue/untitled/"), landing)
            .page(&format!("{BASE}/catalogue/bare/"), landing);
        let harness = Harness::build(fetcher, Some(dataset), LockConfig::default());

        let detail = harness.orchestrator.resolve_detail("untitled").await.unwrap();
        assert_eq!(detail.entry.title, "Real Title");
        assert_eq!(detail.entry.genres.len(), 1);

        let bare = harness.orchestrator.resolve_detail("bare").await.unwrap();
        assert_eq!(bare.entry.title, "bare");
    }

    #[tokio::test]
    async fn test_missing_landing_is_a_request_failure() {
        let harness = Harness::new(sample_site());
        assert!(harness.orchestrator.resolve_detail("unknown").await.is_err());
    }
}

#[cfg(test)]
mod stream_tests {
    use super::fixtures::*;
    use crate::scraper::cache::{CacheKey, TtlClass};
    use crate::scraper::dataset::DatasetIndex;
    use crate::scraper::http::FetchError;
    use crate::scraper::lock::LockConfig;
    use crate::scraper::types::{
        AnimeStatus, ExtractionFailure, Language, ProviderKind, SeasonNumber, StreamPreferences,
    };
    use crate::scraper::ScraperError;
    use std::time::Duration;

    #[tokio::test]
    async fn test_malformed_embed_does_not_affect_siblings() {
        let harness = Harness::new(sample_site());
        let streams = harness
            .orchestrator
            .resolve_streams(SAMPLE_SLUG, SeasonNumber::new(1), 1)
            .await
            .unwrap();

        assert_eq!(streams.len(), 2);
        let sibnet = streams.iter().find(|s| s.provider == ProviderKind::Sibnet).unwrap();
        assert_eq!(sibnet.url(), Some("https://dv1.sibnet.ru/101.mp4"));

        let sendvid = streams.iter().find(|s| s.provider == ProviderKind::Sendvid).unwrap();
        assert!(matches!(sendvid.failure(), Some(ExtractionFailure::MalformedEmbed(_))));

        // terminal failures keep the lifecycle lifetime
        let key = CacheKey::episode(SAMPLE_SLUG, SeasonNumber::new(1), 1);
        let entry = harness.orchestrator.cache().entry(&key).await.unwrap();
        assert_eq!(entry.ttl_class, TtlClass::Episode(AnimeStatus::Ongoing));
    }

    #[tokio::test]
    async fn test_second_request_is_served_from_cache() {
        let harness = Harness::new(sample_site());
        let orchestrator = &harness.orchestrator;

        let first = orchestrator
            .resolve_streams(SAMPLE_SLUG, SeasonNumber::new(2), 2)
            .await
            .unwrap();
        let second = orchestrator
            .resolve_streams(SAMPLE_SLUG, SeasonNumber::new(2), 2)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(harness.fetcher.hits(&sibnet(202)), 1);
    }

    #[tokio::test]
    async fn test_episode_past_parent_continues_into_sub_season() {
        let harness = Harness::new(sample_site());
        let streams = harness
            .orchestrator
            .resolve_streams(SAMPLE_SLUG, SeasonNumber::new(2), 4)
            .await
            .unwrap();
        assert_eq!(streams[0].embed_url, sibnet(221));

        let missing = harness
            .orchestrator
            .resolve_streams(SAMPLE_SLUG, SeasonNumber::new(2), 9)
            .await;
        assert!(matches!(missing, Err(ScraperError::NotFound(_))));
    }

    fn failing_season(fetcher: ScriptedFetcher, path: &str) -> ScriptedFetcher {
        let season = season_url(SAMPLE_SLUG, path);
        fetcher.fail(
            &season,
            FetchError::Status {
                url: season.clone(),
                status: 503,
            },
        )
    }

    #[tokio::test]
    async fn test_failed_parent_season_is_not_remapped_to_sub_season() {
        let harness = Harness::new(failing_season(sample_site(), "saison2"));
        let orchestrator = &harness.orchestrator;

        for episode in [1, 4] {
            let result = orchestrator
                .resolve_streams(SAMPLE_SLUG, SeasonNumber::new(2), episode)
                .await;
            assert!(
                matches!(result, Err(ScraperError::SeasonUnavailable(_))),
                "episode {episode}: {result:?}"
            );
            let key = CacheKey::episode(SAMPLE_SLUG, SeasonNumber::new(2), episode);
            assert!(orchestrator.cache().entry(&key).await.is_none());
        }
        assert_eq!(harness.fetcher.hits(&sibnet(221)), 0);

        // the sub-season itself scraped fine
        let sub = orchestrator
            .resolve_streams(SAMPLE_SLUG, SeasonNumber::sub(2, 2), 1)
            .await
            .unwrap();
        assert_eq!(sub[0].embed_url, sibnet(221));
    }

    #[tokio::test]
    async fn test_failed_season_without_sub_seasons_is_not_reported_missing() {
        let harness = Harness::new(failing_season(sample_site(), "saison1"));
        let result = harness
            .orchestrator
            .resolve_streams(SAMPLE_SLUG, SeasonNumber::new(1), 1)
            .await;
        assert!(matches!(result, Err(ScraperError::SeasonUnavailable(_))));

        let absent = harness
            .orchestrator
            .resolve_streams(SAMPLE_SLUG, SeasonNumber::new(7), 1)
            .await;
        assert!(matches!(absent, Err(ScraperError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_dataset_embeds_are_merged() {
        let dataset = DatasetIndex::from_json(&format!(
            r#"{{"anime": [{{"slug": "{SAMPLE_SLUG}", "streams": [
                {{"season": 1, "episode": 2, "language": "VF", "urls": ["{}", "{}"]}}
            ]}}]}}"#,
            sibnet(102),
            sibnet(555)
        ))
        .unwrap();
        let fetcher = with_sibnet(sample_site(), 555);
        let harness = Harness::build(fetcher, Some(dataset), LockConfig::default());

        let streams = harness
            .orchestrator
            .resolve_streams(SAMPLE_SLUG, SeasonNumber::new(1), 2)
            .await
            .unwrap();

        let urls: Vec<&str> = streams.iter().map(|s| s.embed_url.as_str()).collect();
        assert_eq!(urls.iter().filter(|url| **url == sibnet(102)).count(), 1);
        assert!(urls.contains(&sibnet(555).as_str()));

        let vf_only = harness
            .orchestrator
            .resolve_streams_with(
                SAMPLE_SLUG,
                SeasonNumber::new(1),
                2,
                &StreamPreferences::new().with_language(Some(Language::Vf)),
            )
            .await
            .unwrap();
        assert_eq!(vf_only.len(), 1);
        assert_eq!(vf_only[0].embed_url, sibnet(555));
    }

    #[tokio::test]
    async fn test_lock_timeout_falls_back_to_scraping() {
        let harness = Harness::build(
            sample_site(),
            None,
            LockConfig {
                lease_duration: Duration::from_secs(60),
                wait_timeout: Duration::from_millis(30),
                poll_interval: Duration::from_millis(5),
            },
        );

        // a crashed peer holds the lease
        let lock_key = CacheKey::lock(&CacheKey::detail(SAMPLE_SLUG));
        harness
            .orchestrator
            .lock()
            .acquire(&lock_key, Duration::from_secs(60))
            .await
            .unwrap();

        let detail = harness.orchestrator.resolve_detail(SAMPLE_SLUG).await.unwrap();
        assert_eq!(detail.seasons.len(), 5);
        assert!(harness.orchestrator.lock().is_held(&lock_key).await.unwrap());
    }
}

#[cfg(test)]
mod catalog_tests {
    use super::fixtures::*;
    use crate::scraper::cache::CacheKey;
    use crate::scraper::types::{CatalogQuery, Language};

    fn card(slug: &str, title: &str, languages: &str) -> String {
        format!(
            r#"<div class="shrink-0"><a href="/catalogue/{slug}/">
                <h2 class="card-title">{title}</h2>
                <div class="info-row"><span class="info-label">Types</span><p class="info-value">Anime</p></div>
                <div class="info-row"><span class="info-label">Langues</span><p class="info-value">{languages}</p></div>
            </a></div>"#
        )
    }

    #[tokio::test]
    async fn test_homepage_is_cached_and_filtered_locally() {
        let homepage = format!(
            r#"<div id="containerSorties">{}{}</div>"#,
            card("frieren", "Frieren", "VOSTFR, VF"),
            card("naruto", "Naruto", "VOSTFR")
        );
        let harness = Harness::new(ScriptedFetcher::new().page(&format!("{BASE}/"), &homepage));

        let all = harness
            .orchestrator
            .resolve_catalog(&CatalogQuery::homepage())
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let dubbed = harness
            .orchestrator
            .resolve_catalog(&CatalogQuery::homepage().with_language(Some(Language::Vf)))
            .await
            .unwrap();
        assert_eq!(dubbed.len(), 1);
        assert_eq!(dubbed[0].id, "frieren");

        assert_eq!(harness.fetcher.hits(&format!("{BASE}/")), 1);
        assert!(harness.orchestrator.cache().get(&CacheKey::homepage()).await.is_some());
    }
}
