//! Page-level access to the streaming site: URLs, fetches and parsing.

use crate::scraper::http::{FetchError, Fetcher};
use crate::scraper::parser::{LandingPage, PageParser, SeasonPage};
use crate::scraper::types::{CatalogEntry, CatalogQuery, ContentType, Language};
use crate::scraper::{Result, ScraperError};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

/// Site client: builds URLs under the base URL and parses what comes back
#[derive(Clone)]
pub struct SiteClient {
    fetcher: Arc<dyn Fetcher>,
    base_url: String,
    site_host: String,
}

impl SiteClient {
    pub fn new(fetcher: Arc<dyn Fetcher>, base_url: &str) -> Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        let site_host = Url::parse(&base_url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
            .ok_or_else(|| ScraperError::Config(format!("Invalid site URL: {base_url}")))?;

        Ok(Self {
            fetcher,
            base_url,
            site_host,
        })
    }

    pub fn fetcher(&self) -> &Arc<dyn Fetcher> {
        &self.fetcher
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn site_host(&self) -> &str {
        &self.site_host
    }

    pub fn anime_url(&self, slug: &str) -> String {
        format!("{}/catalogue/{}/", self.base_url, slug)
    }

    pub fn season_url(&self, slug: &str, path: &str, language: Language) -> String {
        format!("{}/catalogue/{}/{}/{}/", self.base_url, slug, path, language.path())
    }

    pub fn search_url(&self, query: &CatalogQuery, content_type: ContentType) -> String {
        let mut url = format!(
            "{}/catalogue/?search={}",
            self.base_url,
            urlencoding::encode(query.search_text().unwrap_or_default())
        );
        if let Some(language) = query.language {
            url.push_str(&format!("&langue[]={}", language.normalized()));
        }
        if let Some(genre) = &query.genre {
            url.push_str(&format!("&genre[]={}", urlencoding::encode(genre)));
        }
        url.push_str(&format!("&type[]={}", content_type.query_value()));
        url
    }

    /// Landing page of an anime. A missing page is `NotFound`.
    pub async fn landing(&self, slug: &str) -> Result<LandingPage> {
        let url = self.anime_url(slug);
        let html = match self.fetcher.fetch_text(&url).await {
            Ok(html) => html,
            Err(e) if e.is_not_found() => {
                return Err(ScraperError::NotFound(format!("Anime {slug}")));
            }
            Err(e) => return Err(e.into()),
        };

        let landing = PageParser::landing(&html, slug);
        debug!(
            anime = %slug,
            "Landing page has {} season blocks",
            landing.blocks.len()
        );
        Ok(landing)
    }

    /// Player arrays of one season path in one language.
    ///
    /// `None` when the language does not exist for that season.
    pub async fn season_page(
        &self,
        slug: &str,
        path: &str,
        language: Language,
        keep_named: bool,
    ) -> std::result::Result<Option<SeasonPage>, FetchError> {
        let season_url = self.season_url(slug, path, language);
        let html = match self.fetcher.fetch_text(&season_url).await {
            Ok(html) => html,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };

        let Some(script_name) = PageParser::episodes_script(&html) else {
            debug!(anime = %slug, season = %path, language = %language, "No episodes.js on season page");
            return Ok(None);
        };

        let script = match self.fetcher.fetch_text(&format!("{season_url}{script_name}")).await {
            Ok(script) => script,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };

        let page = PageParser::season_page(&html, &script, &self.site_host, keep_named);
        Ok((!page.is_empty()).then_some(page))
    }

    /// Homepage sections
    pub async fn homepage(&self) -> Result<Vec<CatalogEntry>> {
        let html = self.fetcher.fetch_text(&format!("{}/", self.base_url)).await?;
        Ok(PageParser::homepage_cards(&html))
    }

    /// Site search across anime and films. A failing type is skipped, the
    /// request fails only when every type fails.
    pub async fn search(&self, query: &CatalogQuery) -> Result<Vec<CatalogEntry>> {
        let mut seen = HashSet::new();
        let mut results = Vec::new();
        let mut last_error = None;
        let mut succeeded = false;

        for content_type in [ContentType::Anime, ContentType::Film] {
            let url = self.search_url(query, content_type);
            match self.fetcher.fetch_text(&url).await {
                Ok(html) => {
                    succeeded = true;
                    results.extend(
                        PageParser::search_cards(&html)
                            .into_iter()
                            .filter(|entry| seen.insert(entry.id.clone())),
                    );
                }
                Err(e) => {
                    warn!("Search for {:?} failed: {}", content_type, e);
                    last_error = Some(e);
                }
            }
        }

        match (succeeded, last_error) {
            (false, Some(e)) => Err(e.into()),
            _ => Ok(results),
        }
    }

    /// Slugs on the weekly planning
    pub async fn planning(&self) -> Result<Vec<String>> {
        let html = self
            .fetcher
            .fetch_text(&format!("{}/planning/", self.base_url))
            .await?;
        Ok(PageParser::planning_slugs(&html))
    }
}

/// Planning membership: exact slug or a prefix either way
pub fn is_on_planning(slug: &str, planning: &[String]) -> bool {
    planning
        .iter()
        .any(|listed| listed == slug || listed.starts_with(slug) || slug.starts_with(listed.as_str()))
}
