use super::packer;
use super::traits::{StreamExtractor, find_media_url, host_matches};
use crate::scraper::http::{FetchRequest, Fetcher};
use crate::scraper::types::{ExtractionFailure, ProviderKind};
use async_trait::async_trait;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use tracing::debug;
use url::Url;

const DOMAINS: &[&str] = &["vidmoly.to", "vidmoly.net", "vidmoly.me", "moly.to"];

/// Markers of a challenge page served instead of the player
const PROTECTION_MARKERS: &[&str] = &[
    "g-recaptcha",
    "cf-browser-verification",
    "challenge-platform",
    "please wait while we verify",
    "just a moment...",
];

static SOURCES_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"sources\s*:\s*\[\s*\{\s*file\s*:\s*["']([^"']+)["']"#)
        .expect("Invalid vidmoly sources regex")
});

/// Vidmoly: JWPlayer `sources` block, sometimes packed
pub struct VidmolyExtractor {
    fetcher: Arc<dyn Fetcher>,
}

impl VidmolyExtractor {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self { fetcher }
    }

    /// The `.to` domain only serves a redirect page, `moly.to` hosts the player
    pub fn normalize(embed: &Url) -> Url {
        let mut normalized = embed.clone();
        if embed.host_str() == Some("vidmoly.to") && normalized.set_host(Some("moly.to")).is_err() {
            return embed.clone();
        }
        normalized
    }

    fn sources_file(source: &str) -> Option<String> {
        SOURCES_FILE
            .captures(source)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }
}

#[async_trait]
impl StreamExtractor for VidmolyExtractor {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Vidmoly
    }

    fn identify(&self, embed: &Url) -> bool {
        host_matches(embed, DOMAINS)
    }

    async fn extract(&self, embed: &Url) -> Result<String, ExtractionFailure> {
        let target = Self::normalize(embed);
        debug!("Fetching vidmoly embed {}", target);
        let page = self
            .fetcher
            .fetch(&FetchRequest::get(target.as_str()).with_header("Referer", embed.as_str()))
            .await?
            .body;

        if let Some(file) = Self::sources_file(&page) {
            return Ok(file);
        }

        if packer::is_packed(&page)
            && let Some(file) = packer::unpack_all(&page)
                .iter()
                .find_map(|script| Self::sources_file(script))
        {
            return Ok(file);
        }

        let lower = page.to_lowercase();
        if PROTECTION_MARKERS.iter().any(|marker| lower.contains(marker)) {
            return Err(ExtractionFailure::UnsupportedProtection(
                "vidmoly served a challenge page".to_string(),
            ));
        }

        find_media_url(&page, &target).ok_or_else(|| {
            ExtractionFailure::MalformedEmbed("no sources block on vidmoly page".to_string())
        })
    }
}
