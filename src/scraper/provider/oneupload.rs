use super::packer;
use super::traits::{StreamExtractor, find_media_url, host_matches};
use crate::scraper::http::{FetchRequest, Fetcher};
use crate::scraper::types::{ExtractionFailure, ProviderKind};
use async_trait::async_trait;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use url::Url;

const DOMAINS: &[&str] = &["oneupload.to", "oneupload.net"];

const REMOVED_MARKERS: &[&str] = &["file not found", "file was deleted", "file is no longer available"];

static FILE_ENTRY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"file\s*:\s*["']([^"']+\.(?:m3u8|mp4)[^"']*)["']"#).expect("Invalid oneupload file regex")
});

/// Oneupload: JWPlayer setup hidden in a packed script
pub struct OneuploadExtractor {
    fetcher: Arc<dyn Fetcher>,
}

impl OneuploadExtractor {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self { fetcher }
    }

    fn player_file(source: &str) -> Option<String> {
        FILE_ENTRY
            .captures(source)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }
}

#[async_trait]
impl StreamExtractor for OneuploadExtractor {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Oneupload
    }

    fn identify(&self, embed: &Url) -> bool {
        host_matches(embed, DOMAINS)
    }

    async fn extract(&self, embed: &Url) -> Result<String, ExtractionFailure> {
        let page = self
            .fetcher
            .fetch(&FetchRequest::get(embed.as_str()))
            .await?
            .body;

        let unpacked = if packer::is_packed(&page) {
            packer::unpack_all(&page)
        } else {
            Vec::new()
        };

        if let Some(file) = unpacked
            .iter()
            .find_map(|script| Self::player_file(script))
            .or_else(|| Self::player_file(&page))
        {
            return Ok(file);
        }

        let lower = page.to_lowercase();
        if REMOVED_MARKERS.iter().any(|marker| lower.contains(marker)) {
            return Err(ExtractionFailure::MalformedEmbed(
                "file removed from oneupload".to_string(),
            ));
        }

        unpacked
            .iter()
            .find_map(|script| find_media_url(script, embed))
            .or_else(|| find_media_url(&page, embed))
            .ok_or_else(|| ExtractionFailure::MalformedEmbed("no player setup on oneupload page".to_string()))
    }
}
