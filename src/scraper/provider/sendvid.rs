use super::traits::{StreamExtractor, absolutize, find_media_url, host_matches};
use crate::scraper::http::{FetchRequest, Fetcher};
use crate::scraper::types::{ExtractionFailure, ProviderKind};
use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use std::sync::{Arc, LazyLock};
use url::Url;

const DOMAINS: &[&str] = &["sendvid.com"];

static VIDEO_SOURCE_VAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"video_source\s*=\s*["']([^"']+)["']"#).expect("Invalid sendvid source regex")
});

static SOURCE_TAG: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("video source[src], source[src]").expect("Invalid source selector"));

static OG_VIDEO: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("meta[property='og:video'], meta[property='og:video:secure_url']")
        .expect("Invalid og:video selector")
});

/// Sendvid: plain `<source>` tag, with `og:video` and a script variable as
/// fallbacks
pub struct SendvidExtractor {
    fetcher: Arc<dyn Fetcher>,
}

impl SendvidExtractor {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self { fetcher }
    }

    fn locate(page: &str, embed: &Url) -> Option<String> {
        let document = Html::parse_document(page);

        let from_tags = document
            .select(&SOURCE_TAG)
            .filter_map(|tag| tag.value().attr("src"))
            .chain(
                document
                    .select(&OG_VIDEO)
                    .filter_map(|meta| meta.value().attr("content")),
            )
            .find(|src| !src.trim().is_empty())
            .map(str::to_string);

        from_tags
            .or_else(|| {
                VIDEO_SOURCE_VAR
                    .captures(page)
                    .and_then(|caps| caps.get(1))
                    .map(|m| m.as_str().to_string())
            })
            .and_then(|src| absolutize(&src, embed))
            .or_else(|| find_media_url(page, embed))
    }
}

#[async_trait]
impl StreamExtractor for SendvidExtractor {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Sendvid
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

        Self::locate(&page, embed).ok_or_else(|| {
            ExtractionFailure::MalformedEmbed("no video source on sendvid page".to_string())
        })
    }
}
