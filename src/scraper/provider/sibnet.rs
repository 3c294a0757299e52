use super::traits::{StreamExtractor, absolutize, host_matches};
use crate::scraper::http::{FetchRequest, Fetcher};
use crate::scraper::types::{ExtractionFailure, ProviderKind};
use async_trait::async_trait;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use tracing::debug;
use url::Url;

const DOMAINS: &[&str] = &["sibnet.ru"];
const VIDEO_HOST: &str = "https://video.sibnet.ru";

static PLAYER_SRC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"player\.src\(\s*\[\s*\{\s*src\s*:\s*["']([^"']+)["']"#)
        .expect("Invalid sibnet player regex")
});

/// Sibnet: the shell page names a relative media path that redirects to
/// the CDN file
pub struct SibnetExtractor {
    fetcher: Arc<dyn Fetcher>,
}

impl SibnetExtractor {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl StreamExtractor for SibnetExtractor {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Sibnet
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

        let Some(source) = PLAYER_SRC
            .captures(&page)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
        else {
            let lower = page.to_lowercase();
            if lower.contains("заблокировано") || lower.contains("blocked") {
                return Err(ExtractionFailure::UnsupportedProtection(
                    "video blocked by the host".to_string(),
                ));
            }
            return Err(ExtractionFailure::MalformedEmbed(
                "no player source on sibnet page".to_string(),
            ));
        };

        let base = Url::parse(VIDEO_HOST).map_err(|e| ExtractionFailure::MalformedEmbed(e.to_string()))?;
        let media = absolutize(&source, &base)
            .ok_or_else(|| ExtractionFailure::MalformedEmbed(format!("bad player source {source}")))?;

        let request = FetchRequest::get(&media)
            .without_redirects()
            .without_body()
            .with_header("Referer", embed.as_str())
            .with_header("Accept", "*/*")
            .with_header("Range", "bytes=0-");
        let response = self.fetcher.fetch(&request).await?;

        if response.is_redirect() {
            let location = response.location.ok_or_else(|| {
                ExtractionFailure::MalformedEmbed("redirect without location".to_string())
            })?;
            let media_url = Url::parse(&media).map_err(|e| ExtractionFailure::MalformedEmbed(e.to_string()))?;
            return absolutize(&location, &media_url).ok_or_else(|| {
                ExtractionFailure::MalformedEmbed(format!("bad redirect location {location}"))
            });
        }

        debug!("Sibnet served {} directly", media);
        Ok(media)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scraper::tests::fixtures::ScriptedFetcher;
    use crate::scraper::http::FetchResponse;

    const SHELL: &str = r#"<script>player.src([{src: "/v/a1b2c3/4242.mp4", type: "video/mp4"}]);</script>"#;

    #[tokio::test]
    async fn test_follows_redirect_location() {
        let fetcher = ScriptedFetcher::new()
            .page("https://video.sibnet.ru/shell.php?videoid=4242", SHELL)
            .respond(
                "https://video.sibnet.ru/v/a1b2c3/4242.mp4",
                FetchResponse::redirect(
                    "https://video.sibnet.ru/v/a1b2c3/4242.mp4",
                    "//dv98.sibnet.ru/43/4242.mp4?st=abc",
                ),
            );
        let extractor = SibnetExtractor::new(Arc::new(fetcher));
        let embed = Url::parse("https://video.sibnet.ru/shell.php?videoid=4242").unwrap();

        assert!(extractor.identify(&embed));
        assert_eq!(
            extractor.extract(&embed).await.unwrap(),
            "https://dv98.sibnet.ru/43/4242.mp4?st=abc"
        );
    }

    #[tokio::test]
    async fn test_missing_player_is_malformed() {
        let fetcher = ScriptedFetcher::new().page("https://video.sibnet.ru/shell.php?videoid=1", "<html></html>");
        let extractor = SibnetExtractor::new(Arc::new(fetcher));
        let embed = Url::parse("https://video.sibnet.ru/shell.php?videoid=1").unwrap();
        assert!(matches!(
            extractor.extract(&embed).await,
            Err(ExtractionFailure::MalformedEmbed(_))
        ));
    }
}
