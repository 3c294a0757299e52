use crate::scraper::http::FetchError;
use crate::scraper::types::{ExtractionFailure, ProviderKind};
use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;
use url::Url;

static MEDIA_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"['"]([^'"\s]*/[^'"\s]*\.(m3u8|mp4|mkv)[^'"\s]*)['"]"#).expect("Invalid media url regex")
});

/// Core trait for stream extractors
#[async_trait]
pub trait StreamExtractor: Send + Sync {
    /// Provider handled by this extractor
    fn kind(&self) -> ProviderKind;

    /// Whether this extractor handles `embed`
    fn identify(&self, embed: &Url) -> bool;

    /// Resolve an embed page to a direct stream URL
    async fn extract(&self, embed: &Url) -> Result<String, ExtractionFailure>;
}

/// Host equals one of `domains` or is a subdomain of one
pub fn host_matches(url: &Url, domains: &[&str]) -> bool {
    let Some(host) = url.host_str() else {
        return false;
    };
    let host = host.trim_start_matches("www.").to_ascii_lowercase();
    domains
        .iter()
        .any(|domain| host == *domain || host.ends_with(&format!(".{domain}")))
}

/// Turn `//host/path` and `/path` references into absolute URLs
pub fn absolutize(reference: &str, base: &Url) -> Option<String> {
    let reference = reference.trim();
    if reference.starts_with("//") {
        return Some(format!("{}:{}", base.scheme(), reference));
    }
    base.join(reference).ok().map(String::from)
}

/// First quoted media URL in `source` served from another host than the
/// embed page, HLS playlists preferred over files
pub fn find_media_url(source: &str, embed: &Url) -> Option<String> {
    let mut candidates: Vec<(usize, String)> = MEDIA_URL
        .captures_iter(source)
        .filter_map(|caps| {
            let rank = match caps.get(2)?.as_str() {
                "m3u8" => 0,
                "mp4" => 1,
                _ => 2,
            };
            let url = absolutize(caps.get(1)?.as_str(), embed)?;
            let parsed = Url::parse(&url).ok()?;
            (parsed.host_str() != embed.host_str()).then_some((rank, url))
        })
        .collect();

    candidates.sort_by_key(|(rank, _)| *rank);
    candidates.into_iter().next().map(|(_, url)| url)
}

impl From<FetchError> for ExtractionFailure {
    fn from(err: FetchError) -> Self {
        match &err {
            _ if err.is_retryable() => Self::Network(err.to_string()),
            FetchError::Status {
                status: 401 | 403 | 451,
                ..
            } => Self::UnsupportedProtection(err.to_string()),
            FetchError::Status { .. } | FetchError::InvalidUrl(_) => {
                Self::MalformedEmbed(err.to_string())
            }
            _ => Self::Network(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_matches_subdomains() {
        let url = Url::parse("https://video.sibnet.ru/shell.php?videoid=1").unwrap();
        assert!(host_matches(&url, &["sibnet.ru"]));
        let url = Url::parse("https://notsibnet.ru/x").unwrap();
        assert!(!host_matches(&url, &["sibnet.ru"]));
        let url = Url::parse("https://www.sendvid.com/embed/x").unwrap();
        assert!(host_matches(&url, &["sendvid.com"]));
    }

    #[test]
    fn test_absolutize() {
        let base = Url::parse("https://video.sibnet.ru/shell.php?videoid=1").unwrap();
        assert_eq!(
            absolutize("//dv.sibnet.ru/v/a.mp4", &base).unwrap(),
            "https://dv.sibnet.ru/v/a.mp4"
        );
        assert_eq!(
            absolutize("/v/abc.mp4", &base).unwrap(),
            "https://video.sibnet.ru/v/abc.mp4"
        );
        assert_eq!(
            absolutize("https://cdn.tld/x.m3u8", &base).unwrap(),
            "https://cdn.tld/x.m3u8"
        );
    }

    #[test]
    fn test_find_media_url_prefers_hls_on_other_hosts() {
        let embed = Url::parse("https://sendvid.com/embed/abc").unwrap();
        let html = r#"
            <img src="https://sendvid.com/thumb/abc.mp4.jpg">
            <source src="https://videos2.sendvid.com/abc.mp4?token=1">
            var hls = 'https://cdn.tld/abc/master.m3u8';
        "#;
        assert_eq!(
            find_media_url(html, &embed).as_deref(),
            Some("https://cdn.tld/abc/master.m3u8")
        );
        assert!(find_media_url("<p>nothing</p>", &embed).is_none());
    }

    #[test]
    fn test_fetch_error_classification() {
        let status = |status| FetchError::Status {
            url: "u".into(),
            status,
        };
        assert!(matches!(
            ExtractionFailure::from(status(503)),
            ExtractionFailure::Network(_)
        ));
        assert!(matches!(
            ExtractionFailure::from(status(403)),
            ExtractionFailure::UnsupportedProtection(_)
        ));
        assert!(matches!(
            ExtractionFailure::from(status(404)),
            ExtractionFailure::MalformedEmbed(_)
        ));
    }
}
