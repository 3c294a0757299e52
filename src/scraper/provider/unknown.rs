use super::traits::StreamExtractor;
use crate::scraper::types::{ExtractionFailure, ProviderKind};
use async_trait::async_trait;
use url::Url;

/// Fallback for hosts no extractor claims
#[derive(Debug, Default, Clone, Copy)]
pub struct UnknownExtractor;

#[async_trait]
impl StreamExtractor for UnknownExtractor {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Unknown
    }

    fn identify(&self, _embed: &Url) -> bool {
        false
    }

    async fn extract(&self, embed: &Url) -> Result<String, ExtractionFailure> {
        Err(ExtractionFailure::UnsupportedProvider(
            embed.host_str().unwrap_or("unknown host").to_string(),
        ))
    }
}
