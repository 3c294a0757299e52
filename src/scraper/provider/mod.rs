pub mod oneupload;
pub mod packer;
pub mod sendvid;
pub mod sibnet;
mod traits;
pub mod unknown;
pub mod vidmoly;

pub use oneupload::OneuploadExtractor;
pub use sendvid::SendvidExtractor;
pub use sibnet::SibnetExtractor;
pub use traits::{StreamExtractor, absolutize, host_matches};
pub use unknown::UnknownExtractor;
pub use vidmoly::VidmolyExtractor;

use crate::scraper::http::Fetcher;
use crate::scraper::types::{ExtractionFailure, ProviderKind};
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// Dispatches embed URLs to the extractor that claims their host
pub struct ExtractorRegistry {
    extractors: Vec<Arc<dyn StreamExtractor>>,
    fallback: Arc<dyn StreamExtractor>,
}

impl ExtractorRegistry {
    /// Registry with no extractor, every embed resolves to the fallback
    pub fn new() -> Self {
        Self {
            extractors: Vec::new(),
            fallback: Arc::new(UnknownExtractor),
        }
    }

    /// Registry with every supported host
    pub fn with_default_providers(fetcher: Arc<dyn Fetcher>) -> Self {
        let mut registry = Self::new();
        registry.register(SibnetExtractor::new(fetcher.clone()));
        registry.register(VidmolyExtractor::new(fetcher.clone()));
        registry.register(SendvidExtractor::new(fetcher.clone()));
        registry.register(OneuploadExtractor::new(fetcher));
        registry
    }

    pub fn register<E: StreamExtractor + 'static>(&mut self, extractor: E) {
        self.extractors.push(Arc::new(extractor));
    }

    pub fn kinds(&self) -> Vec<ProviderKind> {
        self.extractors.iter().map(|e| e.kind()).collect()
    }

    /// Extractor for a parsed embed URL
    pub fn select(&self, embed: &Url) -> &dyn StreamExtractor {
        self.extractors
            .iter()
            .find(|extractor| extractor.identify(embed))
            .unwrap_or(&self.fallback)
            .as_ref()
    }

    /// Provider behind an embed URL
    pub fn identify(&self, embed: &str) -> ProviderKind {
        Url::parse(embed.trim())
            .map(|url| self.select(&url).kind())
            .unwrap_or(ProviderKind::Unknown)
    }

    /// Run the matching extractor on one embed URL
    pub async fn extract(&self, embed: &str) -> Result<String, ExtractionFailure> {
        let url = Url::parse(embed.trim())
            .map_err(|e| ExtractionFailure::MalformedEmbed(format!("{embed}: {e}")))?;
        let extractor = self.select(&url);
        debug!("Extracting {} with {}", embed, extractor.kind());
        extractor.extract(&url).await
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
