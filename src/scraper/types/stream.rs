use super::Language;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Video host behind an embed link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Sibnet,
    Vidmoly,
    Sendvid,
    Oneupload,
    Unknown,
}

impl ProviderKind {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Sibnet => "sibnet",
            Self::Vidmoly => "vidmoly",
            Self::Sendvid => "sendvid",
            Self::Oneupload => "oneupload",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Why a single embed could not be resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ExtractionFailure {
    #[error("Network failure: {0}")]
    Network(String),

    #[error("Unsupported protection: {0}")]
    UnsupportedProtection(String),

    #[error("Malformed embed: {0}")]
    MalformedEmbed(String),

    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(String),
}

impl ExtractionFailure {
    /// Only network failures are worth another attempt
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StreamOutcome {
    Resolved { url: String },
    Failed { failure: ExtractionFailure },
}

/// Result of running one embed through its extractor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedStream {
    pub provider: ProviderKind,
    pub language: Language,
    pub embed_url: String,
    pub outcome: StreamOutcome,
    pub resolved_at: DateTime<Utc>,
}

impl ResolvedStream {
    pub fn url(&self) -> Option<&str> {
        match &self.outcome {
            StreamOutcome::Resolved { url } => Some(url),
            StreamOutcome::Failed { .. } => None,
        }
    }

    pub fn failure(&self) -> Option<&ExtractionFailure> {
        match &self.outcome {
            StreamOutcome::Resolved { .. } => None,
            StreamOutcome::Failed { failure } => Some(failure),
        }
    }

    pub const fn is_resolved(&self) -> bool {
        matches!(self.outcome, StreamOutcome::Resolved { .. })
    }
}

/// Caller-side language filter and ordering for stream lists
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamPreferences {
    /// Keep only this language (dubbed variants count as `Vf`)
    pub language: Option<Language>,
    /// Languages listed first sort first
    pub priority: Vec<Language>,
}

impl StreamPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_language(mut self, language: Option<Language>) -> Self {
        self.language = language;
        self
    }

    pub fn with_priority(mut self, priority: Vec<Language>) -> Self {
        self.priority = priority;
        self
    }

    /// Filter and order streams, keeping the original order among equals
    pub fn apply(&self, streams: Vec<ResolvedStream>) -> Vec<ResolvedStream> {
        let mut kept: Vec<ResolvedStream> = streams
            .into_iter()
            .filter(|stream| {
                self.language
                    .is_none_or(|wanted| stream.language.normalized() == wanted.normalized())
            })
            .collect();

        if !self.priority.is_empty() {
            kept.sort_by_key(|stream| {
                self.priority
                    .iter()
                    .position(|language| language.normalized() == stream.language.normalized())
                    .unwrap_or(self.priority.len())
            });
        }

        kept
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(language: Language, url: &str) -> ResolvedStream {
        ResolvedStream {
            provider: ProviderKind::Sendvid,
            language,
            embed_url: url.to_string(),
            outcome: StreamOutcome::Resolved {
                url: format!("{url}.mp4"),
            },
            resolved_at: Utc::now(),
        }
    }

    #[test]
    fn test_preferences_filter_treats_vf_variants_alike() {
        let streams = vec![
            stream(Language::Vostfr, "a"),
            stream(Language::Vf1, "b"),
            stream(Language::Vf, "c"),
        ];
        let kept = StreamPreferences::new()
            .with_language(Some(Language::Vf))
            .apply(streams);
        let urls: Vec<&str> = kept.iter().map(|s| s.embed_url.as_str()).collect();
        assert_eq!(urls, vec!["b", "c"]);
    }

    #[test]
    fn test_preferences_priority_is_stable() {
        let streams = vec![
            stream(Language::Vostfr, "a"),
            stream(Language::Vf, "b"),
            stream(Language::Vostfr, "c"),
        ];
        let kept = StreamPreferences::new()
            .with_priority(vec![Language::Vf, Language::Vostfr])
            .apply(streams);
        let urls: Vec<&str> = kept.iter().map(|s| s.embed_url.as_str()).collect();
        assert_eq!(urls, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_failure_serializes_with_kind_tag() {
        let failure = ExtractionFailure::MalformedEmbed("no source".to_string());
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["kind"], "malformed_embed");
        assert!(!failure.is_retryable());
        assert!(ExtractionFailure::Network("reset".into()).is_retryable());
    }
}
