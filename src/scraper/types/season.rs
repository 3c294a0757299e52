use super::{Language, ProviderKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Canonical number shared by every film block
pub const FILM_SEASON: u32 = 998;
/// Canonical number shared by every hors-série block
pub const HORS_SERIE_SEASON: u32 = 999;
/// Canonical number shared by specials and OAV blocks
pub const SPECIAL_SEASON: u32 = 0;

/// Classification of a season block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeasonKind {
    Normal,
    SubSeason,
    Film,
    HorsSerie,
    Special,
}

impl SeasonKind {
    /// Fixed canonical number for the container kinds
    pub const fn container_number(self) -> Option<u32> {
        match self {
            Self::Film => Some(FILM_SEASON),
            Self::HorsSerie => Some(HORS_SERIE_SEASON),
            Self::Special => Some(SPECIAL_SEASON),
            Self::Normal | Self::SubSeason => None,
        }
    }

    /// Containers collect every block of their kind under one number
    pub const fn is_container(self) -> bool {
        self.container_number().is_some()
    }
}

impl std::fmt::Display for SeasonKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "season"),
            Self::SubSeason => write!(f, "sub-season"),
            Self::Film => write!(f, "film"),
            Self::HorsSerie => write!(f, "hors-série"),
            Self::Special => write!(f, "special"),
        }
    }
}

/// Canonical season address: `number` alone, or `number-sub` for a sub-season
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeasonNumber {
    pub number: u32,
    pub sub: Option<u32>,
}

impl SeasonNumber {
    pub const fn new(number: u32) -> Self {
        Self { number, sub: None }
    }

    pub const fn sub(parent: u32, index: u32) -> Self {
        Self {
            number: parent,
            sub: Some(index),
        }
    }

    pub const fn film() -> Self {
        Self::new(FILM_SEASON)
    }

    pub const fn hors_serie() -> Self {
        Self::new(HORS_SERIE_SEASON)
    }

    pub const fn special() -> Self {
        Self::new(SPECIAL_SEASON)
    }

    pub const fn is_sub(&self) -> bool {
        self.sub.is_some()
    }

    /// Parent season number of a sub-season
    pub const fn parent(&self) -> Option<u32> {
        match self.sub {
            Some(_) => Some(self.number),
            None => None,
        }
    }
}

impl std::fmt::Display for SeasonNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.sub {
            Some(sub) => write!(f, "{}-{}", self.number, sub),
            None => write!(f, "{}", self.number),
        }
    }
}

impl FromStr for SeasonNumber {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |part: &str| {
            part.trim()
                .parse::<u32>()
                .map_err(|_| format!("Invalid season number: {s}"))
        };

        match s.split_once('-') {
            Some((number, sub)) => {
                let number = parse(number)?;
                if number == SPECIAL_SEASON || number >= FILM_SEASON {
                    return Err(format!("Season {number} has no sub-seasons: {s}"));
                }
                Ok(Self::sub(number, parse(sub)?))
            }
            None => Ok(Self::new(parse(s)?)),
        }
    }
}

/// One embed link for an episode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedRef {
    pub language: Language,
    pub url: String,
}

impl EmbedRef {
    pub fn new(language: Language, url: impl Into<String>) -> Self {
        Self {
            language,
            url: url.into(),
        }
    }
}

/// Episode inside a season unit, numbered from 1
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeRef {
    pub number: u32,
    /// Only films carry a title
    pub title: Option<String>,
    pub embeds: BTreeMap<ProviderKind, Vec<EmbedRef>>,
}

impl EpisodeRef {
    pub fn new(number: u32) -> Self {
        Self {
            number,
            title: None,
            embeds: BTreeMap::new(),
        }
    }

    /// Record an embed, ignoring exact duplicates
    pub fn add_embed(&mut self, provider: ProviderKind, embed: EmbedRef) {
        let links = self.embeds.entry(provider).or_default();
        if !links.contains(&embed) {
            links.push(embed);
        }
    }

    /// All embeds across providers
    pub fn all_embeds(&self) -> impl Iterator<Item = (ProviderKind, &EmbedRef)> {
        self.embeds
            .iter()
            .flat_map(|(provider, links)| links.iter().map(move |link| (*provider, link)))
    }

    pub fn embed_count(&self) -> usize {
        self.embeds.values().map(Vec::len).sum()
    }
}

/// Outcome of scraping one season unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SeasonStatus {
    Complete,
    /// Some language variants failed, the episodes listed are still usable
    Partial { reason: String },
    Failed { reason: String },
}

impl SeasonStatus {
    pub const fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Complete => None,
            Self::Partial { reason } | Self::Failed { reason } => Some(reason),
        }
    }
}

/// Canonical season with its episodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeasonUnit {
    pub number: SeasonNumber,
    pub kind: SeasonKind,
    /// Label shown on the site for the last block that landed here
    pub label: String,
    /// Site paths scraped for this unit; containers may hold several
    pub paths: Vec<String>,
    pub languages: Vec<Language>,
    pub episodes: Vec<EpisodeRef>,
    pub status: SeasonStatus,
}

impl SeasonUnit {
    pub fn new(number: SeasonNumber, kind: SeasonKind, label: impl Into<String>) -> Self {
        Self {
            number,
            kind,
            label: label.into(),
            paths: Vec::new(),
            languages: Vec::new(),
            episodes: Vec::new(),
            status: SeasonStatus::Complete,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.paths.push(path.into());
        self
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.add_language(language);
        self
    }

    pub fn add_language(&mut self, language: Language) {
        if !self.languages.contains(&language) {
            self.languages.push(language);
        }
    }

    pub const fn parent(&self) -> Option<u32> {
        self.number.parent()
    }

    pub fn episode(&self, number: u32) -> Option<&EpisodeRef> {
        self.episodes.iter().find(|episode| episode.number == number)
    }

    /// Append episodes after the current ones, renumbering them
    pub fn append_episodes(&mut self, episodes: Vec<EpisodeRef>) {
        let offset = self.episodes.len() as u32;
        self.episodes
            .extend(episodes.into_iter().enumerate().map(|(index, mut episode)| {
                episode.number = offset + index as u32 + 1;
                episode
            }));
    }
}
