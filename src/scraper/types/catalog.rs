use super::{EpisodeRef, Language, SeasonKind, SeasonNumber, SeasonUnit};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Airing status, drives the adaptive cache lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AnimeStatus {
    #[default]
    Ongoing,
    Finished,
}

impl std::fmt::Display for AnimeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ongoing => write!(f, "ongoing"),
            Self::Finished => write!(f, "finished"),
        }
    }
}

/// Listing type used by the site's search page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentType {
    Anime,
    Film,
}

impl ContentType {
    pub const ALL: [Self; 2] = [Self::Anime, Self::Film];

    pub const fn query_value(self) -> &'static str {
        match self {
            Self::Anime => "Anime",
            Self::Film => "Film",
        }
    }
}

/// One anime as listed on the site
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Site slug, also used as the cache identity
    pub id: String,
    pub title: String,
    pub genres: BTreeSet<String>,
    pub cover: Option<String>,
    pub synopsis: Option<String>,
    /// Language labels shown on the listing card
    pub languages: Vec<String>,
    /// Raw type label from the card (for example "Anime, Scans")
    pub content_type: Option<String>,
}

impl CatalogEntry {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            genres: BTreeSet::new(),
            cover: None,
            synopsis: None,
            languages: Vec::new(),
            content_type: None,
        }
    }

    /// Builder pattern: add genres
    pub fn with_genres<I, S>(mut self, genres: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.genres.extend(genres.into_iter().map(Into::into));
        self
    }

    /// Builder pattern: set cover URL
    pub fn with_cover(mut self, cover: Option<String>) -> Self {
        self.cover = cover;
        self
    }

    /// Builder pattern: set synopsis
    pub fn with_synopsis(mut self, synopsis: Option<String>) -> Self {
        self.synopsis = synopsis;
        self
    }

    /// Builder pattern: set language labels
    pub fn with_languages(mut self, languages: Vec<String>) -> Self {
        self.languages = languages;
        self
    }

    /// Builder pattern: set the raw type label
    pub fn with_content_type(mut self, content_type: Option<String>) -> Self {
        self.content_type = content_type;
        self
    }

    /// Anime or film listing, as opposed to scans only
    pub fn is_watchable(&self) -> bool {
        self.content_type.as_deref().is_none_or(|raw| {
            let lower = raw.to_lowercase();
            lower.contains("anime") || lower.contains("film")
        })
    }

    pub fn has_genre(&self, genre: &str) -> bool {
        let wanted = genre.trim().to_lowercase();
        self.genres.iter().any(|g| g.to_lowercase() == wanted)
    }

    pub fn has_language(&self, language: Language) -> bool {
        self.languages.iter().any(|label| {
            label
                .parse::<Language>()
                .is_ok_and(|parsed| parsed.normalized() == language.normalized())
        })
    }
}

/// Catalog lookup: homepage when `search` is empty
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogQuery {
    pub search: Option<String>,
    pub language: Option<Language>,
    pub genre: Option<String>,
}

impl CatalogQuery {
    pub fn homepage() -> Self {
        Self::default()
    }

    pub fn search(query: impl Into<String>) -> Self {
        Self {
            search: Some(query.into()),
            ..Self::default()
        }
    }

    pub fn with_language(mut self, language: Option<Language>) -> Self {
        self.language = language;
        self
    }

    pub fn with_genre(mut self, genre: Option<String>) -> Self {
        self.genre = genre;
        self
    }

    /// Trimmed search text, `None` when blank
    pub fn search_text(&self) -> Option<&str> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|query| !query.is_empty())
    }

    /// Apply the language and genre filters to listed entries
    pub fn filter(&self, entries: Vec<CatalogEntry>) -> Vec<CatalogEntry> {
        entries
            .into_iter()
            .filter(|entry| self.language.is_none_or(|language| entry.has_language(language)))
            .filter(|entry| self.genre.as_deref().is_none_or(|genre| entry.has_genre(genre)))
            .collect()
    }
}

/// Landing-page data plus every resolved season
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnimeDetail {
    pub entry: CatalogEntry,
    pub status: AnimeStatus,
    pub seasons: Vec<SeasonUnit>,
    /// Blocks the season resolver could not place
    pub warnings: Vec<String>,
    pub scraped_at: DateTime<Utc>,
}

impl AnimeDetail {
    pub fn season(&self, number: SeasonNumber) -> Option<&SeasonUnit> {
        self.seasons.iter().find(|unit| unit.number == number)
    }

    /// Sub-seasons of `parent`, in canonical order
    pub fn sub_seasons_of(&self, parent: u32) -> Vec<&SeasonUnit> {
        let mut subs: Vec<&SeasonUnit> = self
            .seasons
            .iter()
            .filter(|unit| unit.kind == SeasonKind::SubSeason && unit.parent() == Some(parent))
            .collect();
        subs.sort_by_key(|unit| unit.number);
        subs
    }

    /// Parent unit of a sub-season, when the site lists one
    pub fn parent_of(&self, unit: &SeasonUnit) -> Option<&SeasonUnit> {
        unit.parent()
            .and_then(|parent| self.season(SeasonNumber::new(parent)))
    }

    /// True when any season failed or came back incomplete
    pub fn is_partial(&self) -> bool {
        self.seasons.iter().any(|unit| !unit.status.is_complete())
    }

    pub fn episode_count(&self) -> usize {
        self.seasons.iter().map(|unit| unit.episodes.len()).sum()
    }

    /// Find an episode by its public address.
    ///
    /// Sub-seasons and containers are addressed directly. A normal season
    /// number past the parent's own episodes continues into its
    /// sub-seasons, in order, but only through units that were scraped
    /// completely; otherwise the count is unknown and the lookup reports
    /// the unit that blocks it.
    pub fn locate_episode(&self, season: SeasonNumber, episode: u32) -> EpisodeLocation<'_> {
        if episode == 0 {
            return EpisodeLocation::Missing;
        }
        let Some(unit) = self.season(season) else {
            return EpisodeLocation::Missing;
        };

        if let Some(found) = unit.episode(episode) {
            return EpisodeLocation::Found(unit, found);
        }
        if !unit.status.is_complete() {
            return EpisodeLocation::Unavailable(unit);
        }
        if season.is_sub() || season.number == 0 || season.number >= super::FILM_SEASON {
            return EpisodeLocation::Missing;
        }

        let Some(mut remaining) = episode.checked_sub(unit.episodes.len() as u32) else {
            return EpisodeLocation::Missing;
        };
        for sub in self.sub_seasons_of(season.number) {
            let count = sub.episodes.len() as u32;
            if remaining <= count {
                return match sub.episode(remaining) {
                    Some(found) => EpisodeLocation::Found(sub, found),
                    None if sub.status.is_complete() => EpisodeLocation::Missing,
                    None => EpisodeLocation::Unavailable(sub),
                };
            }
            if !sub.status.is_complete() {
                return EpisodeLocation::Unavailable(sub);
            }
            remaining -= count;
        }

        EpisodeLocation::Missing
    }
}

/// Where an episode address landed in a scraped detail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpisodeLocation<'a> {
    Found(&'a SeasonUnit, &'a EpisodeRef),
    /// The unit that would hold the episode was not scraped completely
    Unavailable(&'a SeasonUnit),
    Missing,
}

impl<'a> EpisodeLocation<'a> {
    pub fn found(self) -> Option<(&'a SeasonUnit, &'a EpisodeRef)> {
        match self {
            Self::Found(unit, episode) => Some((unit, episode)),
            _ => None,
        }
    }
}
