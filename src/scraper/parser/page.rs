use super::patterns::{PATTERNS, SELECTORS};
use super::{PageParser, element_text};
use crate::scraper::types::{CatalogEntry, Language};
use scraper::{ElementRef, Html};
use tracing::debug;

/// One `panneauAnime(label, url)` call from a landing page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSeasonBlock {
    pub label: String,
    pub url: String,
    /// Season path segment, e.g. `saison2-2` or `film`
    pub path: String,
    pub language: Option<Language>,
}

impl RawSeasonBlock {
    /// Split a panel URL such as `saison2-2/vostfr` into path and language
    pub fn from_panel(label: &str, url: &str) -> Self {
        let segments: Vec<&str> = url
            .trim()
            .trim_end_matches('/')
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect();

        let (path, language) = match segments.as_slice() {
            [.., path, last] => match last.parse::<Language>() {
                Ok(language) => (path.to_string(), Some(language)),
                Err(_) => (last.to_string(), None),
            },
            [only] => (only.to_string(), None),
            [] => (String::new(), None),
        };

        Self {
            label: label.trim().to_string(),
            url: url.trim().to_string(),
            path: path.to_lowercase(),
            language,
        }
    }

    /// Block built from a label alone, path left to the resolver
    pub fn labelled(label: &str) -> Self {
        Self {
            label: label.trim().to_string(),
            url: String::new(),
            path: String::new(),
            language: None,
        }
    }
}

/// Parsed anime landing page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LandingPage {
    pub entry: CatalogEntry,
    pub blocks: Vec<RawSeasonBlock>,
}

impl PageParser {
    /// Parse an anime landing page. The title stays empty when the page has none.
    pub fn landing(html: &str, slug: &str) -> LandingPage {
        let document = Html::parse_document(html);

        let title = document
            .select(&SELECTORS.title)
            .next()
            .or_else(|| document.select(&SELECTORS.fallback_title).next())
            .map(|element| Self::clean_title(&element.text().collect::<String>()))
            .unwrap_or_default();

        let cover = document
            .select(&SELECTORS.cover)
            .next()
            .and_then(|img| img.value().attr("src"))
            .map(str::to_string)
            .filter(|src| !src.is_empty());

        let synopsis = Self::section_sibling(&document, "synopsis", "p")
            .map(element_text)
            .filter(|text| !text.is_empty());

        let genres = Self::section_sibling(&document, "genres", "a")
            .map(|element| Self::split_genres(&element_text(element)))
            .unwrap_or_default();

        let blocks = Self::season_blocks(html);
        let mut languages: Vec<Language> = blocks.iter().filter_map(|block| block.language).collect();
        languages.sort();
        languages.dedup();
        if languages.is_empty() {
            languages.push(Language::Vostfr);
        }

        debug!(
            "Parsed landing page for {}: {} season blocks",
            slug,
            blocks.len()
        );

        LandingPage {
            entry: CatalogEntry::new(slug, title)
                .with_cover(cover)
                .with_synopsis(synopsis)
                .with_genres(genres)
                .with_languages(languages.iter().map(ToString::to_string).collect()),
            blocks,
        }
    }

    /// Every live `panneauAnime` call, skipping the template placeholder
    pub fn season_blocks(html: &str) -> Vec<RawSeasonBlock> {
        let cleaned = Self::strip_block_comments(html);

        PATTERNS
            .panneau_anime
            .captures_iter(&cleaned)
            .filter_map(|caps| {
                let label = caps.get(1)?.as_str();
                let url = caps.get(2)?.as_str();
                (label != "nom" || url != "url").then(|| RawSeasonBlock::from_panel(label, url))
            })
            .collect()
    }

    /// First `<tag>` sibling after the `<h2>` whose text contains `heading`
    fn section_sibling<'a>(document: &'a Html, heading: &str, tag: &str) -> Option<ElementRef<'a>> {
        let header = document
            .select(&SELECTORS.heading)
            .find(|h2| element_text(*h2).to_lowercase().contains(heading))?;

        header
            .next_siblings()
            .filter_map(ElementRef::wrap)
            .find(|sibling| sibling.value().name() == tag)
    }
}
