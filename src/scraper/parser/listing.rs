use super::patterns::{PATTERNS, SELECTORS};
use super::{PageParser, element_text};
use crate::scraper::types::CatalogEntry;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use tracing::debug;

/// Homepage sections, in display order
pub const HOMEPAGE_CONTAINERS: &[&str] = &["containerSorties", "containerClassiques", "containerPepites"];

const SYNOPSIS_PLACEHOLDER: &str = "Synopsis bientôt disponible";

impl PageParser {
    /// Cards from the homepage sections, deduplicated by slug, scans-only
    /// entries dropped
    pub fn homepage_cards(html: &str) -> Vec<CatalogEntry> {
        let document = Html::parse_document(html);
        let mut seen = HashSet::new();
        let mut entries = Vec::new();

        for container in HOMEPAGE_CONTAINERS {
            let Ok(selector) = Selector::parse(&format!("div#{container} div.shrink-0")) else {
                continue;
            };

            let before = entries.len();
            for card in document.select(&selector) {
                let Some(link) = card.select(&SELECTORS.catalogue_link).next() else {
                    continue;
                };
                if let Some(entry) = Self::card(link)
                    && entry.is_watchable()
                    && seen.insert(entry.id.clone())
                {
                    entries.push(entry);
                }
            }
            debug!("{} cards from {}", entries.len() - before, container);
        }

        entries
    }

    /// Every catalogue link on a search result page
    pub fn search_cards(html: &str) -> Vec<CatalogEntry> {
        let document = Html::parse_document(html);
        let mut seen = HashSet::new();

        document
            .select(&SELECTORS.catalogue_link)
            .filter_map(Self::card)
            .filter(|entry| seen.insert(entry.id.clone()))
            .collect()
    }

    /// Parse one card anchor
    pub fn card(link: ElementRef<'_>) -> Option<CatalogEntry> {
        let slug = link.value().attr("href").and_then(Self::slug_from_href)?;

        let title = link
            .select(&SELECTORS.card_title)
            .next()
            .or_else(|| link.select(&SELECTORS.any_heading).next())
            .map(|element| Self::clean_title(&element.text().collect::<String>()))
            .filter(|title| !title.is_empty())
            .unwrap_or_else(|| slug.clone());

        let cover = link
            .select(&SELECTORS.card_image)
            .next()
            .or_else(|| link.select(&SELECTORS.any_image).next())
            .and_then(|img| img.value().attr("src"))
            .filter(|src| !src.is_empty())
            .map(str::to_string);

        let genres = Self::info_value(link, "genres")
            .map(|text| Self::split_genres(&text))
            .unwrap_or_default();

        let languages = Self::info_value(link, "langues")
            .map(|text| Self::split_genres(&text))
            .unwrap_or_default();

        let synopsis = link
            .select(&SELECTORS.synopsis)
            .next()
            .map(element_text)
            .filter(|text| !text.is_empty() && text != SYNOPSIS_PLACEHOLDER);

        Some(
            CatalogEntry::new(slug, title)
                .with_cover(cover)
                .with_genres(genres)
                .with_languages(languages)
                .with_synopsis(synopsis)
                .with_content_type(Self::info_value(link, "types")),
        )
    }

    fn info_value(card: ElementRef<'_>, label: &str) -> Option<String> {
        card.select(&SELECTORS.info_row).find_map(|row| {
            let matches = row
                .select(&SELECTORS.info_label)
                .next()
                .is_some_and(|span| element_text(span).to_lowercase().contains(label));
            if !matches {
                return None;
            }
            row.select(&SELECTORS.info_value)
                .next()
                .map(element_text)
                .filter(|value| !value.is_empty())
        })
    }

    /// Slugs listed on the weekly planning page
    pub fn planning_slugs(html: &str) -> Vec<String> {
        let mut slugs: Vec<String> = PATTERNS
            .planning_card
            .captures_iter(html)
            .filter_map(|caps| caps.get(1))
            .filter_map(|target| {
                target
                    .as_str()
                    .split('/')
                    .find(|segment| !segment.is_empty())
                    .map(str::to_string)
            })
            .collect();
        slugs.sort();
        slugs.dedup();
        slugs
    }
}
