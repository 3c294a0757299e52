//! Pure parsing of the site's HTML and JavaScript. No I/O happens here.

mod episodes;
mod listing;
mod page;
mod patterns;

pub use episodes::{SeasonPage, SpecialMarkers};
pub use page::{LandingPage, RawSeasonBlock};

pub(crate) use patterns::PATTERNS;
use scraper::ElementRef;

/// Stateless parser for every page type the site serves
pub struct PageParser;

impl PageParser {
    /// Drop `/* ... */` comments, the site keeps disabled seasons in them
    pub fn strip_block_comments(source: &str) -> String {
        PATTERNS.block_comment.replace_all(source, "").into_owned()
    }

    /// Collapse whitespace
    pub fn clean_text(text: &str) -> String {
        PATTERNS.whitespace.replace_all(text.trim(), " ").into_owned()
    }

    /// Remove a trailing language marker such as " (VOSTFR)"
    pub fn clean_title(title: &str) -> String {
        let collapsed = Self::clean_text(title);
        PATTERNS
            .title_suffix
            .replace(&collapsed, "")
            .trim()
            .to_string()
    }

    pub fn split_genres(text: &str) -> Vec<String> {
        PATTERNS
            .genre_separator
            .split(text)
            .map(str::trim)
            .filter(|genre| !genre.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Slug from a `/catalogue/<slug>/...` link, absolute or relative
    pub fn slug_from_href(href: &str) -> Option<String> {
        let (_, rest) = href.split_once("/catalogue/")?;
        rest.split(['/', '?', '#'])
            .next()
            .map(str::trim)
            .filter(|slug| !slug.is_empty())
            .map(str::to_string)
    }
}

fn element_text(element: ElementRef<'_>) -> String {
    PageParser::clean_text(&element.text().collect::<String>())
}
