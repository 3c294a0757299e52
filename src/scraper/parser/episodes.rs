use super::PageParser;
use super::patterns::PATTERNS;
use std::collections::BTreeSet;
use tracing::debug;
use url::Url;

const ASSET_EXTENSIONS: &[&str] = &[
    ".js", ".css", ".png", ".jpg", ".jpeg", ".gif", ".svg", ".ico", ".woff",
];

/// `creerListe` / `newSPF` markers from a season page.
///
/// The site builds its episode selector from ranges of regular episodes
/// with named specials between them. Player arrays list every entry in
/// that order, so the specials sit at predictable indices.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpecialMarkers {
    pub ranges: Vec<(u32, u32)>,
    pub names: Vec<String>,
    pub last_episode: Option<u32>,
}

impl SpecialMarkers {
    /// Zero-based array indices that hold specials
    pub fn special_indices(&self) -> BTreeSet<usize> {
        let mut indices = BTreeSet::new();
        if self.ranges.is_empty() || self.names.is_empty() {
            return indices;
        }

        let mut current = 0usize;
        for (position, (start, end)) in self.ranges.iter().enumerate() {
            current += end.saturating_sub(*start) as usize + 1;
            if position < self.names.len() {
                indices.insert(current);
                current += 1;
            }
        }
        indices
    }

    /// Regular episodes announced by the markers
    pub fn regular_episode_count(&self) -> u32 {
        let mut total: u32 = self
            .ranges
            .iter()
            .map(|(start, end)| end.saturating_sub(*start) + 1)
            .sum();
        if let (Some(last), Some((_, end))) = (self.last_episode, self.ranges.last())
            && last > *end
        {
            total += last - end;
        }
        total
    }
}

/// Episode players for one (season path, language) pair
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeasonPage {
    /// One list per player array, indexed by episode position. Entries that
    /// are not player links are kept as `None` so positions stay aligned.
    pub players: Vec<Vec<Option<String>>>,
    /// Named entries (film titles), in page order
    pub titles: Vec<String>,
    /// Specials dropped from every array
    pub removed_specials: usize,
}

impl SeasonPage {
    pub fn episode_count(&self) -> usize {
        self.players.iter().map(Vec::len).max().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.episode_count() == 0
    }
}

impl PageParser {
    /// Relative `episodes.js?filever=N` reference on a season page
    pub fn episodes_script(html: &str) -> Option<String> {
        PATTERNS
            .episodes_script
            .find(html)
            .map(|found| found.as_str().to_string())
    }

    /// Absolute URLs from every `var epsN = [...]` array
    pub fn player_arrays(script: &str) -> Vec<Vec<String>> {
        PATTERNS
            .eps_array
            .captures_iter(script)
            .filter_map(|caps| caps.get(1))
            .map(|body| {
                PATTERNS
                    .quoted
                    .captures_iter(body.as_str())
                    .filter_map(|caps| caps.get(1))
                    .map(|url| url.as_str().trim().to_string())
                    .filter(|url| url.contains("://"))
                    .collect::<Vec<_>>()
            })
            .filter(|urls| !urls.is_empty())
            .collect()
    }

    pub fn special_markers(html: &str) -> SpecialMarkers {
        let number = |caps: &regex::Captures<'_>, group: usize| {
            caps.get(group).and_then(|m| m.as_str().parse::<u32>().ok())
        };

        SpecialMarkers {
            ranges: PATTERNS
                .creer_liste
                .captures_iter(html)
                .filter_map(|caps| Some((number(&caps, 1)?, number(&caps, 2)?)))
                .collect(),
            names: PATTERNS
                .new_spf
                .captures_iter(html)
                .filter_map(|caps| caps.get(1))
                .map(|name| name.as_str().to_string())
                .collect(),
            last_episode: PATTERNS
                .finir_liste
                .captures_iter(html)
                .next()
                .and_then(|caps| number(&caps, 1)),
        }
    }

    /// Whether `url` points at a video player rather than a site asset
    pub fn is_player_url(url: &str, site_host: &str) -> bool {
        let Ok(parsed) = Url::parse(url.trim()) else {
            return false;
        };
        if !matches!(parsed.scheme(), "http" | "https") || url.contains('#') {
            return false;
        }

        let lower = url.to_lowercase();
        if ASSET_EXTENSIONS.iter().any(|ext| lower.contains(ext))
            || lower.contains("/public/")
            || lower.contains("/static/")
        {
            return false;
        }

        !(parsed.host_str() == Some(site_host) && parsed.path().starts_with("/catalogue/"))
    }

    /// Assemble a season page from its HTML and its episodes.js.
    ///
    /// Films keep every entry and take their titles from the named markers;
    /// other seasons drop specials so positions match episode numbers.
    pub fn season_page(html: &str, script: &str, site_host: &str, keep_named: bool) -> SeasonPage {
        let markers = Self::special_markers(html);
        let specials = if keep_named {
            BTreeSet::new()
        } else {
            markers.special_indices()
        };

        let players: Vec<Vec<Option<String>>> = Self::player_arrays(script)
            .into_iter()
            .map(|urls| {
                urls.into_iter()
                    .enumerate()
                    .filter(|(index, _)| !specials.contains(index))
                    .map(|(_, url)| Self::is_player_url(&url, site_host).then_some(url))
                    .collect()
            })
            .collect();

        if !specials.is_empty() {
            debug!("Dropped {} special entries from player arrays", specials.len());
        }

        SeasonPage {
            players,
            titles: if keep_named { markers.names } else { Vec::new() },
            removed_specials: specials.len(),
        }
    }
}
