//! Season resolution: maps the site's free-form season blocks onto the
//! canonical numbering and assembles episodes from player arrays.

use crate::scraper::parser::{PATTERNS, RawSeasonBlock, SeasonPage};
use crate::scraper::types::{
    EmbedRef, EpisodeRef, FILM_SEASON, Language, ProviderKind, SeasonKind, SeasonNumber, SeasonUnit,
};
use std::collections::BTreeMap;
use tracing::warn;

/// Units produced from a landing page, with the blocks that were dropped
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedSeasons {
    pub units: Vec<SeasonUnit>,
    pub warnings: Vec<String>,
}

pub struct SeasonResolver;

impl SeasonResolver {
    /// Canonical number and kind for one block, `None` when unrecognized.
    ///
    /// The path is authoritative when it is numeric, then container
    /// markers apply, and the label is the last resort.
    pub fn classify(label: &str, path: &str) -> Option<(SeasonNumber, SeasonKind)> {
        let label = label.trim().to_lowercase();
        let path = path.trim().to_lowercase();

        if let Some(caps) = PATTERNS.season_path.captures(&path) {
            return Self::numeric(&caps);
        }

        if label.contains("film") || label.contains("movie") || path.contains("film") {
            return Some((SeasonNumber::film(), SeasonKind::Film));
        }

        if PATTERNS.hors_serie_path.is_match(&path) || PATTERNS.hors_serie_label.is_match(&label) {
            return Some((SeasonNumber::hors_serie(), SeasonKind::HorsSerie));
        }

        if PATTERNS.special_label.is_match(&label) || path.starts_with("oav") || path.starts_with("special") {
            return Some((SeasonNumber::special(), SeasonKind::Special));
        }

        PATTERNS
            .season_label
            .captures(&label)
            .and_then(|caps| Self::numeric(&caps))
    }

    fn numeric(caps: &regex::Captures<'_>) -> Option<(SeasonNumber, SeasonKind)> {
        let number = caps.get(1)?.as_str().parse::<u32>().ok()?;
        let sub = match caps.get(2) {
            Some(sub) => Some(sub.as_str().parse::<u32>().ok()?),
            None => None,
        };

        match (number, sub) {
            (0, _) => Some((SeasonNumber::special(), SeasonKind::Special)),
            // would collide with the container numbers
            (number, _) if number >= FILM_SEASON => None,
            (number, Some(sub)) => Some((SeasonNumber::sub(number, sub), SeasonKind::SubSeason)),
            (number, None) => Some((SeasonNumber::new(number), SeasonKind::Normal)),
        }
    }

    /// Path scraped for a unit whose block carried only a label
    pub fn default_path(number: SeasonNumber, kind: SeasonKind) -> String {
        match kind {
            SeasonKind::Normal | SeasonKind::SubSeason => format!("saison{number}"),
            SeasonKind::Film => "film".to_string(),
            SeasonKind::HorsSerie => "hs".to_string(),
            SeasonKind::Special => "oav".to_string(),
        }
    }

    /// Build canonical units from raw blocks.
    ///
    /// Blocks with the same path merge their languages. A different path
    /// landing on an existing normal or sub-season number replaces it (last
    /// write wins); container kinds collect every path instead.
    pub fn resolve(blocks: &[RawSeasonBlock]) -> ResolvedSeasons {
        let mut units: BTreeMap<SeasonNumber, SeasonUnit> = BTreeMap::new();
        let mut warnings = Vec::new();

        for block in blocks {
            let Some((number, kind)) = Self::classify(&block.label, &block.path) else {
                warn!(
                    "Unrecognized season block '{}' ({}), dropping it",
                    block.label, block.path
                );
                warnings.push(format!(
                    "unrecognized season block '{}' ({})",
                    block.label, block.path
                ));
                continue;
            };

            let path = if block.path.is_empty() {
                Self::default_path(number, kind)
            } else {
                block.path.clone()
            };

            match units.get_mut(&number) {
                Some(unit) if unit.paths.contains(&path) => {
                    unit.label = block.label.clone();
                    if let Some(language) = block.language {
                        unit.add_language(language);
                    }
                }
                Some(unit) if kind.is_container() => {
                    unit.paths.push(path);
                    if let Some(language) = block.language {
                        unit.add_language(language);
                    }
                }
                Some(unit) => {
                    warn!(
                        "Season {} listed twice ('{}' then '{}'), keeping the last",
                        number, unit.label, block.label
                    );
                    *unit = Self::unit_from(number, kind, block, path);
                }
                None => {
                    units.insert(number, Self::unit_from(number, kind, block, path));
                }
            }
        }

        ResolvedSeasons {
            units: units.into_values().collect(),
            warnings,
        }
    }

    fn unit_from(number: SeasonNumber, kind: SeasonKind, block: &RawSeasonBlock, path: String) -> SeasonUnit {
        let unit = SeasonUnit::new(number, kind, block.label.clone()).with_path(path);
        match block.language {
            Some(language) => unit.with_language(language),
            None => unit,
        }
    }

    /// Merge the player arrays of every language variant of one path into
    /// episodes, numbered by array position
    pub fn episodes_from_pages<F>(pages: &[(Language, SeasonPage)], identify: F) -> Vec<EpisodeRef>
    where
        F: Fn(&str) -> ProviderKind,
    {
        let mut episodes: BTreeMap<u32, EpisodeRef> = BTreeMap::new();

        for (language, page) in pages {
            for players in &page.players {
                for (index, url) in players.iter().enumerate() {
                    let Some(url) = url else {
                        continue;
                    };
                    let number = index as u32 + 1;
                    episodes
                        .entry(number)
                        .or_insert_with(|| EpisodeRef::new(number))
                        .add_embed(identify(url), EmbedRef::new(*language, url.clone()));
                }
            }

            for (index, title) in page.titles.iter().enumerate() {
                if let Some(episode) = episodes.get_mut(&(index as u32 + 1))
                    && episode.title.is_none()
                {
                    episode.title = Some(title.clone());
                }
            }
        }

        episodes.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(label: &str) -> Option<(SeasonNumber, SeasonKind)> {
        SeasonResolver::classify(label, "")
    }

    #[test]
    fn test_classify_labels() {
        assert_eq!(classify("1"), Some((SeasonNumber::new(1), SeasonKind::Normal)));
        assert_eq!(classify("Saison 3"), Some((SeasonNumber::new(3), SeasonKind::Normal)));
        assert_eq!(classify("Saga 2"), Some((SeasonNumber::new(2), SeasonKind::Normal)));
        assert_eq!(
            classify("4-2"),
            Some((SeasonNumber::sub(4, 2), SeasonKind::SubSeason))
        );
        assert_eq!(
            classify("Season 4 - 3"),
            Some((SeasonNumber::sub(4, 3), SeasonKind::SubSeason))
        );
        assert_eq!(classify("Films"), Some((SeasonNumber::film(), SeasonKind::Film)));
        assert_eq!(classify("OAV"), Some((SeasonNumber::special(), SeasonKind::Special)));
        assert_eq!(classify("Spéciaux"), Some((SeasonNumber::special(), SeasonKind::Special)));
        assert_eq!(
            classify("Hors-Série"),
            Some((SeasonNumber::hors_serie(), SeasonKind::HorsSerie))
        );
        assert_eq!(classify("Kai"), None);
        assert_eq!(classify("998"), None);
    }

    #[test]
    fn test_path_wins_over_label() {
        assert_eq!(
            SeasonResolver::classify("Arc Wano", "saison10-2"),
            Some((SeasonNumber::sub(10, 2), SeasonKind::SubSeason))
        );
        assert_eq!(
            SeasonResolver::classify("Saison 1", "film"),
            Some((SeasonNumber::film(), SeasonKind::Film))
        );
        assert_eq!(
            SeasonResolver::classify("Bonus", "saison1hs"),
            Some((SeasonNumber::hors_serie(), SeasonKind::HorsSerie))
        );
    }

    #[test]
    fn test_resolve_sample_landing() {
        let blocks: Vec<RawSeasonBlock> = ["1", "2", "2-2", "Films", "OAV"]
            .iter()
            .map(|label| RawSeasonBlock::labelled(label))
            .collect();
        let resolved = SeasonResolver::resolve(&blocks);

        let numbers: Vec<SeasonNumber> = resolved.units.iter().map(|u| u.number).collect();
        assert_eq!(
            numbers,
            vec![
                SeasonNumber::special(),
                SeasonNumber::new(1),
                SeasonNumber::new(2),
                SeasonNumber::sub(2, 2),
                SeasonNumber::film(),
            ]
        );
        assert!(resolved.warnings.is_empty());

        let sub = &resolved.units[3];
        assert_eq!(sub.parent(), Some(2));
        assert_eq!(sub.paths, vec!["saison2-2"]);
    }

    #[test]
    fn test_resolve_merges_languages_and_containers() {
        let blocks = vec![
            RawSeasonBlock::from_panel("Saison 1", "saison1/vostfr"),
            RawSeasonBlock::from_panel("Saison 1", "saison1/vf"),
            RawSeasonBlock::from_panel("Film 1", "film/vostfr"),
            RawSeasonBlock::from_panel("Film 2", "film2/vostfr"),
            RawSeasonBlock::from_panel("???", "kai/vostfr"),
        ];
        let resolved = SeasonResolver::resolve(&blocks);

        assert_eq!(resolved.units.len(), 2);
        assert_eq!(resolved.units[0].languages, vec![Language::Vostfr, Language::Vf]);
        assert_eq!(resolved.units[1].paths, vec!["film", "film2"]);
        assert_eq!(resolved.warnings.len(), 1);
    }

    #[test]
    fn test_duplicate_number_last_write_wins() {
        let blocks = vec![
            RawSeasonBlock::from_panel("Saison 2", "saison2/vostfr"),
            RawSeasonBlock::from_panel("Saison 2 (nouvelle version)", "saison2/vf"),
            RawSeasonBlock::from_panel("2", "s2/vostfr"),
        ];
        let resolved = SeasonResolver::resolve(&blocks);
        assert_eq!(resolved.units.len(), 1);
        assert_eq!(resolved.units[0].label, "2");
        assert_eq!(resolved.units[0].paths, vec!["s2"]);
    }

    #[test]
    fn test_orphan_sub_season_is_kept() {
        let resolved = SeasonResolver::resolve(&[RawSeasonBlock::labelled("4-2")]);
        assert_eq!(resolved.units.len(), 1);
        assert_eq!(resolved.units[0].number, SeasonNumber::sub(4, 2));
    }

    #[test]
    fn test_episodes_from_pages_merges_languages() {
        let vostfr = SeasonPage {
            players: vec![
                vec![Some("https://video.sibnet.ru/1".into()), Some("https://video.sibnet.ru/2".into())],
                vec![None, Some("https://sendvid.com/embed/2".into())],
            ],
            ..SeasonPage::default()
        };
        let vf = SeasonPage {
            players: vec![vec![Some("https://video.sibnet.ru/vf1".into())]],
            ..SeasonPage::default()
        };

        let identify = |url: &str| {
            if url.contains("sibnet") {
                ProviderKind::Sibnet
            } else {
                ProviderKind::Sendvid
            }
        };
        let episodes = SeasonResolver::episodes_from_pages(
            &[(Language::Vostfr, vostfr), (Language::Vf, vf)],
            identify,
        );

        assert_eq!(episodes.len(), 2);
        assert_eq!(episodes[0].embeds[&ProviderKind::Sibnet].len(), 2);
        assert_eq!(episodes[1].embed_count(), 2);
        assert_eq!(episodes[0].embeds[&ProviderKind::Sibnet][1].language, Language::Vf);
    }
}
