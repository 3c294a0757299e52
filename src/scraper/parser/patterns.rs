use regex::Regex;
use scraper::Selector;
use std::sync::LazyLock;

/// Pre-compiled regex patterns for the site's pages and scripts
pub struct Patterns {
    // Landing page
    pub panneau_anime: Regex, // panneauAnime("Saison 1", "saison1/vostfr");
    pub block_comment: Regex, // /* ... */
    pub title_suffix: Regex,  // "Title (VOSTFR)"
    pub whitespace: Regex,
    pub genre_separator: Regex,

    // Season page and episodes.js
    pub episodes_script: Regex, // episodes.js?filever=1234
    pub eps_array: Regex,       // var eps1 = [ ... ];
    pub quoted: Regex,
    pub creer_liste: Regex, // creerListe(1, 12)
    pub new_spf: Regex,     // newSPF("Film 1") or newSP("Episode 12.5")
    pub finir_liste: Regex, // finirListe(24) / finirListeOP(24)

    // Planning page
    pub planning_card: Regex,

    // Season taxonomy
    pub season_path: Regex,      // saison2, saison2-2
    pub hors_serie_path: Regex,  // saison1hs
    pub hors_serie_label: Regex, // Hors-Série, Hors Serie
    pub special_label: Regex,    // OAV, OVA, Spéciaux
    pub season_label: Regex,     // Saison 2, Season 2-2, Saga 3, S4, 4-2
}

impl Patterns {
    pub fn new() -> Self {
        Self {
            panneau_anime: Regex::new(r#"panneauAnime\("(.+?)",\s*"(.+?)"\);"#)
                .expect("Invalid panneau_anime regex"),
            block_comment: Regex::new(r"(?s)/\*.*?\*/").expect("Invalid block_comment regex"),
            title_suffix: Regex::new(r"(?i)\s+\((?:VOSTFR|VF|SUB|DUB)\)$")
                .expect("Invalid title_suffix regex"),
            whitespace: Regex::new(r"\s+").expect("Invalid whitespace regex"),
            genre_separator: Regex::new(r"[,;/]+|\s+-\s+").expect("Invalid genre_separator regex"),

            episodes_script: Regex::new(r"episodes\.js\?filever=\d+")
                .expect("Invalid episodes_script regex"),
            eps_array: Regex::new(r"var\s+eps\w*\s*=\s*\[([\s\S]*?)\];")
                .expect("Invalid eps_array regex"),
            quoted: Regex::new(r#"['"]([^'"]+)['"]"#).expect("Invalid quoted regex"),
            creer_liste: Regex::new(r"creerListe\(\s*(\d+)\s*,\s*(\d+)\s*\)")
                .expect("Invalid creer_liste regex"),
            new_spf: Regex::new(r#"newSPF?\("([^"]+)"\)"#).expect("Invalid new_spf regex"),
            finir_liste: Regex::new(r"finirListe(?:OP)?\(\s*(\d+)\s*\)")
                .expect("Invalid finir_liste regex"),

            planning_card: Regex::new(r#"cartePlanningAnime\([^,]+,\s*"([^"]+)""#)
                .expect("Invalid planning_card regex"),

            season_path: Regex::new(r"^saison(\d+)(?:-(\d+))?$").expect("Invalid season_path regex"),
            hors_serie_path: Regex::new(r"^saison\d+hs$").expect("Invalid hors_serie_path regex"),
            hors_serie_label: Regex::new(r"(?i)\bhors[\s-]*s[ée]rie").expect("Invalid hors_serie_label regex"),
            special_label: Regex::new(r"(?i)\b(?:oav|ova|oad|sp[ée]ciaux|sp[ée]cial|specials?)\b")
                .expect("Invalid special_label regex"),
            season_label: Regex::new(r"(?i)^(?:saison|season|saga|s)?\s*(\d+)(?:\s*-\s*(\d+))?$")
                .expect("Invalid season_label regex"),
        }
    }
}

impl Default for Patterns {
    fn default() -> Self {
        Self::new()
    }
}

/// Pre-parsed CSS selectors
pub struct Selectors {
    pub title: Selector,
    pub fallback_title: Selector,
    pub cover: Selector,
    pub heading: Selector,
    pub catalogue_link: Selector,
    pub card_title: Selector,
    pub any_heading: Selector,
    pub card_image: Selector,
    pub any_image: Selector,
    pub info_row: Selector,
    pub info_label: Selector,
    pub info_value: Selector,
    pub synopsis: Selector,
}

impl Selectors {
    pub fn new() -> Self {
        let parse = |css: &str| {
            Selector::parse(css).unwrap_or_else(|e| panic!("Invalid selector {css}: {e:?}"))
        };

        Self {
            title: parse("h4#titreOeuvre"),
            fallback_title: parse("h1"),
            cover: parse("img#imgOeuvre, img#coverOeuvre"),
            heading: parse("h2"),
            catalogue_link: parse("a[href*='/catalogue/']"),
            card_title: parse("h2.card-title"),
            any_heading: parse("h1, h2, h3, h4"),
            card_image: parse("img.card-image"),
            any_image: parse("img"),
            info_row: parse("div.info-row"),
            info_label: parse("span.info-label"),
            info_value: parse("p.info-value"),
            synopsis: parse("div.synopsis-content"),
        }
    }
}

impl Default for Selectors {
    fn default() -> Self {
        Self::new()
    }
}

pub static PATTERNS: LazyLock<Patterns> = LazyLock::new(Patterns::new);
pub static SELECTORS: LazyLock<Selectors> = LazyLock::new(Selectors::new);
