use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Audio/subtitle variant published by the site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Vostfr,
    Vf,
    Vf1,
    Vf2,
}

impl Language {
    /// Every variant, in the order the site is probed
    pub const ALL: [Self; 4] = [Self::Vostfr, Self::Vf, Self::Vf1, Self::Vf2];

    /// Path segment used in season URLs
    pub const fn path(self) -> &'static str {
        match self {
            Self::Vostfr => "vostfr",
            Self::Vf => "vf",
            Self::Vf1 => "vf1",
            Self::Vf2 => "vf2",
        }
    }

    /// Dubbed variants collapse to `Vf` for filtering and ordering
    pub const fn normalized(self) -> Self {
        match self {
            Self::Vostfr => Self::Vostfr,
            Self::Vf | Self::Vf1 | Self::Vf2 => Self::Vf,
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Vostfr => write!(f, "VOSTFR"),
            Self::Vf => write!(f, "VF"),
            Self::Vf1 => write!(f, "VF1"),
            Self::Vf2 => write!(f, "VF2"),
        }
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "vostfr" => Ok(Self::Vostfr),
            "vf" => Ok(Self::Vf),
            "vf1" => Ok(Self::Vf1),
            "vf2" => Ok(Self::Vf2),
            other => Err(format!("Unknown language: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("VOSTFR".parse::<Language>().unwrap(), Language::Vostfr);
        assert_eq!(" vf2 ".parse::<Language>().unwrap(), Language::Vf2);
        assert!("vo".parse::<Language>().is_err());
    }

    #[test]
    fn test_dubbed_variants_normalize_to_vf() {
        assert_eq!(Language::Vf1.normalized(), Language::Vf);
        assert_eq!(Language::Vf2.normalized(), Language::Vf);
        assert_eq!(Language::Vostfr.normalized(), Language::Vostfr);
    }
}
