mod catalog;
mod language;
mod season;
mod stream;

pub use catalog::{
    AnimeDetail, AnimeStatus, CatalogEntry, CatalogQuery, ContentType, EpisodeLocation,
};
pub use language::Language;
pub use season::{
    EmbedRef, EpisodeRef, FILM_SEASON, HORS_SERIE_SEASON, SPECIAL_SEASON, SeasonKind,
    SeasonNumber, SeasonStatus, SeasonUnit,
};
pub use stream::{
    ExtractionFailure, ProviderKind, ResolvedStream, StreamOutcome, StreamPreferences,
};
