//! Catalog, season and stream resolution for a French anime streaming site,
//! with a shared two-tier cache and cross-instance scrape leases.

pub mod config;
pub mod logging;
pub mod scraper;
