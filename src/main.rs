use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use samastream::config::Settings;
use samastream::logging;
use samastream::scraper::types::{CatalogQuery, Language, SeasonNumber, StreamPreferences};
use samastream::scraper::{Pipeline, build_pipeline};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "samastream", about = "Resolve anime catalog entries, seasons and stream links")]
struct Cli {
    /// Settings file, defaults to samastream.{toml,json,yaml} in the working directory
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the homepage or search the catalogue
    Catalog {
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        language: Option<Language>,
        #[arg(long)]
        genre: Option<String>,
    },
    /// Show an anime with its seasons and episodes
    Detail { slug: String },
    /// Resolve playable streams for one episode
    Streams {
        slug: String,
        /// Season number, `N-M` for a sub-season, 998 films, 999 hors-série, 0 specials
        season: SeasonNumber,
        episode: u32,
        #[arg(long)]
        language: Option<Language>,
    },
    /// Delete expired cache entries and leases
    Purge,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(command: Command, pipeline: &Pipeline) -> Result<()> {
    let orchestrator = &pipeline.orchestrator;
    match command {
        Command::Catalog {
            search,
            language,
            genre,
        } => {
            let query = match search {
                Some(text) => CatalogQuery::search(text),
                None => CatalogQuery::homepage(),
            }
            .with_language(language)
            .with_genre(genre);
            print_json(&orchestrator.resolve_catalog(&query).await?)
        }
        Command::Detail { slug } => print_json(&orchestrator.resolve_detail(&slug).await?),
        Command::Streams {
            slug,
            season,
            episode,
            language,
        } => {
            let preferences = StreamPreferences::new()
                .with_language(language)
                .with_priority(orchestrator.config().languages.clone());
            let streams = orchestrator
                .resolve_streams_with(&slug, season, episode, &preferences)
                .await?;
            print_json(&streams)
        }
        Command::Purge => {
            let report = pipeline.store.purge_expired(pipeline.clock.now()).await?;
            info!(
                "Purged {} entries and {} leases from {}",
                report.entries,
                report.leases,
                pipeline.store.backend()
            );
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;
    let _guard = logging::init(&settings.log)?;

    let pipeline = build_pipeline(&settings).await?;
    let result = run(cli.command, &pipeline).await;
    pipeline.shutdown().await;
    result
}
