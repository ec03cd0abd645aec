use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use match_harvest::config::{BackendKind, Settings};
use match_harvest::discovery::TournamentTarget;
use match_harvest::fetch::BoundedFetcher;
use match_harvest::logging::{init_tracing, DEFAULT_FILTER};
use match_harvest::pipeline::{self, Pipeline};
use match_harvest::util::db::Db;
use match_harvest::util::env;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "match-harvest",
    version,
    about = "Crawl fixture pages, extract match-centre data and load it into SQLite"
)]
struct Cli {
    /// Fetch backend: http or browser (overrides SCRAPER_BACKEND)
    #[arg(long, global = true)]
    backend: Option<BackendKind>,
    /// Maximum in-flight fetches (overrides SCRAPER_CONCURRENCY)
    #[arg(long, global = true)]
    concurrency: Option<usize>,
    /// Artifact root directory (overrides MATCHES_DIR)
    #[arg(long, global = true)]
    matches_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Load scraped artifacts into the database
    Populate,
    /// Discover, fetch and extract every match of a tournament
    Scrape {
        /// Fixtures URL: https://<host>/Regions/<id>/Tournaments/<id>/Seasons/<id>/Stages/<id>/Fixtures/<slug>
        #[arg(long)]
        url: String,
    },
    /// Scrape, then populate
    Run {
        /// Fixtures URL, as for `scrape`
        #[arg(long)]
        url: String,
    },
    /// Scrape the matches on today's and yesterday's livescores
    Update,
    /// Fetch the front page and write all_regions.json
    Regions,
}

fn settings_for(cli: &Cli) -> Settings {
    let mut settings = Settings::from_env();
    if let Some(backend) = cli.backend {
        settings.backend = backend;
    }
    if let Some(n) = cli.concurrency {
        settings.concurrency = n.max(1);
    }
    if let Some(dir) = &cli.matches_dir {
        settings.matches_dir = dir.clone();
    }
    settings
}

async fn connect(settings: &Settings) -> Result<Db> {
    Db::connect(&settings.database_uri, settings.db_max_connections)
        .await
        .context("open relational store")
}

async fn pipeline_for(settings: &Settings) -> Result<Pipeline> {
    let fetcher = Arc::new(BoundedFetcher::from_settings(settings).await?);
    Ok(Pipeline::new(settings, fetcher))
}

#[tokio::main]
async fn main() -> Result<()> {
    env::init_env();
    init_tracing(DEFAULT_FILTER)?;

    let cli = Cli::parse();
    let settings = settings_for(&cli);
    info!(
        backend = ?settings.backend,
        concurrency = settings.concurrency,
        matches_dir = %settings.matches_dir.display(),
        "starting"
    );

    match &cli.command {
        Commands::Populate => {
            let db = connect(&settings).await?;
            let report = pipeline::populate(&db, &settings).await?;
            println!("{report}");
        }
        Commands::Scrape { url } => {
            let target = TournamentTarget::parse(url)?;
            let report = pipeline_for(&settings).await?.scrape(&target).await?;
            println!("{report}");
        }
        Commands::Run { url } => {
            let target = TournamentTarget::parse(url)?;
            let db = connect(&settings).await?;
            let scraped = pipeline_for(&settings).await?.scrape(&target).await?;
            println!("{scraped}");
            let loaded = pipeline::populate(&db, &settings).await?;
            println!("{loaded}");
        }
        Commands::Update => {
            let report = pipeline_for(&settings).await?.update().await?;
            println!("{report}");
        }
        Commands::Regions => {
            let regions = pipeline_for(&settings).await?.regions().await?;
            println!("{} regions written", regions.len());
        }
    }
    Ok(())
}
