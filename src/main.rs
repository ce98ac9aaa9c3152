use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use protest_pipeline::cleanup::{cleanup_duplicates, CleanupOptions};
use protest_pipeline::config::{ConfigError, PipelineConfig};
use protest_pipeline::db::SqliteStore;
use protest_pipeline::geocode::{GeocodeCache, Geocoder, NominatimBackend};
use protest_pipeline::http::HttpClient;
use protest_pipeline::robots::RobotsGuard;
use protest_pipeline::scraping::{self, FetchContext, Horizon};

#[derive(Parser)]
#[command(name = "protest-pipeline")]
#[command(about = "Collects protest announcements and keeps the event store in sync")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to the data directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch all sources, then geocode and reconcile into the store
    Ingest {
        /// Days ahead to consider
        #[arg(long)]
        days: Option<u32>,
        /// Restrict the run to these source ids
        #[arg(long = "source")]
        sources: Vec<String>,
    },
    /// Merge and delete duplicate stored records
    Cleanup {
        /// Report what would change without touching the store
        #[arg(long)]
        dry_run: bool,
        /// Maximum distance between starts, in days
        #[arg(long)]
        window_days: Option<u32>,
    },
    /// Run one source and print its candidates
    Fetch {
        source: String,
        #[arg(long)]
        days: Option<u32>,
    },
    /// List registered sources
    Sources,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("protest_pipeline=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = PipelineConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Ingest { days, sources } => {
            let adapters = scraping::select_adapters(&sources)?;
            scraping::validate_locales(&adapters)?;
            let http = Arc::new(HttpClient::new(&config.user_agent, config.request_timeout())?);
            let guard = RobotsGuard::new(config.robots_ttl());
            let store = SqliteStore::open(&config.database_path).with_context(|| {
                format!("cannot open store at {}", config.database_path.display())
            })?;
            let backend = NominatimBackend::new(
                http.clone(),
                &config.geocoder_endpoint,
                config.geocode_interval(),
            )
            .await;
            let mut geocoder = Geocoder::new(backend, GeocodeCache::open(&config.geocode_cache_path));

            let now = Utc::now();
            let days = days.unwrap_or(config.ingest_horizon_days);
            let ctx = FetchContext {
                http: http.as_ref(),
                guard: &guard,
            };
            let summary = protest_pipeline::run_ingestion(
                &adapters,
                &ctx,
                &mut geocoder,
                &store,
                Horizon::new(now, i64::from(days)),
                now,
            )
            .await;
            print_json(&summary)?;
        }
        Commands::Cleanup {
            dry_run,
            window_days,
        } => {
            let store = SqliteStore::open(&config.database_path).with_context(|| {
                format!("cannot open store at {}", config.database_path.display())
            })?;
            let options = CleanupOptions {
                dry_run,
                window_days: i64::from(window_days.unwrap_or(config.cleanup_window_days)),
            };
            let summary = cleanup_duplicates(&store, options, Utc::now())?;
            print_json(&summary)?;
        }
        Commands::Fetch { source, days } => {
            let adapter = scraping::find_adapter(&source)
                .ok_or_else(|| ConfigError::UnknownSource(source.clone()))?;
            scraping::validate_locales(std::slice::from_ref(&adapter))?;
            let http = HttpClient::new(&config.user_agent, config.request_timeout())?;
            let guard = RobotsGuard::new(config.robots_ttl());
            let ctx = FetchContext {
                http: &http,
                guard: &guard,
            };
            let days = days.unwrap_or(config.adapter_horizon_days);
            let horizon = Horizon::new(Utc::now(), i64::from(days));
            let events = scraping::collect(adapter.as_ref(), &ctx, horizon).await;
            print_json(&events)?;
        }
        Commands::Sources => {
            print_json(&scraping::list_sources())?;
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
