use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use wrank_adapters::{RosterSource, WrestleStatSource};
use wrank_release::{parse_rankings_paste, ReleaseConfig, ReleaseService};
use wrank_storage::{HttpFetcher, MemoryReleaseStore, PgReleaseStore, ReleaseStore};
use wrank_web::AppState;

#[derive(Debug, Parser)]
#[command(name = "wrank-cli")]
#[command(about = "Wrestling rankings release resolver")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the operator API (default).
    Serve,
    /// Apply database migrations.
    Migrate,
    /// Check a rankings paste offline.
    Parse {
        file: PathBuf,
        #[arg(long)]
        weight_class: Option<i32>,
    },
    /// Print the live roster for a weight class.
    Roster { weight_class: i32 },
}

fn live_source(config: &ReleaseConfig) -> Result<WrestleStatSource> {
    let http = HttpFetcher::new(config.http_client_config())?;
    Ok(WrestleStatSource::new(http, config.load_source_config()?))
}

async fn release_store(config: &ReleaseConfig) -> Result<Arc<dyn ReleaseStore>> {
    match &config.database_url {
        Some(url) => {
            let pool = wrank_storage::connect(url).await.context("connecting to database")?;
            wrank_storage::run_migrations(&pool)
                .await
                .context("applying migrations")?;
            Ok(Arc::new(PgReleaseStore::new(pool)))
        }
        None => {
            warn!("DATABASE_URL not set, releases are kept in memory only");
            Ok(Arc::new(MemoryReleaseStore::new()))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = ReleaseConfig::from_env();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            let store = release_store(&config).await?;
            let source = Arc::new(live_source(&config)?);
            let service = ReleaseService::new(store, source, config.roster_ttl());
            wrank_web::serve(AppState::new(service), config.web_port).await?;
        }
        Commands::Migrate => {
            let Some(url) = &config.database_url else {
                bail!("DATABASE_URL is required for migrate");
            };
            let pool = wrank_storage::connect(url).await.context("connecting to database")?;
            wrank_storage::run_migrations(&pool)
                .await
                .context("applying migrations")?;
            info!("migrations applied");
        }
        Commands::Parse { file, weight_class } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let outcome = parse_rankings_paste(&raw);
            if let Some(weight_class) = weight_class {
                println!("weight class {weight_class}");
            }
            for row in &outcome.rows {
                let previous = row
                    .previous_rank
                    .map_or_else(|| "NR".to_string(), |r| r.to_string());
                println!("{:>3}  {:<28} {:<24} {}", row.rank, row.name, row.school, previous);
            }
            for error in &outcome.errors {
                eprintln!("{error}");
            }
            println!(
                "parsed rows={} errors={}",
                outcome.rows.len(),
                outcome.errors.len()
            );
            if !outcome.is_clean() {
                bail!("paste has {} rejected line(s)", outcome.errors.len());
            }
        }
        Commands::Roster { weight_class } => {
            let source = live_source(&config)?;
            let entries = source
                .fetch_roster(weight_class)
                .await
                .with_context(|| format!("fetching roster for {weight_class}"))?;
            for entry in &entries {
                println!("{:>8}  {:<28} {}", entry.external_id, entry.name, entry.school);
            }
            println!("roster weight_class={} entries={}", weight_class, entries.len());
        }
    }

    Ok(())
}
