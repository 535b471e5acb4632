use anyhow::Context;
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use event_ingest::config::{Config, DEFAULT_CONFIG_PATH};
use event_ingest::ingest::Ingestor;
use event_ingest::logging;
use event_ingest::resolver::{CanonicalResolver, RepairScope};
use event_ingest::sources::JsonFileSource;
use event_ingest::storage::{SqliteStorage, Storage};
use event_ingest::types::SourceAdapter;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "event_ingest")]
#[command(about = "Local events catalog ingestion and canonical repair")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run source files through normalization, dedup and the catalog
    Ingest {
        /// Source files to ingest (comma-separated); each runs as its own source
        #[arg(long, value_delimiter = ',', required = true)]
        sources: Vec<String>,
        /// Abort a single source run after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// Collapse stored duplicates onto one canonical root per slot
    Repair {
        /// Venue slugs to scan (comma-separated); all venues when omitted
        #[arg(long, value_delimiter = ',')]
        venue_slugs: Vec<String>,
        /// First date to scan (YYYY-MM-DD); defaults to today
        #[arg(long)]
        from_date: Option<NaiveDate>,
        /// Perform the writes instead of printing the plan
        #[arg(long)]
        apply: bool,
    },
}

async fn run_ingest(
    config: &Config,
    storage: Arc<dyn Storage>,
    sources: Vec<String>,
    timeout_secs: Option<u64>,
) -> anyhow::Result<()> {
    let adapters: Vec<Arc<dyn SourceAdapter>> = sources
        .iter()
        .map(|path| {
            Arc::new(JsonFileSource::new(path, config.default_extraction_version.clone()))
                as Arc<dyn SourceAdapter>
        })
        .collect();

    let timeout = Duration::from_secs(timeout_secs.unwrap_or(config.source_timeout_secs));
    info!(sources = adapters.len(), timeout_secs = timeout.as_secs(), "Starting ingest");

    let reports = Ingestor::new(storage).run_sources(adapters, timeout).await;

    println!("\n📊 Ingest results:");
    for report in &reports {
        println!("   {}", report);
    }
    Ok(())
}

async fn run_repair(
    storage: Arc<dyn Storage>,
    venue_slugs: Vec<String>,
    from_date: Option<NaiveDate>,
    apply: bool,
) -> anyhow::Result<()> {
    let scope = RepairScope {
        venue_slugs,
        from_date: from_date.unwrap_or_else(|| Local::now().date_naive()),
    };
    let resolver = CanonicalResolver::new(storage);
    let plan = resolver
        .plan(&scope)
        .await
        .context("failed to plan canonical repair")?;

    if !apply {
        println!("🔎 Dry run from {} (pass --apply to write)", scope.from_date);
        for mutation in plan.mutations() {
            println!("   {}", mutation);
        }
        println!("\n{}", plan.summary);
        return Ok(());
    }

    let executed = resolver
        .apply(&plan)
        .await
        .context("canonical repair aborted; writes made so far are kept")?;
    println!("✅ Applied canonical repair from {}", scope.from_date);
    println!("\n{}", executed);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::load(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config))?;
    logging::init_logging(&config.log_dir);

    let storage: Arc<dyn Storage> = Arc::new(
        SqliteStorage::open(&config.database_path)
            .with_context(|| format!("failed to open catalog at {}", config.database_path))?,
    );

    match cli.command {
        Commands::Ingest {
            sources,
            timeout_secs,
        } => run_ingest(&config, storage, sources, timeout_secs).await,
        Commands::Repair {
            venue_slugs,
            from_date,
            apply,
        } => run_repair(storage, venue_slugs, from_date, apply).await,
    }
}
