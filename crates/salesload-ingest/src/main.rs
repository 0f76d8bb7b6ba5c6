//! Salesload - bulk loader for the sales export

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use salesload_common::logging::{init_logging, LogConfig, LogLevel};
use salesload_ingest::backend::memory::{MemoryDatabase, MemoryPool};
use salesload_ingest::backend::PoolProvider;
use salesload_ingest::config::{BackendKind, LoaderConfig};
use salesload_ingest::{db, extract, pipeline, schema, LoadReport, RecordBatch};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "salesload")]
#[command(author, version, about = "Staged, conflict-safe bulk loader for sales exports")]
struct Cli {
    /// CSV export to load
    #[arg(short, long)]
    source: PathBuf,

    /// Database URL (overrides DATABASE_URL)
    #[arg(long)]
    database_url: Option<String>,

    /// Database engine: postgres or mysql (inferred from the URL by default)
    #[arg(long)]
    backend: Option<BackendKind>,

    /// Rows per load task
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Tasks loading at the same time
    #[arg(long)]
    max_concurrency: Option<usize>,

    /// Write the full report as JSON to this file
    #[arg(long)]
    report_json: Option<PathBuf>,

    /// Apply the bundled schema migrations before loading (PostgreSQL only)
    #[arg(long)]
    migrate: bool,

    /// Run the whole pipeline against an in-memory database
    #[arg(long)]
    dry_run: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn apply(&self, config: &mut LoaderConfig) {
        if let Some(ref url) = self.database_url {
            config.database.url = url.clone();
            if self.backend.is_none() {
                config.load.backend = BackendKind::from_url(url);
            }
        }
        if let Some(backend) = self.backend {
            config.load.backend = backend;
        }
        if let Some(chunk_size) = self.chunk_size {
            config.load.chunk_size = chunk_size;
        }
        if let Some(max_concurrency) = self.max_concurrency {
            config.load.max_concurrency = Some(max_concurrency);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let _guard = init_logging(&log_config(cli.verbose)?)?;

    let mut config = LoaderConfig::from_env()?;
    cli.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    let batches = extract::extract_file(&cli.source)?;

    let report = if cli.dry_run {
        run_dry(batches, &config).await?
    } else {
        run_database(batches, &config, cli.migrate).await?
    };

    println!("{}", report.summarize());

    if let Some(ref path) = cli.report_json {
        write_report(path, &report)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        info!(path = %path.display(), "Report written");
    }

    if !report.is_success() {
        anyhow::bail!(
            "Load did not complete: {} task(s) failed",
            report.results.iter().filter(|r| !r.is_success()).count()
        );
    }

    info!("Load complete");
    Ok(())
}

/// Logging settings from the verbose flag, overridden by `LOG_*` variables.
///
/// `.env` is loaded first so its `LOG_*` keys apply too.
fn log_config(verbose: bool) -> Result<LogConfig> {
    dotenvy::dotenv().ok();

    let level = if verbose { LogLevel::Debug } else { LogLevel::Info };
    LogConfig::builder()
        .level(level)
        .log_file_prefix("salesload")
        .build()
        .merge_env()
}

async fn run_dry(batches: Vec<RecordBatch>, config: &LoaderConfig) -> Result<LoadReport> {
    info!("Dry run: loading into an in-memory database");

    let db = MemoryDatabase::new();
    for table in schema::all_tables()? {
        db.create_table(table);
    }
    let provider = MemoryPool::new(
        db,
        config.database.max_connections,
        config.database.acquire_timeout(),
    );

    Ok(pipeline::run(Arc::new(provider), &schema::default_layout()?, batches, config).await?)
}

async fn run_database(batches: Vec<RecordBatch>, config: &LoaderConfig, migrate: bool) -> Result<LoadReport> {
    let plan = schema::default_layout()?;

    let report = match config.load.backend {
        BackendKind::Postgres => {
            let pool = db::create_pg_pool(&config.database).await?;
            if migrate {
                db::migrate_pg(&pool).await?;
            }
            let report = pipeline::run(Arc::new(PoolProvider::new(pool.clone())), &plan, batches, config).await?;
            pool.close().await;
            report
        }
        BackendKind::Mysql => {
            if migrate {
                warn!("Bundled migrations target PostgreSQL; skipping for MySQL");
            }
            let pool = db::create_mysql_pool(&config.database).await?;
            let report = pipeline::run(Arc::new(PoolProvider::new(pool.clone())), &plan, batches, config).await?;
            pool.close().await;
            report
        }
    };

    Ok(report)
}

fn write_report(path: &Path, report: &LoadReport) -> salesload_common::Result<()> {
    let json = report.to_json()?;
    std::fs::write(path, json)?;
    Ok(())
}
