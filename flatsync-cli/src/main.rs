//! Flatsync CLI: sync, extract and cache status commands.
//!
//! Commands:
//! - `sync`: bring the local flat-file cache up to date for a date range
//! - `extract`: split cached days into per-ticker Parquet partitions
//! - `status`: report unchecked / absent / present days per asset class

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use flatsync_core::asset::AssetClass;
use flatsync_core::config::{FileConfig, SyncConfig};
use flatsync_core::data::{CircuitBreaker, FlatFileCache, S3FlatFiles};
use flatsync_core::extract::{ExtractReport, Extractor};
use flatsync_core::sync::{LogProgress, SyncReport, Synchronizer};
use std::fs::File;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

#[derive(Parser)]
#[command(
    name = "flatsync",
    about = "Flatsync CLI: incremental market-data flat-file sync"
)]
struct Cli {
    /// Log filter directive, e.g. `debug` or `flatsync_core=trace`. RUST_LOG wins if set.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Also write logs to this file.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every command.
#[derive(Args)]
struct RangeArgs {
    /// Path to a TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Start date (YYYY-MM-DD), inclusive.
    #[arg(long)]
    start: Option<String>,

    /// End date (YYYY-MM-DD), exclusive.
    #[arg(long)]
    end: Option<String>,

    /// Asset class (stocks, options, crypto, forex). Repeatable.
    #[arg(long = "asset")]
    assets: Vec<AssetClass>,

    /// Tickers to extract, comma separated.
    #[arg(long, value_delimiter = ',')]
    tickers: Vec<String>,

    /// Cache directory. Defaults to ./data/files.
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Worker threads per asset class.
    #[arg(long)]
    jobs: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Download new or changed flat files into the cache.
    Sync {
        #[command(flatten)]
        range: RangeArgs,

        /// Ask the remote again about days previously found empty.
        #[arg(long, default_value_t = false)]
        recheck_absent: bool,

        /// Extract per-ticker partitions after the sweep.
        #[arg(long, default_value_t = false)]
        extract: bool,

        /// Output directory for extracted partitions. Defaults to ./data/prices.
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Print the run summary as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Extract cached days into per-ticker Parquet partitions.
    Extract {
        #[command(flatten)]
        range: RangeArgs,

        /// Output directory for extracted partitions. Defaults to ./data/prices.
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Print the extraction summary as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Report cache coverage per asset class.
    Status {
        #[command(flatten)]
        range: RangeArgs,
    },
}

/// Resolved settings: file config with command-line overrides applied.
struct Settings {
    file: FileConfig,
    sync: SyncConfig,
}

impl Settings {
    fn cache(&self) -> FlatFileCache {
        FlatFileCache::new(&self.file.paths.cache_dir)
    }

    fn output_dir(&self, flag: Option<PathBuf>) -> PathBuf {
        flag.unwrap_or_else(|| self.file.paths.output_dir.clone())
    }
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref(), cli.log_file.as_deref())?;

    match cli.command {
        Commands::Sync {
            range,
            recheck_absent,
            extract,
            output_dir,
            json,
        } => {
            let mut settings = resolve(range)?;
            settings.sync.recheck_absent |= recheck_absent;
            run_sync(&settings, extract.then(|| settings.output_dir(output_dir)), json)
        }
        Commands::Extract {
            range,
            output_dir,
            json,
        } => {
            let settings = resolve(range)?;
            let output_dir = settings.output_dir(output_dir);
            run_extract(&settings, output_dir, json)
        }
        Commands::Status { range } => run_status(&resolve(range)?),
    }
}

fn init_logging(level: Option<&str>, log_file: Option<&std::path::Path>) -> Result<()> {
    let filter = || {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(level.unwrap_or("flatsync=info,flatsync_core=info")))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let file_layer = match log_file {
        Some(path) => {
            let file = File::options()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .with_filter(filter()),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_filter(filter()))
        .with(file_layer)
        .init();
    Ok(())
}

fn resolve(args: RangeArgs) -> Result<Settings> {
    let mut file = match &args.config {
        Some(path) => FileConfig::from_file(path)?,
        None => FileConfig::default(),
    };

    if let Some(start) = &args.start {
        file.range.start = Some(start.clone());
    }
    if let Some(end) = &args.end {
        file.range.end = Some(end.clone());
    }
    if file.range.end.is_none() {
        file.range.end = Some(today().format("%Y-%m-%d").to_string());
    }
    if file.range.start.is_none() {
        bail!("a start date is required (--start or [range] start in the config file)");
    }
    if !args.tickers.is_empty() {
        file.tickers = Some(args.tickers);
    }
    if let Some(dir) = args.cache_dir {
        file.paths.cache_dir = dir;
    }
    if args.jobs.is_some() {
        file.jobs = args.jobs;
    }

    let mut sync = file.sync_config()?;
    if !args.assets.is_empty() {
        sync.asset_classes = args.assets;
    }
    sync.validate()?;

    Ok(Settings { file, sync })
}

fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

fn run_sync(settings: &Settings, extract_to: Option<PathBuf>, json: bool) -> Result<()> {
    let remote_config = settings.file.remote.clone().with_env_credentials();
    let circuit_breaker = Arc::new(CircuitBreaker::default_remote());
    let remote = S3FlatFiles::new(&remote_config, circuit_breaker)?;
    let cache = settings.cache();
    let progress = LogProgress;

    info!(
        start = %settings.sync.start,
        end = %settings.sync.end,
        jobs = settings.sync.jobs,
        cache = %cache.root().display(),
        "starting sync"
    );

    let report = Synchronizer::new(&cache, &remote, &progress).run(&settings.sync)?;
    print_sync_report(&report, json)?;

    let mut failed = !report.is_complete();
    if let Some(output_dir) = extract_to {
        let extract = extract_days(settings, &cache, output_dir);
        print_extract_report(&extract, json)?;
        failed |= !extract.failures.is_empty();
    }

    if failed {
        std::process::exit(1);
    }
    Ok(())
}

fn run_extract(settings: &Settings, output_dir: PathBuf, json: bool) -> Result<()> {
    let cache = settings.cache();
    let report = extract_days(settings, &cache, output_dir);
    print_extract_report(&report, json)?;

    if !report.failures.is_empty() {
        std::process::exit(1);
    }
    Ok(())
}

fn extract_days(settings: &Settings, cache: &FlatFileCache, output_dir: PathBuf) -> ExtractReport {
    info!(output = %output_dir.display(), "extracting partitions");
    Extractor::new(cache, output_dir)
        .with_tickers(settings.sync.tickers.clone())
        .extract_range(&settings.sync)
}

fn print_sync_report(report: &SyncReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("{report}");
    for failure in &report.failures {
        eprintln!("  failed {}: {}", failure.unit, failure.reason);
    }
    Ok(())
}

fn print_extract_report(report: &ExtractReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!(
        "extracted days={} absent={} uncached={} partitions={} failed={}",
        report.days,
        report.absent_days,
        report.uncached_days,
        report.partitions_written,
        report.failures.len()
    );
    for failure in &report.failures {
        eprintln!("  failed {}: {}", failure.unit, failure.reason);
    }
    Ok(())
}

fn run_status(settings: &Settings) -> Result<()> {
    let cache = settings.cache();
    let rows = cache.status(&settings.sync.classes(), settings.sync.start, settings.sync.end)?;

    println!("Cache: {}", cache.root().display());
    println!(
        "Range: {} to {} ({} days)",
        settings.sync.start,
        settings.sync.end,
        settings.sync.day_count()
    );
    println!();
    println!(
        "{:<8} {:>10} {:>8} {:>8} {:>10}",
        "Asset", "Unchecked", "Absent", "Present", "Size"
    );
    println!("{}", "-".repeat(48));
    for row in &rows {
        println!(
            "{:<8} {:>10} {:>8} {:>8} {:>10}",
            row.asset_class.name(),
            row.unchecked,
            row.absent,
            row.present,
            format_size(row.bytes)
        );
    }

    Ok(())
}

fn format_size(bytes: u64) -> String {
    if bytes >= 1_073_741_824 {
        format!("{:.1} GB", bytes as f64 / 1_073_741_824.0)
    } else if bytes >= 1_048_576 {
        format!("{:.1} MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}
