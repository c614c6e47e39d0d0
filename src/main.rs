mod classifier;
mod db;
mod export;
mod jobs;
mod range;
mod runner;
mod settings;
mod writeback;

use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use classifier::{ClassifyJob, OpenAiClassifier, Taxonomy};
use settings::{LogSettings, Settings};

#[derive(Parser)]
#[command(name = "report_pipeline", about = "Forecast year-range extraction and report classification")]
struct Cli {
    /// Config file layered over the built-in defaults (default: ./report_pipeline.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create missing tables in the source, metrics and target databases
    Init,
    /// Extract year ranges from every description into CSV files
    Export,
    /// Extract year ranges from every description into report_market_metrics.forecast_year
    Update,
    /// "in ... through" ranges for the leftover report ids, appended to CSV
    RemainingExport {
        /// Comma-separated ids (default: remaining.report_ids)
        #[arg(long, value_delimiter = ',')]
        ids: Option<Vec<i64>>,
    },
    /// "in ... through" ranges for the leftover report ids, written to forecast_year
    RemainingUpdate {
        #[arg(long, value_delimiter = ',')]
        ids: Option<Vec<i64>>,
    },
    /// Classify unfetched reports with the LLM and copy them into the target database
    Classify {
        /// Max reports to classify (default: classifier.limit)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
}

fn init_tracing(log: &LogSettings) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&log.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = match log.file() {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()?;
    Ok(())
}

fn classify(settings: &Settings, limit: Option<usize>) -> Result<()> {
    let cfg = &settings.classifier;
    let api_key = cfg.validate()?;

    let taxonomy = Taxonomy {
        industry: cfg.industry_name.clone(),
        sub_industries: cfg.sub_industry_list(),
    };
    let client = OpenAiClassifier::new(
        &cfg.endpoint,
        api_key,
        &cfg.model,
        Duration::from_secs(cfg.timeout_secs),
        taxonomy,
    )?;

    let source = db::connect(&settings.database.source)?;
    let target = db::connect(&settings.database.target)?;
    info!("Database connection successful");

    let job = ClassifyJob {
        industry_ids: &cfg.industry_ids,
        industry_name: &cfg.industry_name,
        limit: limit.unwrap_or(cfg.limit),
        log_dir: &cfg.log_dir,
    };
    let stats = classifier::run(&source, &target, &job, &client)?;
    println!(
        "Done: {} classified, {} inserted, {} not found, {} duplicates, {} failed.",
        stats.processed, stats.inserted, stats.not_found, stats.duplicates, stats.failed
    );
    Ok(())
}

fn main() -> Result<()> {
    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("Failed to load configuration")?;
    init_tracing(&settings.log)?;

    let result = match cli.command {
        Commands::Init => jobs::init(&settings),
        Commands::Export => jobs::export(&settings).map(|stats| {
            println!(
                "Done: {} matched, {} not found, {} files written.",
                stats.matched, stats.not_found, stats.files
            );
        }),
        Commands::Update => jobs::update(&settings).map(|stats| {
            println!("Done: {} matched, {} not found.", stats.matched, stats.not_found);
        }),
        Commands::RemainingExport { ids } => {
            let ids = ids.unwrap_or_else(|| settings.remaining.report_ids.clone());
            jobs::remaining_export(&settings, ids).map(|stats| {
                println!("Done: {} matched, {} not found.", stats.matched, stats.not_found);
            })
        }
        Commands::RemainingUpdate { ids } => {
            let ids = ids.unwrap_or_else(|| settings.remaining.report_ids.clone());
            jobs::remaining_update(&settings, ids).map(|stats| {
                println!("Done: {} matched, {} not found.", stats.matched, stats.not_found);
            })
        }
        Commands::Classify { limit } => classify(&settings, limit),
    };

    if let Err(e) = &result {
        error!("FATAL ERROR: {:#}", e);
    }

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
