//! BOM Loader - Bills of Mortality database loader

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use bom_common::logging::{init_logging, LogConfig, LogLevel};
use bom_loader::config::{FailureAudit, LoaderConfig};
use bom_loader::dataset::Dataset;
use bom_loader::db::create_pool;
use bom_loader::ledger::{self, LedgerRecord, DEFAULT_HISTORY_LIMIT};
use bom_loader::pipeline::{LoadReport, Pipeline};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "bom-loader")]
#[command(author, version, about = "Bills of Mortality database loader")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stage and reconcile the extracts in one transaction
    Load {
        /// PostgreSQL connection string
        #[arg(long, env = "BOM_DB_STR")]
        db: Option<String>,

        /// Directory holding the extracts
        #[arg(short, long, env = "BOM_DATA_DIR")]
        data: Option<PathBuf>,

        /// Only load these datasets (repeatable)
        #[arg(long = "dataset", value_enum)]
        datasets: Vec<Dataset>,

        /// Count source rows without writing anything
        #[arg(long)]
        dry_run: bool,

        /// Where failure ledger entries are written
        #[arg(long, value_enum)]
        failure_audit: Option<FailureAudit>,

        /// Abort and roll back when staging plus reconciliation exceed this many seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show recent ledger entries
    History {
        /// PostgreSQL connection string
        #[arg(long, env = "BOM_DB_STR")]
        db: Option<String>,

        #[arg(short, long, default_value_t = DEFAULT_HISTORY_LIMIT)]
        limit: i64,

        /// Only entries of this run
        #[arg(long)]
        run_id: Option<Uuid>,

        /// Print entries as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // clap reads BOM_DB_STR and BOM_DATA_DIR, so .env must be loaded first
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if let Err(e) = init(&cli) {
        eprintln!("Error: {:#}", e);
        return ExitCode::FAILURE;
    }

    match execute(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        },
    }
}

fn init(cli: &Cli) -> Result<()> {
    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("bom-loader")
        .build()
        .merge_env()?;

    init_logging(&log_config)
}

async fn execute(command: Command) -> Result<()> {
    let mut config = LoaderConfig::from_env().context("Invalid configuration")?;

    match command {
        Command::Load {
            db,
            data,
            datasets,
            dry_run,
            failure_audit,
            timeout,
            json,
        } => {
            if let Some(url) = db {
                config.database.url = url;
            }
            if let Some(dir) = data {
                config.pipeline.data_dir = dir;
            }
            if !datasets.is_empty() {
                config.pipeline = config.pipeline.with_datasets(datasets);
            }
            if let Some(mode) = failure_audit {
                config.pipeline.failure_audit = mode;
            }
            if let Some(secs) = timeout {
                config.pipeline.run_timeout = Some(Duration::from_secs(secs));
            }
            config.pipeline.dry_run |= dry_run;
            config.validate().context("Invalid configuration")?;

            let pool = create_pool(&config.database)
                .await
                .context("Failed to connect to database")?;

            let mut pipeline = Pipeline::new(pool, config.pipeline);
            info!(run_id = %pipeline.run_id(), "Loading Bills of Mortality data");
            let report = pipeline.run().await.map_err(|e| {
                let context = match e.dataset() {
                    Some(dataset) => format!("Load failed at {} step of {}", e.step(), dataset),
                    None => format!("Load failed at {} step", e.step()),
                };
                anyhow::Error::new(e).context(context)
            })?;

            if json {
                println!("{}", report.to_json()?);
            } else {
                print_report(&report);
            }
        },
        Command::History {
            db,
            limit,
            run_id,
            json,
        } => {
            if let Some(url) = db {
                config.database.url = url;
            }
            config.database.validate().context("Invalid configuration")?;

            let pool = create_pool(&config.database)
                .await
                .context("Failed to connect to database")?;
            let entries = ledger::recent_entries(&pool, limit, run_id)
                .await
                .context("Failed to read load history")?;

            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                print_history(&entries);
            }
        },
    }

    Ok(())
}

fn print_report(report: &LoadReport) {
    println!("Run {} finished in state {}", report.run_id, report.state);
    if report.dry_run {
        println!("Dry run: nothing was written");
    }

    for ingest in &report.ingested {
        println!("  {:<16} {:>9} rows  {}", ingest.dataset, ingest.rows, ingest.path.display());
    }

    for step in &report.reconciled {
        println!(
            "  {:<24} {:<7} before {:>8}  processed {:>8}  after {:>8}  ({:.2?})",
            step.table, step.operation, step.rows_before, step.rows_processed, step.rows_after, step.duration
        );
    }

    if let Some(maintenance) = &report.maintenance {
        match &maintenance.error {
            None => println!("  statistics refreshed ({:.2?})", maintenance.duration),
            Some(e) => println!("  statistics refresh failed: {}", e),
        }
    }

    println!("Total: {} rows processed in {:.2?}", report.rows_processed(), report.duration);
}

fn print_history(entries: &[LedgerRecord]) {
    if entries.is_empty() {
        println!("No ledger entries");
        return;
    }

    for entry in entries {
        let counts = match (entry.rows_before, entry.rows_processed, entry.rows_after) {
            (Some(before), Some(processed), Some(after)) => {
                format!("{} -> +{} -> {}", before, processed, after)
            },
            _ => "-".to_string(),
        };
        println!(
            "{:>6}  {}  {:<8} {:<24} {:<5} {:<28} {}",
            entry.load_id,
            entry.load_date.format("%Y-%m-%d %H:%M:%S"),
            entry.operation,
            entry.table_name,
            if entry.success { "ok" } else { "FAIL" },
            counts,
            entry.error_message.as_deref().unwrap_or("")
        );
    }
}
