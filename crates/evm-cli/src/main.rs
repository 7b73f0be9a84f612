use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use clap::{ArgAction, Parser};
use color_eyre::eyre::{Context, Result};
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use evm_data::backoff::{Backoff, DEFAULT_MAX_ATTEMPTS};
use evm_data::collect::{run_collection, CollectionReport};
use evm_data::config::CollectorConfig;
use tracing::Level;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "evm-collect")]
#[command(about = "Collect a trailing window of Ethereum transactions into Parquet")]
#[command(version)]
struct Cli {
    #[arg(long, short = 'v', action = ArgAction::Count)]
    verbose: u8,

    #[arg(long, short = 'q')]
    quiet: bool,

    /// Also append logs to a daily file in this directory.
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Ethereum JSON-RPC endpoint.
    #[arg(long, env = "EVM_RPC_URL")]
    rpc_url: String,

    /// Length of the trailing window to collect, in seconds.
    #[arg(long)]
    window_secs: u64,

    /// Attempts per fetch before giving up on it.
    #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS)]
    max_attempts: u32,

    /// Delay before the first retry; doubles on each further retry.
    #[arg(long, default_value_t = 1000)]
    initial_delay_ms: u64,

    /// Skip a failed block immediately instead of retrying it.
    #[arg(long)]
    no_block_retry: bool,

    #[arg(long, default_value = "files")]
    output_dir: PathBuf,

    /// Archive destination: `gs://bucket/prefix` or a directory. GCS
    /// credentials are read from the environment.
    #[arg(long)]
    archive: Option<String>,

    /// Print the run summary as JSON instead of a table.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet, cli.log_dir.as_deref())?;

    let config = CollectorConfig {
        backoff: Backoff::new(cli.max_attempts, Duration::from_millis(cli.initial_delay_ms)),
        retry_block_fetches: !cli.no_block_retry,
        output_dir: cli.output_dir,
        archive: cli.archive,
        show_progress: !cli.quiet && !cli.json,
        ..CollectorConfig::new(cli.rpc_url, Duration::from_secs(cli.window_secs))
    };

    let report = run_collection(&config).await?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).wrap_err("failed to serialize summary")?
        );
    } else {
        print_summary(&report);
    }
    Ok(())
}

fn init_tracing(verbose: u8, quiet: bool, log_dir: Option<&Path>) -> Result<()> {
    let level = if quiet {
        Level::WARN
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level.as_str()))
        .wrap_err("failed to initialize tracing filter")?;

    let file_layer = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .wrap_err_with(|| format!("failed to create log directory: {}", dir.display()))?;
            let path = dir.join(format!("evm_collector_{}.log", Utc::now().format("%Y-%m-%d")));
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .wrap_err_with(|| format!("failed to open log file: {}", path.display()))?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();
    Ok(())
}

fn print_summary(report: &CollectionReport) {
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Metric", "Value"]);
    table.add_row(vec![
        "Block range",
        &format!("{}..={}", report.start_block, report.latest_block),
    ]);
    table.add_row(vec!["Transactions written", &format!("{}", report.records)]);
    table.add_row(vec![
        "Blocks skipped",
        &format!("{}", report.skipped_blocks.len()),
    ]);
    table.add_row(vec![
        "Transactions skipped",
        &format!("{}", report.skipped_transactions.len()),
    ]);
    table.add_row(vec![
        "Output file",
        &report.output_path.display().to_string(),
    ]);
    if let Some(location) = &report.archived_to {
        table.add_row(vec!["Archived to", location.as_str()]);
    }

    println!("\n{table}\n");

    if !report.skipped_blocks.is_empty() {
        let blocks: Vec<String> = report.skipped_blocks.iter().map(u64::to_string).collect();
        println!("Skipped blocks: {}", blocks.join(", "));
    }
}
