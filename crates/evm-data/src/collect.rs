//! End-to-end collection run: connect, locate window, extract, write, archive.

use std::path::PathBuf;

use alloy::primitives::TxHash;
use chrono::{DateTime, Utc};
use eyre::{eyre, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use crate::archive::{create_archive, partition_key};
use crate::client::{ChainClient, RpcChainClient};
use crate::columnar::write_parquet;
use crate::config::CollectorConfig;
use crate::extract::RangeExtractor;
use crate::timing::{timed, timed_sync};
use crate::window::find_window_start_at;

/// Outcome of a collection run.
#[derive(Clone, Debug, Serialize)]
pub struct CollectionReport {
    pub latest_block: u64,
    pub start_block: u64,
    pub records: usize,
    pub skipped_blocks: Vec<u64>,
    pub skipped_transactions: Vec<TxHash>,
    pub output_path: PathBuf,
    pub archived_to: Option<String>,
}

/// Parquet filename for a run started at `now`.
pub fn output_filename(now: DateTime<Utc>) -> String {
    format!("ethereum_transactions_{}.parquet", now.format("%Y%m%d%H%M%S"))
}

/// Connects to `config.rpc_url` and runs a full collection.
///
/// # Errors
/// Returns error if the node cannot be reached, the head block cannot be
/// read, or the output cannot be written or archived. Per-block and
/// per-transaction fetch failures are not errors.
pub async fn run_collection(config: &CollectorConfig) -> Result<CollectionReport> {
    let client = timed("connect_to_ethereum_node", RpcChainClient::connect(&config.rpc_url)).await?;
    collect_with_client(&client, config, Utc::now()).await
}

/// Runs a collection against an already connected client, with `now` as the
/// window anchor and the output timestamp.
#[tracing::instrument(skip_all, fields(window_secs = config.window.as_secs()))]
pub async fn collect_with_client<C: ChainClient>(
    client: &C,
    config: &CollectorConfig,
    now: DateTime<Utc>,
) -> Result<CollectionReport> {
    tracing::info!("START --------------------------------------------------------");
    tracing::info!(
        max_attempts = config.backoff.max_attempts(),
        initial_delay_ms = config.backoff.initial_delay().as_millis() as u64,
        retry_block_fetches = config.retry_block_fetches,
        "retry policy"
    );

    let latest_block = config
        .backoff
        .fetch_with_backoff("latest block", || client.latest_block_number())
        .await
        .ok_or_else(|| eyre!("failed to fetch latest block number"))?;
    tracing::info!(latest_block, "latest block number");

    let anchor = u64::try_from(now.timestamp()).unwrap_or(0);
    let start_block = timed(
        "find_window_start",
        find_window_start_at(client, latest_block, config.window, anchor),
    )
    .await;
    tracing::info!(start_block, "window start block");

    let extractor = RangeExtractor::new(client, config.backoff)
        .retry_block_fetches(config.retry_block_fetches)
        .with_progress(progress_bar(config.show_progress)?);
    let extraction = timed(
        "extract_transactions",
        extractor.extract_transactions(start_block, latest_block),
    )
    .await?;

    let filename = output_filename(now);
    let output_path = config.output_dir.join(&filename);
    timed_sync("save_to_parquet", || write_parquet(&extraction.records, &output_path))?;

    let archived_to = match &config.archive {
        Some(destination) => {
            let archive = create_archive(destination).await?;
            let key = partition_key(&filename, now.date_naive());
            let location = timed("upload_archive", archive.upload(&output_path, &key))
                .await
                .wrap_err_with(|| format!("failed to archive {filename}"))?;
            Some(location)
        }
        None => None,
    };

    tracing::info!("END --------------------------------------------------------");

    Ok(CollectionReport {
        latest_block,
        start_block,
        records: extraction.records.len(),
        skipped_blocks: extraction.skipped_blocks,
        skipped_transactions: extraction.skipped_transactions,
        output_path,
        archived_to,
    })
}

fn progress_bar(visible: bool) -> Result<ProgressBar> {
    if !visible {
        return Ok(ProgressBar::hidden());
    }
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} blocks {msg}")
            .wrap_err("invalid progress bar template")?,
    );
    Ok(bar)
}
