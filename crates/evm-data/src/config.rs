//! Run configuration, built once by the caller and passed by reference.

use std::path::PathBuf;
use std::time::Duration;

use crate::backoff::Backoff;

/// Everything a collection run needs. There is no process-wide client or
/// logger state; the orchestration layer owns this value.
#[derive(Clone, Debug)]
pub struct CollectorConfig {
    /// Ethereum JSON-RPC endpoint, credentials included in the URL if any.
    pub rpc_url: String,
    /// Trailing window to collect. Required: there is no default length.
    pub window: Duration,
    /// Retry policy for receipt (and, if enabled, block) fetches.
    pub backoff: Backoff,
    /// Retry failed block fetches instead of skipping them outright.
    pub retry_block_fetches: bool,
    /// Directory the Parquet file is written into.
    pub output_dir: PathBuf,
    /// Archive destination (`gs://bucket/prefix` or a directory), if any.
    pub archive: Option<String>,
    /// Show a progress bar while extracting.
    pub show_progress: bool,
}

impl CollectorConfig {
    pub fn new(rpc_url: impl Into<String>, window: Duration) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            window,
            backoff: Backoff::default(),
            retry_block_fetches: true,
            output_dir: PathBuf::from("files"),
            archive: None,
            show_progress: false,
        }
    }
}
