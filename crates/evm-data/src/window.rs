//! Locates the first block of a trailing time window.
//!
//! The scan walks backward one block at a time from the chain head. Block
//! production is roughly uniform and windows are short relative to chain
//! height, so the linear scan touches only a few hundred blocks.

use std::time::Duration;

use chrono::Utc;

use crate::client::ChainClient;

/// Finds the newest block at or before `now - window`, scanning back from
/// `latest`.
///
/// Returns 0 if the window reaches past genesis. A failed fetch ends the scan
/// early and returns the last block examined (or `latest` if none was), so the
/// result is a best-effort boundary.
pub async fn find_window_start<C: ChainClient>(client: &C, latest: u64, window: Duration) -> u64 {
    let now = u64::try_from(Utc::now().timestamp()).unwrap_or(0);
    find_window_start_at(client, latest, window, now).await
}

/// [`find_window_start`] against an explicit clock (unix seconds).
#[tracing::instrument(skip(client), fields(window_secs = window.as_secs()))]
pub async fn find_window_start_at<C: ChainClient>(
    client: &C,
    latest: u64,
    window: Duration,
    now: u64,
) -> u64 {
    let cutoff = now.saturating_sub(window.as_secs());
    let mut block_number = latest;
    let mut last_examined = None;

    loop {
        let block = match client.get_block(block_number, false).await {
            Ok(block) => block.block_ref(),
            Err(e) => {
                let fallback = last_examined.unwrap_or(latest);
                tracing::warn!(
                    block_number,
                    fallback,
                    error = %e,
                    "block fetch failed during window scan, stopping early"
                );
                return fallback;
            }
        };
        last_examined = Some(block_number);

        if block.timestamp <= cutoff {
            tracing::debug!(
                block_number,
                timestamp = block.timestamp,
                cutoff,
                scanned = latest - block_number + 1,
                "found window start"
            );
            return block_number;
        }
        if block_number == 0 {
            tracing::info!(cutoff, "window extends past genesis");
            return 0;
        }
        block_number -= 1;
    }
}
