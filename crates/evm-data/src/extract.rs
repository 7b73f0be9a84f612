//! Walks a block range and assembles normalized transaction records.
//!
//! Fetches are sequential: one block or receipt request in flight at a time.
//! A block that cannot be fetched contributes zero records; a transaction
//! whose receipt cannot be fetched, or whose amounts the output columns
//! cannot hold, is dropped on its own. Every gap is logged and listed on the
//! returned [`Extraction`].

use alloy::primitives::TxHash;
use indicatif::ProgressBar;

use crate::backoff::Backoff;
use crate::client::ChainClient;
use crate::columnar::is_representable;
use crate::error::CollectError;
use crate::normalize::to_record;
use crate::types::{Extraction, RawBlock, RawReceipt};

/// Extracts [`crate::types::TransactionRecord`]s for an inclusive block range.
pub struct RangeExtractor<'a, C> {
    client: &'a C,
    backoff: Backoff,
    retry_block_fetches: bool,
    progress: ProgressBar,
}

impl<'a, C: ChainClient> RangeExtractor<'a, C> {
    /// Block and receipt fetches both use `backoff`. Progress is hidden
    /// unless a bar is attached with [`Self::with_progress`].
    pub fn new(client: &'a C, backoff: Backoff) -> Self {
        Self {
            client,
            backoff,
            retry_block_fetches: true,
            progress: ProgressBar::hidden(),
        }
    }

    /// When disabled, a failed block fetch is skipped immediately instead of
    /// going through the retrier.
    pub fn retry_block_fetches(mut self, enabled: bool) -> Self {
        self.retry_block_fetches = enabled;
        self
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Extracts every recoverable transaction in `start..=end`.
    ///
    /// Records come back in ascending `(block_number, transaction_index)`
    /// order. Completeness is best effort; see [`Extraction`] for what was
    /// dropped.
    ///
    /// # Errors
    /// [`CollectError::InvalidRange`] if `end < start`. Per-block and
    /// per-transaction failures never surface as errors.
    #[tracing::instrument(skip(self))]
    pub async fn extract_transactions(&self, start: u64, end: u64) -> Result<Extraction, CollectError> {
        if end < start {
            return Err(CollectError::InvalidRange { start, end });
        }

        let total_blocks = block_count(start, end);
        tracing::info!(start, end, total_blocks, "starting block range extraction");
        self.progress.set_length(total_blocks);

        let mut extraction = Extraction::default();
        for block_number in start..=end {
            match self.fetch_block(block_number).await {
                Some(block) => self.extract_block(block, &mut extraction).await,
                None => {
                    tracing::warn!(block_number, "block unavailable, skipping all its transactions");
                    extraction.skipped_blocks.push(block_number);
                }
            }
            self.progress.inc(1);
            self.progress.set_message(format!("{} txs", extraction.records.len()));
        }
        self.progress.finish_and_clear();

        tracing::info!(
            start,
            end,
            records = extraction.records.len(),
            skipped_blocks = extraction.skipped_blocks.len(),
            skipped_transactions = extraction.skipped_transactions.len(),
            "block range extraction finished"
        );
        Ok(extraction)
    }

    async fn fetch_block(&self, block_number: u64) -> Option<RawBlock> {
        if self.retry_block_fetches {
            let item = format!("block {block_number}");
            return self
                .backoff
                .fetch_with_backoff(&item, || self.client.get_block(block_number, true))
                .await;
        }

        match self.client.get_block(block_number, true).await {
            Ok(block) => Some(block),
            Err(e) => {
                tracing::warn!(block_number, error = %e, "block fetch failed");
                None
            }
        }
    }

    async fn extract_block(&self, block: RawBlock, extraction: &mut Extraction) {
        let block_number = block.number;
        let mut transactions = block.transactions;
        transactions.sort_by_key(|tx| tx.transaction_index);

        tracing::debug!(block_number, tx_count = transactions.len(), "processing block");

        for tx in &transactions {
            if tx.block_number != block_number {
                tracing::warn!(
                    tx_hash = %tx.hash,
                    block_number,
                    tx_block_number = tx.block_number,
                    "transaction reports a different block, skipping"
                );
                extraction.skipped_transactions.push(tx.hash);
                continue;
            }

            match self.fetch_receipt(tx.hash).await {
                Some(receipt) => {
                    let record = to_record(tx, &receipt, block.timestamp);
                    if is_representable(&record) {
                        extraction.records.push(record);
                    } else {
                        tracing::warn!(
                            tx_hash = %tx.hash,
                            block_number,
                            value = %record.value,
                            "amount exceeds output column precision, skipping transaction"
                        );
                        extraction.skipped_transactions.push(tx.hash);
                    }
                }
                None => {
                    tracing::warn!(
                        tx_hash = %tx.hash,
                        block_number,
                        "receipt permanently unavailable, skipping transaction"
                    );
                    extraction.skipped_transactions.push(tx.hash);
                }
            }
        }
    }

    async fn fetch_receipt(&self, hash: TxHash) -> Option<RawReceipt> {
        let item = format!("{hash:#x}");
        self.backoff
            .fetch_with_backoff(&item, || self.client.get_transaction_receipt(hash))
            .await
    }
}

/// Number of blocks in `start..=end`, saturating at `u64::MAX` for the full range.
fn block_count(start: u64, end: u64) -> u64 {
    (end - start).saturating_add(1)
}
