//! Shared test helpers and utilities.
//!
//! Provides a scripted in-memory [`ChainClient`] and factory functions for
//! blocks, transactions and receipts with sensible defaults.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use alloy::primitives::{address, Address, TxHash, B256, U256};
use evm_data::backoff::Backoff;
use evm_data::client::ChainClient;
use evm_data::error::{FetchError, FetchResult};
use evm_data::types::{RawBlock, RawReceipt, RawTransaction};

/// Timestamp of block 0 on every scripted chain (2023-11-14T22:13:20Z).
pub const GENESIS_TS: u64 = 1_700_000_000;

/// Seconds between consecutive scripted blocks.
pub const BLOCK_INTERVAL: u64 = 12;

pub const SENDER: Address = address!("f39fd6e51aad88f6f4ce6ab8827279cfffb92266");
pub const RECIPIENT: Address = address!("70997970c51812dc3a010c7d01b50e0d17dc79c8");

/// Injected failure for one block or receipt.
#[derive(Clone, Copy, Debug)]
pub enum Failure {
    /// Transient error on the first `n` calls, success afterwards.
    Transient(u32),
    /// Transient error on every call.
    Always,
    /// Permanent (not found) error on every call.
    Missing,
}

/// In-memory chain whose blocks and receipts are served from maps, with
/// scripted failures and per-item call counters.
#[derive(Default)]
pub struct ScriptedChain {
    latest: u64,
    blocks: HashMap<u64, RawBlock>,
    receipts: HashMap<TxHash, RawReceipt>,
    block_failures: HashMap<u64, Failure>,
    receipt_failures: HashMap<TxHash, Failure>,
    block_calls: Mutex<HashMap<u64, u32>>,
    receipt_calls: Mutex<HashMap<TxHash, u32>>,
}

impl ScriptedChain {
    /// Blocks `0..=latest`, `BLOCK_INTERVAL` seconds apart, each carrying
    /// `txs_per_block` plain transfers with successful receipts.
    pub fn with_blocks(latest: u64, txs_per_block: u64) -> Self {
        let mut chain = Self {
            latest,
            ..Self::default()
        };
        for number in 0..=latest {
            let transactions: Vec<RawTransaction> =
                (0..txs_per_block).map(|index| sample_tx(number, index)).collect();
            for (index, tx) in transactions.iter().enumerate() {
                chain
                    .receipts
                    .insert(tx.hash, sample_receipt(21_000 * (index as u64 + 1)));
            }
            chain.blocks.insert(
                number,
                RawBlock {
                    number,
                    hash: block_hash(number),
                    timestamp: block_timestamp(number),
                    transactions,
                },
            );
        }
        chain
    }

    /// Replaces a block's transaction list (and their receipts).
    pub fn set_transactions(&mut self, number: u64, transactions: Vec<RawTransaction>) {
        for tx in &transactions {
            self.receipts.entry(tx.hash).or_insert_with(|| sample_receipt(21_000));
        }
        if let Some(block) = self.blocks.get_mut(&number) {
            block.transactions = transactions;
        }
    }

    pub fn set_receipt(&mut self, hash: TxHash, receipt: RawReceipt) {
        self.receipts.insert(hash, receipt);
    }

    pub fn fail_block(&mut self, number: u64, failure: Failure) {
        self.block_failures.insert(number, failure);
    }

    pub fn fail_receipt(&mut self, hash: TxHash, failure: Failure) {
        self.receipt_failures.insert(hash, failure);
    }

    /// Times `get_block` was called for `number`.
    pub fn block_calls(&self, number: u64) -> u32 {
        self.block_calls.lock().unwrap().get(&number).copied().unwrap_or(0)
    }

    /// Times `get_transaction_receipt` was called for `hash`.
    pub fn receipt_calls(&self, hash: TxHash) -> u32 {
        self.receipt_calls.lock().unwrap().get(&hash).copied().unwrap_or(0)
    }

    pub fn total_block_calls(&self) -> u32 {
        self.block_calls.lock().unwrap().values().sum()
    }

    fn scripted_error(failure: Option<Failure>, call: u32, item: String) -> Option<FetchError> {
        match failure? {
            Failure::Transient(n) if call <= n => Some(FetchError::Unavailable(format!("{item}: timeout"))),
            Failure::Transient(_) => None,
            Failure::Always => Some(FetchError::Unavailable(format!("{item}: connection reset"))),
            Failure::Missing => Some(FetchError::NotFound(item)),
        }
    }
}

fn bump<K: std::hash::Hash + Eq>(calls: &Mutex<HashMap<K, u32>>, key: K) -> u32 {
    let mut calls = calls.lock().unwrap();
    let count = calls.entry(key).or_insert(0);
    *count += 1;
    *count
}

impl ChainClient for ScriptedChain {
    async fn latest_block_number(&self) -> FetchResult<u64> {
        Ok(self.latest)
    }

    async fn get_block(&self, number: u64, include_transactions: bool) -> FetchResult<RawBlock> {
        let call = bump(&self.block_calls, number);
        let failure = self.block_failures.get(&number).copied();
        if let Some(err) = Self::scripted_error(failure, call, format!("block {number}")) {
            return Err(err);
        }
        let mut block = self
            .blocks
            .get(&number)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(format!("block {number}")))?;
        if !include_transactions {
            block.transactions.clear();
        }
        Ok(block)
    }

    async fn get_transaction_receipt(&self, hash: TxHash) -> FetchResult<RawReceipt> {
        let call = bump(&self.receipt_calls, hash);
        let failure = self.receipt_failures.get(&hash).copied();
        if let Some(err) = Self::scripted_error(failure, call, format!("{hash:#x}")) {
            return Err(err);
        }
        self.receipts
            .get(&hash)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(format!("{hash:#x}")))
    }
}

/// Default retry policy with millisecond delays so tests stay fast.
pub fn fast_backoff() -> Backoff {
    Backoff::new(5, Duration::from_millis(1))
}

pub fn block_timestamp(number: u64) -> u64 {
    GENESIS_TS + number * BLOCK_INTERVAL
}

pub fn block_hash(number: u64) -> B256 {
    B256::left_padding_from(&(number | 0xb10c_0000_0000).to_be_bytes())
}

/// Deterministic hash for the transaction at (`block`, `index`).
pub fn tx_hash(block: u64, index: u64) -> TxHash {
    B256::left_padding_from(&(block * 1_000 + index + 1).to_be_bytes())
}

/// Creates a 1 ETH transfer at 20 gwei.
pub fn sample_tx(block: u64, index: u64) -> RawTransaction {
    RawTransaction {
        hash: tx_hash(block, index),
        from: SENDER,
        to: Some(RECIPIENT),
        value: U256::from(1_000_000_000_000_000_000u128),
        gas_limit: 21_000,
        gas_price: 20_000_000_000,
        nonce: block * 1_000 + index,
        block_number: block,
        block_hash: block_hash(block),
        transaction_index: index,
    }
}

/// Creates a successful receipt with no effective price override.
pub fn sample_receipt(cumulative_gas_used: u64) -> RawReceipt {
    RawReceipt {
        gas_used: 21_000,
        cumulative_gas_used,
        status: 1,
        contract_address: None,
        state_root: None,
        effective_gas_price: None,
    }
}
