//! Type definitions for raw chain data and the flattened transaction record.

use alloy::primitives::{Address, BlockHash, TxHash, B256, U256};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Block number and timestamp, fetched on demand and never cached.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    /// Block number.
    pub number: u64,
    /// Timestamp in unix seconds.
    pub timestamp: u64,
}

/// Block as returned by the node, optionally with full transaction bodies.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawBlock {
    /// Block number.
    pub number: u64,
    /// Block hash.
    pub hash: BlockHash,
    /// Timestamp in unix seconds.
    pub timestamp: u64,
    /// Transactions in block order. Empty when bodies were not requested.
    pub transactions: Vec<RawTransaction>,
}

impl RawBlock {
    pub fn block_ref(&self) -> BlockRef {
        BlockRef {
            number: self.number,
            timestamp: self.timestamp,
        }
    }
}

/// Chain-native transaction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawTransaction {
    /// Transaction hash.
    pub hash: TxHash,
    /// Sender address.
    pub from: Address,
    /// Recipient address (None for contract creation).
    pub to: Option<Address>,
    /// Value transferred in Wei.
    pub value: U256,
    /// Gas limit.
    pub gas_limit: u64,
    /// Gas price in Wei. Effective price for EIP-1559 transactions.
    pub gas_price: u128,
    /// Sender nonce.
    pub nonce: u64,
    /// Containing block number.
    pub block_number: u64,
    /// Containing block hash.
    pub block_hash: BlockHash,
    /// Position within the block.
    pub transaction_index: u64,
}

/// Chain-native transaction receipt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawReceipt {
    /// Gas consumed by this transaction.
    pub gas_used: u64,
    /// Gas consumed in the block up to and including this transaction.
    pub cumulative_gas_used: u64,
    /// Execution status (1=success, 0=revert).
    pub status: u8,
    /// Address of the created contract, if any.
    pub contract_address: Option<Address>,
    /// Post-transaction state root (pre-Byzantium receipts only).
    pub state_root: Option<B256>,
    /// Effective gas price in Wei, when the node reports it.
    pub effective_gas_price: Option<u128>,
}

/// Flattened, unit-converted transaction row.
///
/// Decimal fields are exact: `value` and `transaction_fee` are in ETH
/// (scale 18), `gas_price` is in gwei (scale 9).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Transaction hash (lowercase hex with 0x prefix).
    pub hash: String,
    /// Sender address (hex text).
    pub from: String,
    /// Recipient address (None for contract creation).
    pub to: Option<String>,
    /// Value transferred in ETH.
    pub value: BigDecimal,
    /// Gas price in gwei.
    pub gas_price: BigDecimal,
    /// Gas limit.
    pub gas_limit: u64,
    /// Gas used.
    pub gas_used: u64,
    /// `gas_used * gas_price` in ETH.
    pub transaction_fee: BigDecimal,
    /// Sender nonce.
    pub nonce: u64,
    /// Containing block number.
    pub block_number: u64,
    /// Containing block hash (hex text).
    pub block_hash: String,
    /// Block timestamp.
    pub block_timestamp: DateTime<Utc>,
    /// Position within the block.
    pub transaction_index: u64,
    /// Cumulative gas used in the block up to this transaction.
    pub cumulative_gas_used: u64,
    /// Execution status (1=success, 0=revert).
    pub status: u8,
    /// Created contract address, if any.
    pub contract_address: Option<String>,
    /// Legacy state root (hex text), if any.
    pub root: Option<String>,
    /// True iff `status != 1`.
    pub is_error: bool,
}

/// Result of a range extraction.
///
/// `records` is in ascending `(block_number, transaction_index)` order.
/// The skip lists name every block and transaction dropped after their
/// fetches were exhausted, so a gap can be told apart from an empty block.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Extraction {
    pub records: Vec<TransactionRecord>,
    pub skipped_blocks: Vec<u64>,
    pub skipped_transactions: Vec<TxHash>,
}

impl Extraction {
    /// True when nothing was dropped.
    pub fn is_complete(&self) -> bool {
        self.skipped_blocks.is_empty() && self.skipped_transactions.is_empty()
    }
}
