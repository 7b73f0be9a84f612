//! Remote chain access.
//!
//! [`ChainClient`] is the seam the window locator and range extractor call
//! through. Every call returns a tagged [`FetchResult`] so callers branch on
//! transient vs permanent failures instead of unwinding.
//! [`RpcChainClient`] implements it over an Alloy HTTP provider.

use std::future::Future;
use std::sync::Arc;

use alloy::consensus::Transaction as ConsensusTx;
use alloy::network::{Ethereum, ReceiptResponse, TransactionResponse};
use alloy::primitives::TxHash;
use alloy::providers::fillers::FillProvider;
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::eth::{BlockNumberOrTag, Transaction};
use alloy::transports::{RpcError, TransportError};

use crate::error::{CollectError, FetchError, FetchResult};
use crate::types::{RawBlock, RawReceipt, RawTransaction};

/// JSON-RPC error codes that mean the request itself is wrong.
const INVALID_REQUEST: i64 = -32600;
const INVALID_PARAMS: i64 = -32602;

/// Read-only view of a chain node.
pub trait ChainClient: Send + Sync {
    /// Number of the most recent block.
    fn latest_block_number(&self) -> impl Future<Output = FetchResult<u64>> + Send;

    /// Block by number. Transaction bodies are included only when requested.
    fn get_block(
        &self,
        number: u64,
        include_transactions: bool,
    ) -> impl Future<Output = FetchResult<RawBlock>> + Send;

    /// Receipt for a mined transaction.
    fn get_transaction_receipt(
        &self,
        hash: TxHash,
    ) -> impl Future<Output = FetchResult<RawReceipt>> + Send;
}

type ProviderType = FillProvider<
    alloy::providers::fillers::JoinFill<
        alloy::providers::Identity,
        alloy::providers::fillers::JoinFill<
            alloy::providers::fillers::GasFiller,
            alloy::providers::fillers::JoinFill<
                alloy::providers::fillers::BlobGasFiller,
                alloy::providers::fillers::JoinFill<
                    alloy::providers::fillers::NonceFiller,
                    alloy::providers::fillers::ChainIdFiller,
                >,
            >,
        >,
    >,
    alloy::providers::RootProvider<Ethereum>,
>;

/// [`ChainClient`] backed by an Ethereum JSON-RPC endpoint.
pub struct RpcChainClient {
    provider: Arc<ProviderType>,
}

impl RpcChainClient {
    /// Creates a client and tests RPC connectivity.
    ///
    /// Verifies the endpoint with an `eth_blockNumber` call. There is no
    /// partially connected state: any failure here is a
    /// [`CollectError::Connection`].
    ///
    /// # Example
    /// ```no_run
    /// # use evm_data::client::RpcChainClient;
    /// # async fn example() -> Result<(), evm_data::error::CollectError> {
    /// let client = RpcChainClient::connect("https://mainnet.infura.io/v3/YOUR_KEY").await?;
    /// # Ok(())
    /// # }
    /// ```
    #[tracing::instrument(skip_all, fields(rpc_url = %rpc_url))]
    pub async fn connect(rpc_url: &str) -> Result<Self, CollectError> {
        let connection_error = |reason: String| CollectError::Connection {
            url: rpc_url.to_string(),
            reason,
        };

        let url: reqwest::Url = rpc_url
            .parse()
            .map_err(|e| connection_error(format!("invalid RPC URL format: {e}")))?;
        let provider = Arc::new(ProviderBuilder::new().on_http(url));

        let latest_block = provider
            .get_block_number()
            .await
            .map_err(|e| connection_error(format!("eth_blockNumber failed: {e}")))?;

        tracing::info!(rpc_url = %rpc_url, latest_block, "RPC connection successful");

        Ok(Self { provider })
    }
}

impl ChainClient for RpcChainClient {
    async fn latest_block_number(&self) -> FetchResult<u64> {
        self.provider
            .get_block_number()
            .await
            .map_err(classify_transport_error)
    }

    async fn get_block(&self, number: u64, include_transactions: bool) -> FetchResult<RawBlock> {
        let request = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(number));
        let request = if include_transactions {
            request.full()
        } else {
            request.hashes()
        };

        let block = request
            .await
            .map_err(classify_transport_error)?
            .ok_or_else(|| FetchError::NotFound(format!("block {number}")))?;

        let hash = block.header.hash;
        let transactions = block
            .transactions
            .as_transactions()
            .unwrap_or(&[])
            .iter()
            .enumerate()
            .map(|(idx, tx)| map_transaction(tx, number, hash, idx as u64))
            .collect();

        Ok(RawBlock {
            number: block.header.number,
            hash,
            timestamp: block.header.timestamp,
            transactions,
        })
    }

    async fn get_transaction_receipt(&self, hash: TxHash) -> FetchResult<RawReceipt> {
        let receipt = self
            .provider
            .get_transaction_receipt(hash)
            .await
            .map_err(classify_transport_error)?
            .ok_or_else(|| FetchError::NotFound(format!("receipt {hash}")))?;

        Ok(RawReceipt {
            gas_used: receipt.gas_used,
            cumulative_gas_used: ReceiptResponse::cumulative_gas_used(&receipt),
            status: u8::from(receipt.status()),
            contract_address: receipt.contract_address,
            state_root: ReceiptResponse::state_root(&receipt),
            effective_gas_price: Some(receipt.effective_gas_price),
        })
    }
}

fn map_transaction(
    tx: &Transaction,
    block_number: u64,
    block_hash: alloy::primitives::BlockHash,
    position: u64,
) -> RawTransaction {
    // RPC `gasPrice` on a mined type-2 tx is already the effective price;
    // fall back to the fee cap only when the node omits it.
    let gas_price = tx
        .effective_gas_price
        .or_else(|| ConsensusTx::gas_price(tx))
        .unwrap_or_else(|| ConsensusTx::max_fee_per_gas(tx));

    RawTransaction {
        hash: TransactionResponse::tx_hash(tx),
        from: TransactionResponse::from(tx),
        to: ConsensusTx::to(tx),
        value: ConsensusTx::value(tx),
        gas_limit: ConsensusTx::gas_limit(tx),
        gas_price,
        nonce: ConsensusTx::nonce(tx),
        block_number: TransactionResponse::block_number(tx).unwrap_or(block_number),
        block_hash: TransactionResponse::block_hash(tx).unwrap_or(block_hash),
        transaction_index: TransactionResponse::transaction_index(tx).unwrap_or(position),
    }
}

/// Maps an Alloy transport error onto the transient/permanent split.
pub(crate) fn classify_transport_error(err: TransportError) -> FetchError {
    match &err {
        RpcError::ErrorResp(payload)
            if payload.code == INVALID_PARAMS || payload.code == INVALID_REQUEST =>
        {
            FetchError::Malformed(err.to_string())
        }
        RpcError::ErrorResp(_) | RpcError::Transport(_) | RpcError::NullResp => {
            FetchError::Unavailable(err.to_string())
        }
        _ => FetchError::Malformed(err.to_string()),
    }
}
