//! Maps raw transactions and receipts into [`TransactionRecord`]s.
//!
//! All unit conversions are exact: Wei amounts become a [`BigDecimal`] whose
//! unscaled digits are the Wei integer and whose scale is the unit's decimals.
//! The fee is multiplied out in Wei and scaled once.

use alloy::primitives::U256;
use bigdecimal::num_bigint::{BigInt, Sign};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};

use crate::types::{RawReceipt, RawTransaction, TransactionRecord};

/// Decimal places between Wei and ETH.
pub const ETH_DECIMALS: i64 = 18;

/// Decimal places between Wei and gwei.
pub const GWEI_DECIMALS: i64 = 9;

fn u256_to_bigint(value: U256) -> BigInt {
    BigInt::from_bytes_be(Sign::Plus, &value.to_be_bytes::<32>())
}

/// Wei to ETH.
pub fn wei_to_eth(wei: U256) -> BigDecimal {
    BigDecimal::new(u256_to_bigint(wei), ETH_DECIMALS)
}

/// Wei to gwei.
pub fn wei_to_gwei(wei: u128) -> BigDecimal {
    BigDecimal::new(BigInt::from(wei), GWEI_DECIMALS)
}

/// `gas_used * gas_price` in ETH, computed in Wei.
pub fn fee_in_eth(gas_used: u64, gas_price_wei: u128) -> BigDecimal {
    let fee_wei = BigInt::from(gas_used) * BigInt::from(gas_price_wei);
    BigDecimal::new(fee_wei, ETH_DECIMALS)
}

/// Builds the flat record for one transaction.
///
/// The gas price used for both `gas_price` and `transaction_fee` is the
/// receipt's effective price when present, otherwise the transaction's.
pub fn to_record(tx: &RawTransaction, receipt: &RawReceipt, block_timestamp: u64) -> TransactionRecord {
    let gas_price_wei = receipt.effective_gas_price.unwrap_or(tx.gas_price);

    TransactionRecord {
        hash: format!("{:#x}", tx.hash),
        from: tx.from.to_checksum(None),
        to: tx.to.map(|addr| addr.to_checksum(None)),
        value: wei_to_eth(tx.value),
        gas_price: wei_to_gwei(gas_price_wei),
        gas_limit: tx.gas_limit,
        gas_used: receipt.gas_used,
        transaction_fee: fee_in_eth(receipt.gas_used, gas_price_wei),
        nonce: tx.nonce,
        block_number: tx.block_number,
        block_hash: format!("{:#x}", tx.block_hash),
        block_timestamp: timestamp_to_utc(block_timestamp),
        transaction_index: tx.transaction_index,
        cumulative_gas_used: receipt.cumulative_gas_used,
        status: receipt.status,
        contract_address: receipt.contract_address.map(|addr| addr.to_checksum(None)),
        root: receipt.state_root.map(|root| format!("{root:#x}")),
        is_error: receipt.status != 1,
    }
}

fn timestamp_to_utc(secs: u64) -> DateTime<Utc> {
    i64::try_from(secs)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, b256, B256};
    use std::str::FromStr;

    fn sample_tx() -> RawTransaction {
        RawTransaction {
            hash: b256!("5c504ed432cb51138bcf09aa5e8a410dd4a1e204ef84bfed1be16dfba1b22060"),
            from: address!("f39fd6e51aad88f6f4ce6ab8827279cfffb92266"),
            to: Some(address!("70997970c51812dc3a010c7d01b50e0d17dc79c8")),
            value: U256::from(1_500_000_000_000_000_000u128), // 1.5 ETH
            gas_limit: 21_000,
            gas_price: 20_000_000_000, // 20 gwei
            nonce: 7,
            block_number: 18_000_000,
            block_hash: B256::repeat_byte(0xab),
            transaction_index: 3,
        }
    }

    fn sample_receipt(status: u8) -> RawReceipt {
        RawReceipt {
            gas_used: 21_000,
            cumulative_gas_used: 84_000,
            status,
            contract_address: None,
            state_root: None,
            effective_gas_price: None,
        }
    }

    #[test]
    fn converts_units_exactly() {
        let record = to_record(&sample_tx(), &sample_receipt(1), 1_700_000_000);

        assert_eq!(record.value, BigDecimal::from_str("1.5").unwrap());
        assert_eq!(record.gas_price, BigDecimal::from_str("20").unwrap());
        // 21000 * 20 gwei = 0.00042 ETH
        assert_eq!(record.transaction_fee, BigDecimal::from_str("0.00042").unwrap());
    }

    #[test]
    fn fee_has_no_float_drift() {
        // 0.1 gwei + 1 wei: not representable in binary floating point
        let price = 100_000_001u128;
        let fee = fee_in_eth(3, price);
        assert_eq!(fee, BigDecimal::from_str("0.000000000300000003").unwrap());
        assert_eq!(wei_to_gwei(price), BigDecimal::from_str("0.100000001").unwrap());
    }

    #[test]
    fn receipt_effective_price_wins() {
        let mut receipt = sample_receipt(1);
        receipt.effective_gas_price = Some(15_000_000_000);

        let record = to_record(&sample_tx(), &receipt, 1_700_000_000);

        assert_eq!(record.gas_price, BigDecimal::from_str("15").unwrap());
        assert_eq!(record.transaction_fee, BigDecimal::from_str("0.000315").unwrap());
    }

    #[test]
    fn is_error_follows_status() {
        assert!(!to_record(&sample_tx(), &sample_receipt(1), 0).is_error);
        assert!(to_record(&sample_tx(), &sample_receipt(0), 0).is_error);
    }

    #[test]
    fn maps_identity_and_block_fields() {
        let record = to_record(&sample_tx(), &sample_receipt(1), 1_700_000_000);

        assert_eq!(
            record.hash,
            "0x5c504ed432cb51138bcf09aa5e8a410dd4a1e204ef84bfed1be16dfba1b22060"
        );
        assert_eq!(record.from, "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266");
        assert_eq!(
            record.to.as_deref(),
            Some("0x70997970C51812dc3A010C7d01b50e0d17dc79C8")
        );
        assert_eq!(record.block_number, 18_000_000);
        assert_eq!(record.block_hash, format!("0x{}", "ab".repeat(32)));
        assert_eq!(record.block_timestamp.timestamp(), 1_700_000_000);
        assert_eq!(record.transaction_index, 3);
        assert_eq!(record.cumulative_gas_used, 84_000);
        assert_eq!(record.nonce, 7);
    }

    #[test]
    fn contract_creation_has_no_recipient() {
        let mut tx = sample_tx();
        tx.to = None;
        let mut receipt = sample_receipt(1);
        receipt.contract_address = Some(address!("5fbdb2315678afecb367f032d93f642f64180aa3"));
        receipt.state_root = Some(B256::repeat_byte(0x01));

        let record = to_record(&tx, &receipt, 0);

        assert_eq!(record.to, None);
        assert_eq!(
            record.contract_address.as_deref(),
            Some("0x5FbDB2315678afecb367f032d93F642f64180aa3")
        );
        assert_eq!(record.root, Some(format!("0x{}", "01".repeat(32))));
    }
}
