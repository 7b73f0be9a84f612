//! Columnar persistence of [`TransactionRecord`]s.
//!
//! One row per record. ETH amounts are `Decimal256(76, 18)`, gwei amounts
//! `Decimal128(38, 9)`, so the unscaled column value is the Wei integer and
//! no precision is lost on the way to disk. Any Wei value below `10^76` fits
//! the ETH columns; [`is_representable`] tells callers whether a record does.

use std::fs::File;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BooleanArray, BooleanBuilder, Decimal128Array, Decimal128Builder,
    Decimal256Array, Decimal256Builder, StringArray, StringBuilder, TimestampSecondArray, TimestampSecondBuilder, UInt64Array,
    UInt64Builder, UInt8Array, UInt8Builder,
};
use arrow::datatypes::{i256, DataType, Field, Schema, SchemaRef, TimeUnit};
use arrow::record_batch::RecordBatch;
use bigdecimal::BigDecimal;
use chrono::DateTime;
use eyre::{bail, eyre, Context, ContextCompat, Result};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;

use crate::normalize::{ETH_DECIMALS, GWEI_DECIMALS};
use crate::types::TransactionRecord;

const GWEI_PRECISION: u8 = 38;
const ETH_PRECISION: u8 = 76;
const UTC: &str = "UTC";

/// Arrow schema of the transaction table.
pub fn record_schema() -> SchemaRef {
    let eth = DataType::Decimal256(ETH_PRECISION, ETH_DECIMALS as i8);
    let gwei = DataType::Decimal128(GWEI_PRECISION, GWEI_DECIMALS as i8);
    let timestamp = DataType::Timestamp(TimeUnit::Second, Some(UTC.into()));

    Arc::new(Schema::new(vec![
        Field::new("hash", DataType::Utf8, false),
        Field::new("from", DataType::Utf8, false),
        Field::new("to", DataType::Utf8, true),
        Field::new("value", eth.clone(), false),
        Field::new("gas_price", gwei, false),
        Field::new("gas_limit", DataType::UInt64, false),
        Field::new("gas_used", DataType::UInt64, false),
        Field::new("transaction_fee", eth, false),
        Field::new("nonce", DataType::UInt64, false),
        Field::new("block_number", DataType::UInt64, false),
        Field::new("block_hash", DataType::Utf8, false),
        Field::new("block_timestamp", timestamp, false),
        Field::new("transaction_index", DataType::UInt64, false),
        Field::new("cumulative_gas_used", DataType::UInt64, false),
        Field::new("status", DataType::UInt8, false),
        Field::new("contract_address", DataType::Utf8, true),
        Field::new("root", DataType::Utf8, true),
        Field::new("is_error", DataType::Boolean, false),
    ]))
}

/// Unscaled digits of `value` at `scale` decimal places, checked against
/// `precision`.
fn unscaled_digits(value: &BigDecimal, scale: i64, precision: u8) -> Result<String> {
    let (digits, _) = value.with_scale(scale).as_bigint_and_exponent();
    let digits = digits.to_string();
    if digits.trim_start_matches('-').len() > usize::from(precision) {
        bail!("decimal {value} exceeds {precision} digits of precision");
    }
    Ok(digits)
}

fn eth_unscaled(value: &BigDecimal) -> Result<i256> {
    let digits = unscaled_digits(value, ETH_DECIMALS, ETH_PRECISION)?;
    i256::from_string(&digits).ok_or_else(|| eyre!("decimal {value} does not fit Decimal256"))
}

fn gwei_unscaled(value: &BigDecimal) -> Result<i128> {
    unscaled_digits(value, GWEI_DECIMALS, GWEI_PRECISION)?
        .parse::<i128>()
        .wrap_err_with(|| format!("decimal {value} does not fit Decimal128"))
}

fn from_unscaled(value: impl std::fmt::Display, scale: i64) -> Result<BigDecimal> {
    BigDecimal::from_str(&format!("{value}e-{scale}"))
        .wrap_err_with(|| format!("invalid decimal column value {value}"))
}

/// True when every decimal of `record` fits its column type.
pub fn is_representable(record: &TransactionRecord) -> bool {
    eth_unscaled(&record.value).is_ok()
        && eth_unscaled(&record.transaction_fee).is_ok()
        && gwei_unscaled(&record.gas_price).is_ok()
}

/// Builds a single record batch from `records`.
///
/// # Errors
/// Returns error if a decimal does not fit its column; filter with
/// [`is_representable`] first.
pub fn records_to_batch(records: &[TransactionRecord]) -> Result<RecordBatch> {
    let mut hash = StringBuilder::new();
    let mut from = StringBuilder::new();
    let mut to = StringBuilder::new();
    let mut value = Decimal256Builder::new()
        .with_precision_and_scale(ETH_PRECISION, ETH_DECIMALS as i8)?;
    let mut gas_price = Decimal128Builder::new()
        .with_precision_and_scale(GWEI_PRECISION, GWEI_DECIMALS as i8)?;
    let mut gas_limit = UInt64Builder::new();
    let mut gas_used = UInt64Builder::new();
    let mut transaction_fee = Decimal256Builder::new()
        .with_precision_and_scale(ETH_PRECISION, ETH_DECIMALS as i8)?;
    let mut nonce = UInt64Builder::new();
    let mut block_number = UInt64Builder::new();
    let mut block_hash = StringBuilder::new();
    let mut block_timestamp = TimestampSecondBuilder::new().with_timezone(UTC);
    let mut transaction_index = UInt64Builder::new();
    let mut cumulative_gas_used = UInt64Builder::new();
    let mut status = UInt8Builder::new();
    let mut contract_address = StringBuilder::new();
    let mut root = StringBuilder::new();
    let mut is_error = BooleanBuilder::new();

    for r in records {
        hash.append_value(&r.hash);
        from.append_value(&r.from);
        to.append_option(r.to.as_deref());
        value.append_value(eth_unscaled(&r.value)?);
        gas_price.append_value(gwei_unscaled(&r.gas_price)?);
        gas_limit.append_value(r.gas_limit);
        gas_used.append_value(r.gas_used);
        transaction_fee.append_value(eth_unscaled(&r.transaction_fee)?);
        nonce.append_value(r.nonce);
        block_number.append_value(r.block_number);
        block_hash.append_value(&r.block_hash);
        block_timestamp.append_value(r.block_timestamp.timestamp());
        transaction_index.append_value(r.transaction_index);
        cumulative_gas_used.append_value(r.cumulative_gas_used);
        status.append_value(r.status);
        contract_address.append_option(r.contract_address.as_deref());
        root.append_option(r.root.as_deref());
        is_error.append_value(r.is_error);
    }

    let columns: Vec<ArrayRef> = vec![
        Arc::new(hash.finish()),
        Arc::new(from.finish()),
        Arc::new(to.finish()),
        Arc::new(value.finish()),
        Arc::new(gas_price.finish()),
        Arc::new(gas_limit.finish()),
        Arc::new(gas_used.finish()),
        Arc::new(transaction_fee.finish()),
        Arc::new(nonce.finish()),
        Arc::new(block_number.finish()),
        Arc::new(block_hash.finish()),
        Arc::new(block_timestamp.finish()),
        Arc::new(transaction_index.finish()),
        Arc::new(cumulative_gas_used.finish()),
        Arc::new(status.finish()),
        Arc::new(contract_address.finish()),
        Arc::new(root.finish()),
        Arc::new(is_error.finish()),
    ];

    RecordBatch::try_new(record_schema(), columns).wrap_err("failed to build record batch")
}

/// Writes `records` to a Parquet file at `path`, creating parent directories.
///
/// # Errors
/// Returns error if the directory or file cannot be created or the batch
/// cannot be encoded.
#[tracing::instrument(skip(records), fields(path = %path.display(), rows = records.len()))]
pub fn write_parquet(records: &[TransactionRecord], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .wrap_err_with(|| format!("failed to create output directory: {}", parent.display()))?;
    }

    let batch = records_to_batch(records)?;
    let file = File::create(path)
        .wrap_err_with(|| format!("failed to create parquet file: {}", path.display()))?;
    let mut writer =
        ArrowWriter::try_new(file, batch.schema(), None).wrap_err("failed to create arrow writer")?;
    writer.write(&batch).wrap_err("failed to write record batch")?;
    writer.close().wrap_err("failed to finalize parquet file")?;

    tracing::info!(path = %path.display(), rows = records.len(), "transactions saved to parquet");
    Ok(())
}

/// Reads a Parquet file written by [`write_parquet`] back into records.
///
/// # Errors
/// Returns error if the file cannot be opened or a column is missing or has
/// an unexpected type.
pub fn read_parquet(path: &Path) -> Result<Vec<TransactionRecord>> {
    let file = File::open(path)
        .wrap_err_with(|| format!("failed to open parquet file: {}", path.display()))?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .wrap_err("failed to parse parquet metadata")?
        .build()
        .wrap_err("failed to build parquet record batch reader")?;

    let mut records = Vec::new();
    for batch in reader {
        let batch = batch.wrap_err("failed to read record batch")?;
        records.extend(batch_to_records(&batch)?);
    }

    tracing::debug!(rows = records.len(), path = %path.display(), "parsed parquet file");
    Ok(records)
}

fn column<'b, A: Array + 'static>(batch: &'b RecordBatch, name: &str) -> Result<&'b A> {
    batch
        .column_by_name(name)
        .with_context(|| format!("column {name} not found in parquet schema"))?
        .as_any()
        .downcast_ref::<A>()
        .with_context(|| format!("column {name} has unexpected type"))
}

fn optional(col: &StringArray, row: usize) -> Option<String> {
    (!col.is_null(row)).then(|| col.value(row).to_string())
}

fn batch_to_records(batch: &RecordBatch) -> Result<Vec<TransactionRecord>> {
    let hash = column::<StringArray>(batch, "hash")?;
    let from = column::<StringArray>(batch, "from")?;
    let to = column::<StringArray>(batch, "to")?;
    let value = column::<Decimal256Array>(batch, "value")?;
    let gas_price = column::<Decimal128Array>(batch, "gas_price")?;
    let gas_limit = column::<UInt64Array>(batch, "gas_limit")?;
    let gas_used = column::<UInt64Array>(batch, "gas_used")?;
    let transaction_fee = column::<Decimal256Array>(batch, "transaction_fee")?;
    let nonce = column::<UInt64Array>(batch, "nonce")?;
    let block_number = column::<UInt64Array>(batch, "block_number")?;
    let block_hash = column::<StringArray>(batch, "block_hash")?;
    let block_timestamp = column::<TimestampSecondArray>(batch, "block_timestamp")?;
    let transaction_index = column::<UInt64Array>(batch, "transaction_index")?;
    let cumulative_gas_used = column::<UInt64Array>(batch, "cumulative_gas_used")?;
    let status = column::<UInt8Array>(batch, "status")?;
    let contract_address = column::<StringArray>(batch, "contract_address")?;
    let root = column::<StringArray>(batch, "root")?;
    let is_error = column::<BooleanArray>(batch, "is_error")?;

    (0..batch.num_rows())
        .map(|row| {
            let timestamp = block_timestamp.value(row);
            Ok(TransactionRecord {
                hash: hash.value(row).to_string(),
                from: from.value(row).to_string(),
                to: optional(to, row),
                value: from_unscaled(value.value(row), ETH_DECIMALS)?,
                gas_price: from_unscaled(gas_price.value(row), GWEI_DECIMALS)?,
                gas_limit: gas_limit.value(row),
                gas_used: gas_used.value(row),
                transaction_fee: from_unscaled(transaction_fee.value(row), ETH_DECIMALS)?,
                nonce: nonce.value(row),
                block_number: block_number.value(row),
                block_hash: block_hash.value(row).to_string(),
                block_timestamp: DateTime::from_timestamp(timestamp, 0)
                    .with_context(|| format!("block_timestamp {timestamp} out of range"))?,
                transaction_index: transaction_index.value(row),
                cumulative_gas_used: cumulative_gas_used.value(row),
                status: status.value(row),
                contract_address: optional(contract_address, row),
                root: optional(root, row),
                is_error: is_error.value(row),
            })
        })
        .collect()
}
