//! evm-data crate

pub mod archive;
pub mod backoff;
pub mod client;
pub mod collect;
pub mod columnar;
pub mod config;
pub mod error;
pub mod extract;
pub mod normalize;
pub mod timing;
pub mod types;
pub mod window;

pub use types::{BlockRef, Extraction, RawBlock, RawReceipt, RawTransaction, TransactionRecord};
