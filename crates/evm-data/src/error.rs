//! Error types shared by the chain client, the retrier and the extractor.

use thiserror::Error;

/// Tagged failure of a single remote fetch.
///
/// `Unavailable` is transient and worth retrying. `NotFound` and
/// `Malformed` are permanent: repeating the call cannot change the answer.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FetchError {
    /// Timeout, rate limit or temporarily unreachable node.
    #[error("node unavailable: {0}")]
    Unavailable(String),
    /// The node answered but has no such block or receipt.
    #[error("not found: {0}")]
    NotFound(String),
    /// The request itself is invalid (bad hash, bad params).
    #[error("malformed request: {0}")]
    Malformed(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Unavailable(_))
    }
}

pub type FetchResult<T> = std::result::Result<T, FetchError>;

/// Whole-run failures. Everything else is absorbed per block or per transaction.
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("invalid block range: start {start} is greater than end {end}")]
    InvalidRange { start: u64, end: u64 },

    #[error("failed to connect to node at {url}: {reason}")]
    Connection { url: String, reason: String },
}
