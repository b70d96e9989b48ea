//! Error types for shardplane

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === Cancellation ===
    #[error("cancelled by caller")]
    Cancelled,

    // === Discovery store ===
    #[error("discovery store error: {0}")]
    Discovery(String),

    #[error("watch stream closed unexpectedly")]
    WatchClosed,

    // === Record decoding ===
    #[error("malformed record: {0}")]
    Decode(#[from] serde_json::Error),

    // === Address lookups ===
    #[error("invalid version")]
    InvalidVersion,

    #[error("shard {0} not found")]
    ShardNotFound(u64),

    #[error("no addresses published for version {0}")]
    AddressesNotFound(i64),

    // === Data plane ===
    #[error("shard transfer failed: {0}")]
    ShardTransfer(String),

    // === Config ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Is this a retryable error?
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Discovery(_) | Error::WatchClosed)
    }

    /// Did the caller ask us to stop?
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

// Implement From for common error types
impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Other(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(Error::Discovery("timeout".into()).is_retryable());
        assert!(Error::WatchClosed.is_retryable());
        assert!(!Error::Cancelled.is_retryable());
        assert!(!Error::InvalidVersion.is_retryable());
    }

    #[test]
    fn test_cancelled() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::WatchClosed.is_cancelled());
    }
}
