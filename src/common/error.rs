//! Error types for regionstore

use crate::coordinator::region::State;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Catalog Errors ===
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[error("Catalog row corrupted: {0}")]
    Corrupted(String),

    #[error("Unknown catalog table: {0}")]
    UnknownTable(String),

    #[error("Catalog region write failed: {0}")]
    DirectWrite(String),

    #[error("Batch of {total} mutations failed on {failed} entries: {first}")]
    BatchFailed {
        failed: usize,
        total: usize,
        first: String,
    },

    #[error("Connection closed")]
    ConnectionClosed,

    // === Coordination service ===
    #[error("Failed to update meta location: {0}")]
    CoordinationService(String),

    // === Region state ===
    #[error("Illegal argument: {0}")]
    IllegalArgument(String),

    #[error("Invalid region state: {0}")]
    InvalidState(String),

    #[error("Invalid server name: {0}")]
    InvalidServerName(String),

    #[error("Failed to persist region state {state} of {region}: {source}")]
    RegionStatePersist {
        region: String,
        state: State,
        #[source]
        source: Box<Error>,
    },

    // === Serialization ===
    #[error("Serialize error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Wrap an unrecoverable failure with the region and state it was recording.
    pub fn persist_failure(region: impl Into<String>, state: State, source: Error) -> Self {
        Error::RegionStatePersist {
            region: region.into(),
            state,
            source: Box::new(source),
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persist_failure_wraps_cause() {
        let err = Error::persist_failure("t1,,1", State::Open, Error::ConnectionClosed);
        let msg = err.to_string();
        assert!(msg.contains("t1,,1"));
        assert!(msg.contains("OPEN"));
        assert!(msg.contains("Connection closed"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
