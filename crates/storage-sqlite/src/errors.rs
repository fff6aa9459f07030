//! Error types for the SQLite storage crate.

use thiserror::Error;

/// Errors raised by the storage layer before conversion into the domain
/// crates' error types.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row no longer round-trips into its domain model.
    #[error("Corrupt row: {0}")]
    CorruptRow(String),
}

impl From<StorageError> for relist_core::Error {
    fn from(error: StorageError) -> Self {
        relist_core::Error::Storage(error.to_string())
    }
}

impl From<StorageError> for relist_marketplace::MarketplaceError {
    fn from(error: StorageError) -> Self {
        relist_marketplace::MarketplaceError::Storage(error.to_string())
    }
}
