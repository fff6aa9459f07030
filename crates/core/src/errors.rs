//! Error types for the relist core crate.

use thiserror::Error;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the sync engine core.
#[derive(Debug, Error)]
pub enum Error {
    /// Stored ciphertext could not be opened (tampered, wrong key, never set).
    #[error("Decryption error: {0}")]
    Decryption(String),

    /// Persistence collaborator failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Remote marketplace call failed (network or protocol).
    #[error("Remote error: {0}")]
    Remote(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid caller input (missing required data, etc.)
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Create a decryption error.
    pub fn decryption(message: impl Into<String>) -> Self {
        Self::Decryption(message.into())
    }

    /// Create a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Create a remote error.
    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote(message.into())
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }
}
