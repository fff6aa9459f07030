//! Error types for the marketplace crate.

use thiserror::Error;

/// Result type alias for marketplace operations.
pub type Result<T> = std::result::Result<T, MarketplaceError>;

/// Retry policy class for marketplace API failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiRetryClass {
    Retryable,
    Permanent,
    ReauthRequired,
}

/// Errors that can occur while talking to the marketplace.
#[derive(Debug, Error)]
pub enum MarketplaceError {
    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error response from the marketplace API
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// No usable session; the user has to reconnect the account
    #[error("Authentication required: {0}")]
    AuthenticationRequired(String),

    /// Invalid request (missing required data, etc.)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Local persistence failure behind the analysis-history store
    #[error("Storage error: {0}")]
    Storage(String),
}

impl MarketplaceError {
    /// Create an API error from status and message
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Create an authentication-required error
    pub fn authentication_required(message: impl Into<String>) -> Self {
        Self::AuthenticationRequired(message.into())
    }

    /// Create an invalid request error
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// HTTP status if this is an API error.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Classify error for retry policy.
    pub fn retry_class(&self) -> ApiRetryClass {
        match self {
            Self::Api { status, .. } => match *status {
                401 | 403 => ApiRetryClass::ReauthRequired,
                408 | 409 | 423 | 425 | 429 => ApiRetryClass::Retryable,
                500..=599 => ApiRetryClass::Retryable,
                _ => ApiRetryClass::Permanent,
            },
            Self::Http(_) => ApiRetryClass::Retryable,
            Self::Json(_) => ApiRetryClass::Permanent,
            Self::AuthenticationRequired(_) => ApiRetryClass::ReauthRequired,
            Self::InvalidRequest(_) => ApiRetryClass::Permanent,
            Self::Storage(_) => ApiRetryClass::Permanent,
        }
    }
}

impl From<MarketplaceError> for relist_core::Error {
    fn from(error: MarketplaceError) -> Self {
        relist_core::Error::Remote(error.to_string())
    }
}
