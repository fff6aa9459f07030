//! Session domain models.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sub-token replaced by a refresh exchange.
pub const ACCESS_TOKEN_KEY: &str = "access_token";
/// Sub-token replaced by a refresh exchange.
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Lifecycle status of one user's marketplace session.
///
/// The transition graph is `requires_configuration ⇄ active ⇄ refresh_error`
/// with no terminal state; `active` is the only state normal sync proceeds
/// from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    RefreshError,
    RequiresConfiguration,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::RefreshError => "refresh_error",
            Self::RequiresConfiguration => "requires_configuration",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "refresh_error" => Some(Self::RefreshError),
            "requires_configuration" => Some(Self::RequiresConfiguration),
            _ => None,
        }
    }
}

/// Persisted record tracking one user's external-marketplace session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub user_id: String,
    /// base64(nonce || ciphertext); the plaintext is never persisted or
    /// logged.
    pub encrypted_credential: String,
    pub status: SessionStatus,
    pub last_validated_at: Option<DateTime<Utc>>,
    pub last_refreshed_at: Option<DateTime<Utc>>,
    pub refresh_error_message: Option<String>,
}

/// Renewed token pair returned by a refresh exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Marketplace credential: a small map of named sub-tokens.
///
/// A refresh exchange replaces the known access/refresh sub-tokens and
/// leaves everything else (device ids, locale cookies, ...) untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential {
    tokens: BTreeMap<String, String>,
}

impl Credential {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        let mut tokens = BTreeMap::new();
        tokens.insert(ACCESS_TOKEN_KEY.to_string(), access_token.into());
        tokens.insert(REFRESH_TOKEN_KEY.to_string(), refresh_token.into());
        Self { tokens }
    }

    pub fn from_tokens(tokens: BTreeMap<String, String>) -> Self {
        Self { tokens }
    }

    pub fn access_token(&self) -> Option<&str> {
        self.get(ACCESS_TOKEN_KEY)
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.get(REFRESH_TOKEN_KEY)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.tokens.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.tokens.insert(key.into(), value.into());
    }

    /// Splice a renewed token pair in: known sub-token keys are replaced,
    /// unrecognized sub-tokens pass through unchanged.
    pub fn merge_refreshed(&mut self, tokens: &TokenPair) {
        self.tokens
            .insert(ACCESS_TOKEN_KEY.to_string(), tokens.access_token.clone());
        self.tokens
            .insert(REFRESH_TOKEN_KEY.to_string(), tokens.refresh_token.clone());
    }

    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Result of `refresh_session`, serialized to API callers as-is.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshSessionResult {
    pub success: bool,
    /// Present only when a refresh exchange actually minted new tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenPair>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RefreshSessionResult {
    /// Token was still valid; nothing minted.
    pub fn validated() -> Self {
        Self {
            success: true,
            tokens: None,
            error: None,
        }
    }

    pub fn refreshed(tokens: TokenPair) -> Self {
        Self {
            success: true,
            tokens: Some(tokens),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            tokens: None,
            error: Some(error.into()),
        }
    }
}
