//! HTTP client for the marketplace REST API.
//!
//! All calls authenticate with the per-user bearer token held in the
//! session credential. Response bodies are only ever logged truncated and
//! at debug level; tokens never appear in logs.

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use std::time::Duration;

use relist_core::session::{Credential, MarketplaceAuth, TokenPair};

use crate::errors::{MarketplaceError, Result};
use crate::models::{
    ApiErrorResponse, Brand, BrandsResponse, Catalog, CatalogItemsResponse, CatalogsResponse,
    MarketSearchQuery, SoldItem, TokenRefreshResponse,
};

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_LOG_BODY_CHARS: usize = 512;

/// The marketplace region this deployment resells on.
pub const DEFAULT_BASE_URL: &str = "https://www.vinted.fr";

/// The catalog endpoint rejects non-browser agents.
const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/108.0.0.0 Safari/537.36";

/// Sold listings fetched per analysis run.
const SOLD_ITEMS_PER_PAGE: u32 = 96;

/// Client for the marketplace REST API.
#[derive(Debug, Clone)]
pub struct MarketplaceClient {
    client: reqwest::Client,
    base_url: String,
}

impl MarketplaceClient {
    /// Create a new marketplace client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - The marketplace origin (e.g., "https://www.vinted.fr")
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Create headers for an authenticated API request.
    fn headers(&self, access_token: &str) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));

        let auth_value = HeaderValue::from_str(&format!("Bearer {}", access_token))
            .map_err(|_| MarketplaceError::invalid_request("Invalid access token format"))?;
        headers.insert(AUTHORIZATION, auth_value);

        Ok(headers)
    }

    fn log_response(status: reqwest::StatusCode, body: &str) {
        if status.is_success() {
            debug!("API response status: {}", status);
            return;
        }

        let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
        if body.chars().count() > MAX_LOG_BODY_CHARS {
            preview.push_str("...");
        }
        debug!("API response error ({}): {}", status, preview);
    }

    /// Parse a JSON response body.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        let body = response.text().await?;
        Self::log_response(status, &body);

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<ApiErrorResponse>(&body) {
                return Err(MarketplaceError::api(
                    status.as_u16(),
                    match error.code {
                        Some(code) => format!("{}: {}", code, error.message),
                        None => error.message,
                    },
                ));
            }
            return Err(MarketplaceError::api(
                status.as_u16(),
                format!("Request failed: {}", body),
            ));
        }

        serde_json::from_str(&body).map_err(|e| {
            warn!("Failed to deserialize marketplace response: {}", e);
            MarketplaceError::api(status.as_u16(), format!("Failed to parse response: {}", e))
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Catalog
    // ─────────────────────────────────────────────────────────────────────────

    /// Fetch sold listings matching a search query.
    ///
    /// GET /api/v2/catalog/items?search_text=...&is_for_sale=0
    pub async fn search_sold_items(
        &self,
        access_token: &str,
        query: &MarketSearchQuery,
    ) -> Result<Vec<SoldItem>> {
        let url = format!("{}/api/v2/catalog/items", self.base_url);
        let search_text = crate::analysis::normalize_search_text(&query.search_text);
        debug!("Searching sold listings for '{}'", search_text);

        let mut params: Vec<(&str, String)> = vec![
            ("search_text", search_text),
            ("catalog_ids", query.catalog_ids.clone().unwrap_or_default()),
            ("order", "relevance".to_string()),
            ("is_for_sale", "0".to_string()),
            ("per_page", SOLD_ITEMS_PER_PAGE.to_string()),
        ];
        if let Some(brand_id) = query.brand_id {
            params.push(("brand_ids", brand_id.to_string()));
        }

        let response = self
            .client
            .get(&url)
            .headers(self.headers(access_token)?)
            .query(&params)
            .send()
            .await?;

        let parsed: CatalogItemsResponse = Self::parse_response(response).await?;
        Ok(parsed.items)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Brands & Catalogs
    // ─────────────────────────────────────────────────────────────────────────

    /// Best-matching brand for a title, if any.
    ///
    /// GET /api/v2/brands?search_text=...
    pub async fn find_brand(&self, access_token: &str, title: &str) -> Result<Option<Brand>> {
        let url = format!("{}/api/v2/brands", self.base_url);

        let response = self
            .client
            .get(&url)
            .headers(self.headers(access_token)?)
            .query(&[("search_text", title)])
            .send()
            .await?;

        let parsed: BrandsResponse = Self::parse_response(response).await?;
        Ok(parsed.brands.into_iter().next())
    }

    /// Best-matching catalog (category) for a title, if any.
    ///
    /// GET /api/v2/catalogs?search_text=...
    pub async fn find_catalog(&self, access_token: &str, title: &str) -> Result<Option<Catalog>> {
        let url = format!("{}/api/v2/catalogs", self.base_url);

        let response = self
            .client
            .get(&url)
            .headers(self.headers(access_token)?)
            .query(&[("search_text", title)])
            .send()
            .await?;

        let parsed: CatalogsResponse = Self::parse_response(response).await?;
        Ok(parsed.catalogs.into_iter().next())
    }

    /// All brands the marketplace knows.
    pub async fn list_brands(&self, access_token: &str) -> Result<Vec<Brand>> {
        let url = format!("{}/api/v2/brands", self.base_url);

        let response = self
            .client
            .get(&url)
            .headers(self.headers(access_token)?)
            .query(&[("per_page", "1000")])
            .send()
            .await?;

        let parsed: BrandsResponse = Self::parse_response(response).await?;
        Ok(parsed.brands)
    }

    /// All catalogs (categories) the marketplace knows.
    pub async fn list_catalogs(&self, access_token: &str) -> Result<Vec<Catalog>> {
        let url = format!("{}/api/v2/catalogs", self.base_url);

        let response = self
            .client
            .get(&url)
            .headers(self.headers(access_token)?)
            .send()
            .await?;

        let parsed: CatalogsResponse = Self::parse_response(response).await?;
        Ok(parsed.catalogs)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Token lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Cheap authenticated probe: does the marketplace still accept this
    /// access token? 401/403 means no; any other failure is a transport
    /// error the caller must treat as transient.
    pub async fn probe_token(&self, access_token: &str) -> Result<bool> {
        let url = format!("{}/api/v2/brands", self.base_url);

        let response = self
            .client
            .get(&url)
            .headers(self.headers(access_token)?)
            .query(&[("per_page", "1")])
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            debug!("Token probe rejected ({})", status);
            return Ok(false);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            Self::log_response(status, &body);
            return Err(MarketplaceError::api(
                status.as_u16(),
                format!("Token probe failed: {}", body),
            ));
        }

        Ok(true)
    }

    /// Exchange a refresh token for a renewed pair.
    ///
    /// POST /oauth/token (grant_type=refresh_token)
    pub async fn exchange_refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<TokenRefreshResponse> {
        let url = format!("{}/oauth/token", self.base_url);
        debug!("Exchanging refresh token");

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));

        let response = self
            .client
            .post(&url)
            .headers(headers)
            .json(&serde_json::json!({
                "grant_type": "refresh_token",
                "refresh_token": refresh_token,
            }))
            .send()
            .await?;

        Self::parse_response(response).await
    }
}

#[async_trait]
impl MarketplaceAuth for MarketplaceClient {
    async fn is_token_valid(&self, credential: &Credential) -> relist_core::Result<bool> {
        let Some(access_token) = credential.access_token() else {
            return Ok(false);
        };
        self.probe_token(access_token).await.map_err(Into::into)
    }

    async fn refresh_access_token(&self, credential: &Credential) -> relist_core::Result<TokenPair> {
        let refresh_token = credential.refresh_token().ok_or_else(|| {
            relist_core::Error::remote("Credential holds no refresh token")
        })?;

        let renewed = self.exchange_refresh_token(refresh_token).await?;
        Ok(TokenPair {
            access_token: renewed.access_token,
            refresh_token: renewed.refresh_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_normalized() {
        let client = MarketplaceClient::new("https://www.vinted.fr/");
        assert_eq!(client.base_url, "https://www.vinted.fr");
    }

    #[test]
    fn headers_carry_bearer_token() {
        let client = MarketplaceClient::new(DEFAULT_BASE_URL);
        let headers = client.headers("token-123").unwrap();
        assert_eq!(
            headers.get(AUTHORIZATION).unwrap().to_str().unwrap(),
            "Bearer token-123"
        );
    }

    #[test]
    fn invalid_token_characters_are_rejected() {
        let client = MarketplaceClient::new(DEFAULT_BASE_URL);
        assert!(matches!(
            client.headers("bad\ntoken"),
            Err(MarketplaceError::InvalidRequest(_))
        ));
    }

    #[test]
    fn parses_token_refresh_response() {
        let json = r#"{"access_token": "a2", "refresh_token": "r2", "expires_in": 7200}"#;
        let parsed: TokenRefreshResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.access_token, "a2");
        assert_eq!(parsed.refresh_token, "r2");
        assert_eq!(parsed.expires_in, Some(7200));
    }
}
