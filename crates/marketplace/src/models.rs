//! Marketplace wire models and analysis domain models.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Wire models (as the marketplace API returns them)
// ─────────────────────────────────────────────────────────────────────────────

/// Top-level catalog search response.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogItemsResponse {
    #[serde(default)]
    pub items: Vec<SoldItem>,
}

/// One listing returned by the catalog search.
///
/// Fields the analysis does not need are dropped at deserialization; the
/// price amount stays a string as the API sends it and is parsed lazily so
/// one malformed listing never sinks a whole page.
#[derive(Debug, Clone, Deserialize)]
pub struct SoldItem {
    pub id: i64,
    #[serde(default)]
    pub title: Option<String>,
    pub price: ItemPrice,
    #[serde(default)]
    pub brand_title: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    pub user: ItemSeller,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ItemPrice {
    pub amount: String,
    #[serde(default)]
    pub currency_code: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ItemSeller {
    pub login: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrandsResponse {
    #[serde(default)]
    pub brands: Vec<Brand>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Brand {
    pub id: i64,
    pub title: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogsResponse {
    #[serde(default)]
    pub catalogs: Vec<Catalog>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    pub id: i64,
    pub title: String,
}

/// Error payload the marketplace returns on failures.
#[derive(Debug, Deserialize)]
pub struct ApiErrorResponse {
    #[serde(default)]
    pub code: Option<String>,
    pub message: String,
}

/// Refresh-grant exchange response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TokenRefreshResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Analysis domain models
// ─────────────────────────────────────────────────────────────────────────────

/// Structured lookup for a market analysis. Doubles as the cache key, so it
/// only carries fields that change the result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketSearchQuery {
    pub search_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_ids: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand_id: Option<i64>,
}

impl MarketSearchQuery {
    pub fn for_text(search_text: impl Into<String>) -> Self {
        Self {
            search_text: search_text.into(),
            catalog_ids: None,
            brand_id: None,
        }
    }
}

/// Price statistics over the fetched sold listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceAnalysis {
    pub min: Decimal,
    pub max: Decimal,
    pub average: Decimal,
    pub median: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisSummary {
    pub items_found: usize,
    pub sellers_count: usize,
}

/// Key performance indicators derived from one analysis run.
///
/// `relative_market_share` and `price_elasticity` stay None until
/// competitor and demand data are wired in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketKpis {
    pub recommended_optimal_price: Decimal,
    pub sell_through_rate: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative_market_share: Option<Decimal>,
    pub competitiveness_score: Decimal,
    pub price_trend_30d: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_elasticity: Option<Decimal>,
}

/// The expensive derived value the cache memoizes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketAnalysis {
    pub analysis_timestamp: DateTime<Utc>,
    pub price_analysis: PriceAnalysis,
    pub summary: AnalysisSummary,
    pub brand_distribution: BTreeMap<String, u32>,
    pub condition_distribution: BTreeMap<String, u32>,
    pub kpis: MarketKpis,
}

/// Persisted analysis-history row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRecord {
    pub id: String,
    pub search_text: String,
    pub analysis_timestamp: DateTime<Utc>,
    pub analysis: MarketAnalysis,
}

/// Insert payload for a new analysis-history row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAnalysisRecord {
    pub search_text: String,
    pub analysis_timestamp: DateTime<Utc>,
    pub analysis: MarketAnalysis,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_catalog_items_payload() {
        let json = r#"{
            "items": [
                {
                    "id": 42,
                    "title": "Hoodie",
                    "price": {"amount": "12.50", "currency_code": "EUR"},
                    "brand_title": "Nike",
                    "status": "Very good",
                    "user": {"login": "seller_a"},
                    "photo": {"url": "ignored"}
                }
            ],
            "pagination": {"total_entries": 1}
        }"#;

        let parsed: CatalogItemsResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.items.len(), 1);
        let item = &parsed.items[0];
        assert_eq!(item.price.amount, "12.50");
        assert_eq!(item.brand_title.as_deref(), Some("Nike"));
        assert_eq!(item.user.login, "seller_a");
    }

    #[test]
    fn parses_brands_payload() {
        let json = r#"{"brands": [{"id": 53, "title": "Nike", "slug": "nike"}]}"#;
        let parsed: BrandsResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.brands, vec![Brand { id: 53, title: "Nike".to_string() }]);
    }

    #[test]
    fn search_query_serializes_without_empty_fields() {
        let query = MarketSearchQuery::for_text("nike hoodie");
        let json = serde_json::to_value(&query).unwrap();
        assert_eq!(json, serde_json::json!({"searchText": "nike hoodie"}));
    }
}
