//! Marketplace endpoints: session lifecycle and market analyses.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use relist_core::session::{
    Credential, RefreshSessionResult, SessionRepositoryTrait, SessionStatus,
};
use relist_marketplace::analysis::{AnalysisHistoryRepositoryTrait, PRICE_TREND_WINDOW};
use relist_marketplace::{AnalysisRecord, MarketAnalysis, MarketSearchQuery};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

// ─────────────────────────────────────────────────────────────────────────────
// Request/Response Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSessionRequest {
    pub user_id: String,
    pub access_token: String,
    pub refresh_token: String,
    /// Marketplace-specific sub-tokens to carry alongside the known pair.
    #[serde(default)]
    pub extra_tokens: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshSessionRequest {
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusQuery {
    pub user_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusResponse {
    pub is_configured: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SessionStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_validated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_refreshed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    pub user_id: String,
    pub search_text: String,
    #[serde(default)]
    pub catalog_ids: Option<String>,
    #[serde(default)]
    pub brand_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeBatchRequest {
    pub user_id: String,
    pub searches: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeBatchResponse {
    /// Index-aligned with the request's `searches`.
    pub analyses: Vec<Option<MarketAnalysis>>,
    pub errors: Vec<Option<String>>,
    pub aborted: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysesQuery {
    pub search_text: String,
    pub limit: Option<i64>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Session Management
// ─────────────────────────────────────────────────────────────────────────────

async fn store_session(
    State(state): State<Arc<AppState>>,
    Json(body): Json<StoreSessionRequest>,
) -> ApiResult<Json<SessionStatusResponse>> {
    info!("[Marketplace] Storing session for {}", body.user_id);

    if body.access_token.is_empty() || body.refresh_token.is_empty() {
        return Err(ApiError::BadRequest(
            "accessToken and refreshToken must not be empty".to_string(),
        ));
    }

    let mut credential = Credential::new(body.access_token, body.refresh_token);
    for (key, value) in body.extra_tokens {
        credential.insert(key, value);
    }

    let record = state
        .session_service
        .save_credential(&body.user_id, &credential)
        .await?;

    Ok(Json(SessionStatusResponse {
        is_configured: true,
        status: Some(record.status),
        last_validated_at: record.last_validated_at,
        last_refreshed_at: record.last_refreshed_at,
        refresh_error_message: record.refresh_error_message,
    }))
}

async fn get_session_status(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SessionStatusQuery>,
) -> ApiResult<Json<SessionStatusResponse>> {
    debug!("[Marketplace] Session status for {}", query.user_id);

    let record = state.session_repository.find(&query.user_id).await?;

    Ok(Json(match record {
        Some(record) => SessionStatusResponse {
            is_configured: true,
            status: Some(record.status),
            last_validated_at: record.last_validated_at,
            last_refreshed_at: record.last_refreshed_at,
            refresh_error_message: record.refresh_error_message,
        },
        None => SessionStatusResponse {
            is_configured: false,
            status: None,
            last_validated_at: None,
            last_refreshed_at: None,
            refresh_error_message: None,
        },
    }))
}

async fn refresh_session(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RefreshSessionRequest>,
) -> ApiResult<Json<RefreshSessionResult>> {
    info!("[Marketplace] Refreshing session for {}", body.user_id);

    let result = state.session_service.refresh_session(&body.user_id).await;
    if !result.success {
        debug!(
            "[Marketplace] Refresh failed for {}: {:?}",
            body.user_id, result.error
        );
    }

    Ok(Json(result))
}

// ─────────────────────────────────────────────────────────────────────────────
// Market Analyses
// ─────────────────────────────────────────────────────────────────────────────

async fn analyze_market(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AnalyzeRequest>,
) -> ApiResult<Json<MarketAnalysis>> {
    info!(
        "[Marketplace] Market analysis for '{}' (user {})",
        body.search_text, body.user_id
    );

    if body.search_text.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "searchText must not be empty".to_string(),
        ));
    }

    let query = MarketSearchQuery {
        search_text: body.search_text,
        catalog_ids: body.catalog_ids,
        brand_id: body.brand_id,
    };

    let analysis = state
        .sync_service
        .analyze_market(&body.user_id, &query)
        .await?;

    Ok(Json(analysis))
}

/// Analyze several searches in one call, under the marketplace's
/// concurrency and pacing limits. Failures are reported per search.
async fn analyze_market_batch(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AnalyzeBatchRequest>,
) -> ApiResult<Json<AnalyzeBatchResponse>> {
    info!(
        "[Marketplace] Batch market analysis of {} searches (user {})",
        body.searches.len(),
        body.user_id
    );

    if body.searches.is_empty() {
        return Err(ApiError::BadRequest("searches must not be empty".to_string()));
    }

    let queries = body
        .searches
        .into_iter()
        .map(MarketSearchQuery::for_text)
        .collect();

    let outcome = Arc::clone(&state.sync_service)
        .analyze_many(&body.user_id, queries)
        .await;

    Ok(Json(AnalyzeBatchResponse {
        analyses: outcome.results,
        errors: outcome
            .errors
            .into_iter()
            .map(|error| error.map(|e| e.to_string()))
            .collect(),
        aborted: outcome.aborted,
    }))
}

async fn list_analyses(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AnalysesQuery>,
) -> ApiResult<Json<Vec<AnalysisRecord>>> {
    let limit = query.limit.unwrap_or(PRICE_TREND_WINDOW);
    debug!(
        "[Marketplace] Listing analyses for '{}' (limit {})",
        query.search_text, limit
    );

    let records = state
        .analysis_repository
        .recent_for_search(&query.search_text, limit)
        .await?;

    Ok(Json(records))
}

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        // Session lifecycle
        .route("/marketplace/session", post(store_session))
        .route("/marketplace/session/status", get(get_session_status))
        .route("/marketplace/session/refresh", post(refresh_session))
        // Analyses
        .route("/marketplace/analyze", post(analyze_market))
        .route("/marketplace/analyze/batch", post(analyze_market_batch))
        .route("/marketplace/analyses", get(list_analyses))
}
