//! HTTP surface.

mod marketplace;

use std::sync::Arc;

use axum::routing::get;
use axum::{Json, Router};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .merge(marketplace::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "message": "relist market analysis API is running"
    }))
}
