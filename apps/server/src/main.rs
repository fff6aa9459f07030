//! relist API server.
//!
//! Exposes the marketplace sync engine over HTTP: session management,
//! market analyses, and analysis history.

use std::net::SocketAddr;

use tracing::info;

mod api;
mod error;
mod state;

const DEFAULT_PORT: u16 = 8490;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,relist_server=debug".into()),
        )
        .init();

    let state = state::AppState::build()?;
    let app = api::router(state);

    let port = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    info!("relist server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
