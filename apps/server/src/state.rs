//! Explicitly constructed service graph.
//!
//! Every service is built once at startup with its collaborators passed in;
//! there are no process-global singletons.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::info;

use relist_core::clock::{Clock, SystemClock};
use relist_core::secrets::SecretCipher;
use relist_core::session::{MarketplaceAuth, SessionRepositoryTrait, SessionService};
use relist_marketplace::analysis::AnalysisHistoryRepositoryTrait;
use relist_marketplace::{MarketSyncService, MarketplaceClient, MarketplaceDataSource, SyncLimits};
use relist_storage_sqlite::{create_pool, AnalysisRepository, SessionRepository, WriteHandle};

const DEFAULT_DATABASE_URL: &str = "relist.db";

pub struct AppState {
    pub session_service: Arc<SessionService>,
    pub session_repository: Arc<SessionRepository>,
    pub sync_service: Arc<MarketSyncService>,
    pub analysis_repository: Arc<AnalysisRepository>,
}

fn database_url() -> String {
    std::env::var("RELIST_DATABASE_URL")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string())
}

fn marketplace_base_url() -> String {
    std::env::var("MARKETPLACE_API_URL")
        .ok()
        .map(|v| v.trim().trim_end_matches('/').to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| relist_marketplace::DEFAULT_BASE_URL.to_string())
}

/// Derive the 32-byte credential master key from RELIST_SECRET_KEY.
fn master_key() -> Result<[u8; 32], String> {
    let secret = std::env::var("RELIST_SECRET_KEY")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| "RELIST_SECRET_KEY is not configured".to_string())?;

    let digest = Sha256::digest(secret.as_bytes());
    let mut key = [0u8; 32];
    key.copy_from_slice(&digest);
    Ok(key)
}

impl AppState {
    pub fn build() -> Result<Arc<Self>, Box<dyn std::error::Error>> {
        let database_url = database_url();
        info!("Opening database at {}", database_url);
        let pool = create_pool(&database_url)?;
        let writer = WriteHandle::new(Arc::clone(&pool));

        let session_repository = Arc::new(SessionRepository::new(
            Arc::clone(&pool),
            writer.clone(),
        ));
        let analysis_repository = Arc::new(AnalysisRepository::new(Arc::clone(&pool), writer));

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let cipher = Arc::new(SecretCipher::new(master_key()?));
        let client = Arc::new(MarketplaceClient::new(&marketplace_base_url()));

        let session_service = Arc::new(SessionService::new(
            Arc::clone(&session_repository) as Arc<dyn SessionRepositoryTrait>,
            cipher,
            Arc::clone(&client) as Arc<dyn MarketplaceAuth>,
            Arc::clone(&clock),
        ));

        let sync_service = Arc::new(MarketSyncService::new(
            Arc::clone(&session_service),
            client as Arc<dyn MarketplaceDataSource>,
            Arc::clone(&analysis_repository) as Arc<dyn AnalysisHistoryRepositoryTrait>,
            clock,
            SyncLimits::default(),
        ));

        Ok(Arc::new(Self {
            session_service,
            session_repository,
            sync_service,
            analysis_repository,
        }))
    }
}
