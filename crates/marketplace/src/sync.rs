//! Marketplace sync orchestration.
//!
//! Glues the engine together for callers: a valid credential from the
//! session service, catalog fetches through the rate-limited runner, and
//! analysis results memoized in the TTL cache and appended to history.

use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};

use relist_core::cache::TtlCache;
use relist_core::clock::Clock;
use relist_core::runner::{self, RunOptions, Task, TaskBatchOutcome, TaskError};
use relist_core::session::SessionService;

use crate::analysis::{compute_analysis, AnalysisHistoryRepositoryTrait, PRICE_TREND_WINDOW};
use crate::errors::{ApiRetryClass, MarketplaceError, Result};
use crate::models::{MarketAnalysis, MarketSearchQuery, NewAnalysisRecord, SoldItem};

/// Seam over the catalog endpoint so tests can stub the remote side.
#[async_trait::async_trait]
pub trait MarketplaceDataSource: Send + Sync {
    async fn search_sold_items(
        &self,
        access_token: &str,
        query: &MarketSearchQuery,
    ) -> Result<Vec<SoldItem>>;
}

#[async_trait::async_trait]
impl MarketplaceDataSource for crate::client::MarketplaceClient {
    async fn search_sold_items(
        &self,
        access_token: &str,
        query: &MarketSearchQuery,
    ) -> Result<Vec<SoldItem>> {
        Self::search_sold_items(self, access_token, query).await
    }
}

/// Fan-out limits for bulk pulls against the marketplace.
///
/// Two independent caps: in-flight requests, and spacing between request
/// starts (the marketplace throttles by request rate, not just
/// concurrency).
#[derive(Debug, Clone)]
pub struct SyncLimits {
    pub max_concurrent: usize,
    pub delay_between_starts: Duration,
}

impl Default for SyncLimits {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            delay_between_starts: Duration::from_millis(750),
        }
    }
}

/// Orchestrates market analyses for one deployment.
pub struct MarketSyncService {
    session_service: Arc<SessionService>,
    source: Arc<dyn MarketplaceDataSource>,
    history: Arc<dyn AnalysisHistoryRepositoryTrait>,
    cache: TtlCache<MarketAnalysis>,
    clock: Arc<dyn Clock>,
    limits: SyncLimits,
}

impl MarketSyncService {
    pub fn new(
        session_service: Arc<SessionService>,
        source: Arc<dyn MarketplaceDataSource>,
        history: Arc<dyn AnalysisHistoryRepositoryTrait>,
        clock: Arc<dyn Clock>,
        limits: SyncLimits,
    ) -> Self {
        let cache = TtlCache::new(Arc::clone(&clock));
        Self {
            session_service,
            source,
            history,
            cache,
            clock,
            limits,
        }
    }

    /// Analyze the sold market for one search query.
    ///
    /// Served from the cache when a fresh analysis exists; otherwise fetches
    /// sold listings with the user's credential, computes the analysis
    /// against persisted history, appends it to history and fills the
    /// cache.
    pub async fn analyze_market(
        &self,
        user_id: &str,
        query: &MarketSearchQuery,
    ) -> Result<MarketAnalysis> {
        if let Some(cached) = self.cache.get(query) {
            info!("Serving cached market analysis for '{}'", query.search_text);
            return Ok(cached);
        }

        let credential = self
            .session_service
            .get_credential(user_id)
            .await
            .ok_or_else(|| {
                MarketplaceError::authentication_required(
                    "No usable marketplace session. Reconnect the marketplace account.",
                )
            })?;
        let access_token = credential.access_token().ok_or_else(|| {
            MarketplaceError::authentication_required("Stored credential has no access token")
        })?;

        let items = self.source.search_sold_items(access_token, query).await?;
        info!(
            "Fetched {} sold listings for '{}'",
            items.len(),
            query.search_text
        );

        let history = match self
            .history
            .recent_for_search(&query.search_text, PRICE_TREND_WINDOW)
            .await
        {
            Ok(history) => history,
            Err(e) => {
                warn!("Analysis history unavailable, trend KPI degrades: {}", e);
                Vec::new()
            }
        };

        let analysis = compute_analysis(&items, &history, self.clock.now());

        if let Err(e) = self
            .history
            .insert(NewAnalysisRecord {
                search_text: query.search_text.clone(),
                analysis_timestamp: analysis.analysis_timestamp,
                analysis: analysis.clone(),
            })
            .await
        {
            error!("Failed to persist analysis history: {}", e);
        }

        self.cache.set(query, analysis.clone());
        Ok(analysis)
    }

    /// Analyze many queries under the marketplace's rate limits.
    ///
    /// Failures stay per-query; an authentication failure raises the
    /// cancellation sentinel so the remaining queries stop instead of
    /// hammering the marketplace with a dead token.
    pub async fn analyze_many(
        self: Arc<Self>,
        user_id: &str,
        queries: Vec<MarketSearchQuery>,
    ) -> TaskBatchOutcome<MarketAnalysis> {
        let tasks: Vec<Task<MarketAnalysis>> = queries
            .into_iter()
            .map(|query| {
                let service = Arc::clone(&self);
                let user_id = user_id.to_string();
                let task: Task<MarketAnalysis> = Box::pin(async move {
                    service
                        .analyze_market(&user_id, &query)
                        .await
                        .map_err(|e| match e.retry_class() {
                            ApiRetryClass::ReauthRequired => TaskError::cancelled(e.to_string()),
                            _ => TaskError::failed(e.to_string()),
                        })
                });
                task
            })
            .collect();

        runner::run(
            tasks,
            RunOptions {
                max_concurrent: self.limits.max_concurrent,
                delay_between_starts: self.limits.delay_between_starts,
                continue_on_error: true,
                ..RunOptions::default()
            },
        )
        .await
    }

    /// Drop all memoized analyses (e.g. after a bulk import).
    pub fn invalidate_cache(&self) {
        self.cache.clear();
    }
}
