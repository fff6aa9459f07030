//! Marketplace integration for relist.
//!
//! Wraps the external marketplace's REST API (catalog search, brand and
//! category lookup, token validity and refresh), computes market analyses
//! from sold-item data, and orchestrates bulk pulls through the core's
//! rate-limited runner.

pub mod analysis;
pub mod client;
pub mod errors;
pub mod models;
pub mod sync;

pub use client::{MarketplaceClient, DEFAULT_BASE_URL};
pub use errors::{ApiRetryClass, MarketplaceError, Result};
pub use models::*;
pub use sync::{MarketSyncService, MarketplaceDataSource, SyncLimits};
