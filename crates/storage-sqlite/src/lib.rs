//! SQLite persistence for the relist sync engine.
//!
//! Implements the core's session record store and the marketplace's
//! analysis-history store on diesel + r2d2, with writes serialized through
//! a single-writer handle (SQLite allows one writer at a time).

pub mod analyses;
pub mod db;
pub mod errors;
pub mod schema;
pub mod sessions;
mod time_format;

pub use analyses::AnalysisRepository;
pub use db::{create_in_memory_pool, create_pool, DbPool, WriteHandle};
pub use errors::StorageError;
pub use sessions::SessionRepository;
