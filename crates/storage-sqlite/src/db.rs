//! Connection pool and single-writer handle.

use std::sync::Arc;

use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use log::debug;

use crate::errors::StorageError;

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;
pub type DbConnection = PooledConnection<ConnectionManager<SqliteConnection>>;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Create the pool against a database file and run pending migrations.
pub fn create_pool(database_url: &str) -> Result<Arc<DbPool>, StorageError> {
    let manager = ConnectionManager::<SqliteConnection>::new(database_url);
    let pool = Pool::builder()
        .build(manager)
        .map_err(|e| StorageError::Pool(e.to_string()))?;

    run_migrations(&pool)?;
    Ok(Arc::new(pool))
}

/// Single-connection in-memory database, for tests and tooling: with more
/// than one pooled connection every checkout would get its own independent
/// `:memory:` database.
pub fn create_in_memory_pool() -> Result<Arc<DbPool>, StorageError> {
    let manager = ConnectionManager::<SqliteConnection>::new(":memory:");
    let pool = Pool::builder()
        .max_size(1)
        .build(manager)
        .map_err(|e| StorageError::Pool(e.to_string()))?;

    run_migrations(&pool)?;
    Ok(Arc::new(pool))
}

fn run_migrations(pool: &DbPool) -> Result<(), StorageError> {
    let mut conn = pool.get().map_err(|e| StorageError::Pool(e.to_string()))?;
    let applied = conn
        .run_pending_migrations(MIGRATIONS)
        .map_err(|e| StorageError::Migration(e.to_string()))?;
    debug!("Applied {} pending migrations", applied.len());
    Ok(())
}

pub fn get_connection(pool: &DbPool) -> Result<DbConnection, StorageError> {
    pool.get().map_err(|e| StorageError::Pool(e.to_string()))
}

/// Serializes writes through one connection at a time; SQLite allows a
/// single writer.
#[derive(Clone)]
pub struct WriteHandle {
    pool: Arc<DbPool>,
    write_lock: Arc<tokio::sync::Mutex<()>>,
}

impl WriteHandle {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self {
            pool,
            write_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Run a write closure on a pooled connection, off the async executor.
    pub async fn exec<R, F>(&self, operation: F) -> Result<R, StorageError>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<R, StorageError> + Send + 'static,
        R: Send + 'static,
    {
        let _guard = self.write_lock.lock().await;
        let pool = Arc::clone(&self.pool);
        tokio::task::spawn_blocking(move || {
            let mut conn = get_connection(&pool)?;
            operation(&mut conn)
        })
        .await
        .map_err(|e| StorageError::Pool(format!("Write task failed: {}", e)))?
    }
}
