use std::sync::Arc;

use async_trait::async_trait;
use diesel::prelude::*;
use diesel::SqliteConnection;

use relist_core::session::{SessionRecord, SessionRepositoryTrait};
use relist_core::Result;

use super::model::SessionRecordDb;
use crate::db::{get_connection, DbPool, WriteHandle};
use crate::errors::StorageError;
use crate::schema::marketplace_sessions;
use crate::schema::marketplace_sessions::dsl::*;

pub struct SessionRepository {
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl SessionRepository {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        SessionRepository { pool, writer }
    }

    fn find_impl(&self, user: &str) -> std::result::Result<Option<SessionRecord>, StorageError> {
        let mut conn = get_connection(&self.pool)?;
        let row = marketplace_sessions
            .filter(user_id.eq(user))
            .first::<SessionRecordDb>(&mut conn)
            .optional()?;
        row.map(SessionRecord::try_from).transpose()
    }
}

#[async_trait]
impl SessionRepositoryTrait for SessionRepository {
    async fn find(&self, user: &str) -> Result<Option<SessionRecord>> {
        Ok(self.find_impl(user)?)
    }

    async fn upsert(&self, record: SessionRecord) -> Result<SessionRecord> {
        let row = SessionRecordDb::from(record);
        let stored = self
            .writer
            .exec(move |conn: &mut SqliteConnection| {
                diesel::insert_into(marketplace_sessions::table)
                    .values(&row)
                    .on_conflict(user_id)
                    .do_update()
                    .set(&row)
                    .returning(SessionRecordDb::as_returning())
                    .get_result::<SessionRecordDb>(conn)
                    .map_err(StorageError::from)
            })
            .await?;

        Ok(SessionRecord::try_from(stored)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_in_memory_pool;
    use chrono::Utc;
    use relist_core::session::SessionStatus;

    fn repository() -> SessionRepository {
        let pool = create_in_memory_pool().unwrap();
        let writer = WriteHandle::new(Arc::clone(&pool));
        SessionRepository::new(pool, writer)
    }

    fn record(user: &str) -> SessionRecord {
        SessionRecord {
            user_id: user.to_string(),
            encrypted_credential: "ciphertext-v1".to_string(),
            status: SessionStatus::Active,
            last_validated_at: None,
            last_refreshed_at: None,
            refresh_error_message: None,
        }
    }

    #[tokio::test]
    async fn find_returns_none_for_unknown_user() {
        let repository = repository();
        assert!(repository.find("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_creates_then_updates_in_place() {
        let repository = repository();

        let created = repository.upsert(record("user-1")).await.unwrap();
        assert_eq!(created.status, SessionStatus::Active);

        let mut update = record("user-1");
        update.encrypted_credential = "ciphertext-v2".to_string();
        update.status = SessionStatus::RefreshError;
        update.refresh_error_message = Some("refresh grant rejected".to_string());
        update.last_validated_at = Some(Utc::now());
        repository.upsert(update).await.unwrap();

        let found = repository.find("user-1").await.unwrap().unwrap();
        assert_eq!(found.encrypted_credential, "ciphertext-v2");
        assert_eq!(found.status, SessionStatus::RefreshError);
        assert!(found.last_validated_at.is_some());
    }

    #[tokio::test]
    async fn upsert_clears_error_message_with_null() {
        let repository = repository();

        let mut failed = record("user-1");
        failed.status = SessionStatus::RefreshError;
        failed.refresh_error_message = Some("boom".to_string());
        repository.upsert(failed).await.unwrap();

        // Back to active: the NULL must actually overwrite the old message.
        repository.upsert(record("user-1")).await.unwrap();

        let found = repository.find("user-1").await.unwrap().unwrap();
        assert_eq!(found.status, SessionStatus::Active);
        assert_eq!(found.refresh_error_message, None);
    }

    #[tokio::test]
    async fn records_are_keyed_per_user() {
        let repository = repository();
        repository.upsert(record("user-1")).await.unwrap();
        repository.upsert(record("user-2")).await.unwrap();

        assert!(repository.find("user-1").await.unwrap().is_some());
        assert!(repository.find("user-2").await.unwrap().is_some());
        assert!(repository.find("user-3").await.unwrap().is_none());
    }
}
