//! Diesel row mapping for marketplace sessions.

use diesel::prelude::*;

use relist_core::session::{SessionRecord, SessionStatus};

use crate::errors::StorageError;
use crate::schema::marketplace_sessions;
use crate::time_format::{format_timestamp, parse_timestamp};

#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = marketplace_sessions)]
#[diesel(treat_none_as_null = true)]
pub struct SessionRecordDb {
    pub user_id: String,
    pub encrypted_credential: String,
    pub status: String,
    pub last_validated_at: Option<String>,
    pub last_refreshed_at: Option<String>,
    pub refresh_error_message: Option<String>,
}

impl From<SessionRecord> for SessionRecordDb {
    fn from(record: SessionRecord) -> Self {
        Self {
            user_id: record.user_id,
            encrypted_credential: record.encrypted_credential,
            status: record.status.as_str().to_string(),
            last_validated_at: record.last_validated_at.map(format_timestamp),
            last_refreshed_at: record.last_refreshed_at.map(format_timestamp),
            refresh_error_message: record.refresh_error_message,
        }
    }
}

impl TryFrom<SessionRecordDb> for SessionRecord {
    type Error = StorageError;

    fn try_from(row: SessionRecordDb) -> Result<Self, StorageError> {
        let status = SessionStatus::from_str(&row.status)
            .ok_or_else(|| StorageError::CorruptRow(format!("Unknown status '{}'", row.status)))?;

        Ok(Self {
            user_id: row.user_id,
            encrypted_credential: row.encrypted_credential,
            status,
            last_validated_at: row
                .last_validated_at
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
            last_refreshed_at: row
                .last_refreshed_at
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
            refresh_error_message: row.refresh_error_message,
        })
    }
}
