//! Timestamp encoding shared by the row mappings.
//!
//! RFC3339 text in UTC with fixed millisecond precision, so lexicographic
//! and chronological order coincide and `ORDER BY` on the text column is
//! correct.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::errors::StorageError;

pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StorageError::CorruptRow(format!("Bad timestamp '{}': {}", raw, e)))
}
