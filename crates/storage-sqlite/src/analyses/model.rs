//! Diesel row mapping for analysis-history rows.
//!
//! The analysis payload is stored as a JSON blob: the dashboard reads it
//! whole and the schema stays stable while the KPI set evolves.

use diesel::prelude::*;
use uuid::Uuid;

use relist_marketplace::{AnalysisRecord, NewAnalysisRecord};

use crate::errors::StorageError;
use crate::schema::market_analyses;
use crate::time_format::{format_timestamp, parse_timestamp};

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = market_analyses)]
pub struct AnalysisRecordDb {
    pub id: String,
    pub search_text: String,
    pub analysis_timestamp: String,
    pub analysis_data: String,
}

impl AnalysisRecordDb {
    pub fn from_new(record: &NewAnalysisRecord) -> Result<Self, StorageError> {
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            search_text: record.search_text.clone(),
            analysis_timestamp: format_timestamp(record.analysis_timestamp),
            analysis_data: serde_json::to_string(&record.analysis)?,
        })
    }
}

impl TryFrom<AnalysisRecordDb> for AnalysisRecord {
    type Error = StorageError;

    fn try_from(row: AnalysisRecordDb) -> Result<Self, StorageError> {
        Ok(Self {
            id: row.id,
            search_text: row.search_text,
            analysis_timestamp: parse_timestamp(&row.analysis_timestamp)?,
            analysis: serde_json::from_str(&row.analysis_data)?,
        })
    }
}
