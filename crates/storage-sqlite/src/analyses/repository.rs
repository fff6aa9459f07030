use std::sync::Arc;

use async_trait::async_trait;
use diesel::prelude::*;
use diesel::SqliteConnection;

use relist_marketplace::analysis::AnalysisHistoryRepositoryTrait;
use relist_marketplace::{AnalysisRecord, NewAnalysisRecord, Result};

use super::model::AnalysisRecordDb;
use crate::db::{get_connection, DbPool, WriteHandle};
use crate::errors::StorageError;
use crate::schema::market_analyses;
use crate::schema::market_analyses::dsl::*;

pub struct AnalysisRepository {
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl AnalysisRepository {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        AnalysisRepository { pool, writer }
    }

    fn recent_impl(
        &self,
        search: &str,
        limit: i64,
    ) -> std::result::Result<Vec<AnalysisRecord>, StorageError> {
        let mut conn = get_connection(&self.pool)?;
        let rows = market_analyses
            .filter(search_text.eq(search))
            .order(analysis_timestamp.desc())
            .limit(limit)
            .load::<AnalysisRecordDb>(&mut conn)?;
        rows.into_iter().map(AnalysisRecord::try_from).collect()
    }
}

#[async_trait]
impl AnalysisHistoryRepositoryTrait for AnalysisRepository {
    async fn insert(&self, record: NewAnalysisRecord) -> Result<AnalysisRecord> {
        let row = AnalysisRecordDb::from_new(&record)?;
        let stored = self
            .writer
            .exec(move |conn: &mut SqliteConnection| {
                diesel::insert_into(market_analyses::table)
                    .values(&row)
                    .returning(AnalysisRecordDb::as_returning())
                    .get_result::<AnalysisRecordDb>(conn)
                    .map_err(StorageError::from)
            })
            .await?;

        Ok(AnalysisRecord::try_from(stored)?)
    }

    async fn recent_for_search(&self, search: &str, limit: i64) -> Result<Vec<AnalysisRecord>> {
        Ok(self.recent_impl(search, limit)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_in_memory_pool;
    use chrono::{Duration, Utc};
    use relist_marketplace::analysis::empty_analysis;
    use rust_decimal::Decimal;

    fn repository() -> AnalysisRepository {
        let pool = create_in_memory_pool().unwrap();
        let writer = WriteHandle::new(Arc::clone(&pool));
        AnalysisRepository::new(pool, writer)
    }

    fn new_record(search: &str, average: i64, ago_minutes: i64) -> NewAnalysisRecord {
        let timestamp = Utc::now() - Duration::minutes(ago_minutes);
        let mut analysis = empty_analysis(timestamp);
        analysis.price_analysis.average = Decimal::from(average);
        NewAnalysisRecord {
            search_text: search.to_string(),
            analysis_timestamp: timestamp,
            analysis,
        }
    }

    #[tokio::test]
    async fn insert_assigns_an_id_and_round_trips_the_payload() {
        let repository = repository();

        let stored = repository
            .insert(new_record("nike hoodie", 25, 0))
            .await
            .unwrap();
        assert!(!stored.id.is_empty());
        assert_eq!(stored.analysis.price_analysis.average, Decimal::from(25));
    }

    #[tokio::test]
    async fn recent_is_filtered_by_search_and_newest_first() {
        let repository = repository();
        repository
            .insert(new_record("nike hoodie", 10, 30))
            .await
            .unwrap();
        repository
            .insert(new_record("nike hoodie", 20, 10))
            .await
            .unwrap();
        repository
            .insert(new_record("adidas sneakers", 99, 5))
            .await
            .unwrap();

        let recent = repository
            .recent_for_search("nike hoodie", 30)
            .await
            .unwrap();

        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].analysis.price_analysis.average, Decimal::from(20));
        assert_eq!(recent[1].analysis.price_analysis.average, Decimal::from(10));
    }

    #[tokio::test]
    async fn recent_respects_the_limit() {
        let repository = repository();
        for i in 0..5 {
            repository
                .insert(new_record("nike hoodie", i, 60 - i))
                .await
                .unwrap();
        }

        let recent = repository
            .recent_for_search("nike hoodie", 2)
            .await
            .unwrap();
        assert_eq!(recent.len(), 2);
    }
}
