//! Postgres-backed rank store
//!
//! Guarded transitions are single `UPDATE ... WHERE` statements, so the row
//! itself is the lock: two requests racing to claim the same category both
//! issue the update, and only one of them sees `rows_affected == 1`.

use crate::db::models::*;
use crate::db::store::{CategoryRecord, RankState, RankStore, RankedEntry};
use crate::db::DbPool;
use crate::errors::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{
    ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, TransactionTrait,
};
use std::collections::HashSet;
use tracing::{debug, info};
use uuid::Uuid;

/// Rows per INSERT when reseeding; keeps statements well under the bind limit
const RESEED_BATCH: usize = 1000;

/// Store for category records
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    /// Create a new store with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get the read connection
    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    /// Get the write connection.
    ///
    /// State reads go through here too: a lagging replica could report a
    /// stale state right after a transition.
    fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }
}

#[async_trait]
impl RankStore for PgStore {
    async fn get(&self, title: &str) -> Result<Option<CategoryRecord>> {
        CategoryEntity::find_by_id(title.to_string())
            .one(self.write_conn())
            .await?
            .map(CategoryRecord::try_from)
            .transpose()
    }

    async fn try_claim(&self, title: &str, task_id: Uuid, started_at: DateTime<Utc>) -> Result<bool> {
        let started: DateTimeWithTimeZone = started_at.into();

        let result = CategoryEntity::update_many()
            .set(CategoryActiveModel {
                state: Set(RankState::Computing.into()),
                task_id: Set(Some(task_id)),
                error_message: Set(None),
                started_at: Set(Some(started)),
                completed_at: Set(None),
                updated_at: Set(started),
                ..Default::default()
            })
            .filter(CategoryColumn::Title.eq(title))
            .filter(CategoryColumn::State.is_in([
                String::from(RankState::Unseeded),
                String::from(RankState::Failed),
            ]))
            .exec(self.write_conn())
            .await?;

        debug!(category = %title, %task_id, claimed = result.rows_affected == 1, "Claim attempted");
        Ok(result.rows_affected == 1)
    }

    async fn complete(&self, title: &str, task_id: Uuid, result: &[RankedEntry]) -> Result<bool> {
        let now: DateTimeWithTimeZone = Utc::now().into();
        let json = serde_json::to_value(result)?;

        let update = CategoryEntity::update_many()
            .set(CategoryActiveModel {
                state: Set(RankState::Ready.into()),
                result: Set(Some(json)),
                error_message: Set(None),
                completed_at: Set(Some(now)),
                updated_at: Set(now),
                ..Default::default()
            })
            .filter(CategoryColumn::Title.eq(title))
            .filter(CategoryColumn::State.eq(String::from(RankState::Computing)))
            .filter(CategoryColumn::TaskId.eq(task_id))
            .exec(self.write_conn())
            .await?;

        Ok(update.rows_affected == 1)
    }

    async fn fail(&self, title: &str, task_id: Uuid, error: &str) -> Result<bool> {
        let now: DateTimeWithTimeZone = Utc::now().into();

        let update = CategoryEntity::update_many()
            .set(CategoryActiveModel {
                state: Set(RankState::Failed.into()),
                error_message: Set(Some(error.to_string())),
                completed_at: Set(Some(now)),
                updated_at: Set(now),
                ..Default::default()
            })
            .filter(CategoryColumn::Title.eq(title))
            .filter(CategoryColumn::State.eq(String::from(RankState::Computing)))
            .filter(CategoryColumn::TaskId.eq(task_id))
            .exec(self.write_conn())
            .await?;

        Ok(update.rows_affected == 1)
    }

    async fn recover_computing(&self) -> Result<u64> {
        let now: DateTimeWithTimeZone = Utc::now().into();

        let update = CategoryEntity::update_many()
            .set(CategoryActiveModel {
                state: Set(RankState::Unseeded.into()),
                task_id: Set(None),
                started_at: Set(None),
                updated_at: Set(now),
                ..Default::default()
            })
            .filter(CategoryColumn::State.eq(String::from(RankState::Computing)))
            .exec(self.write_conn())
            .await?;

        Ok(update.rows_affected)
    }

    async fn list_titles(&self) -> Result<Vec<String>> {
        CategoryEntity::find()
            .select_only()
            .column(CategoryColumn::Title)
            .order_by_asc(CategoryColumn::Title)
            .into_tuple::<String>()
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn reseed(&self, titles: &[String]) -> Result<u64> {
        let now: DateTimeWithTimeZone = Utc::now().into();

        let mut seen = HashSet::new();
        let unique: Vec<&str> = titles
            .iter()
            .map(String::as_str)
            .filter(|title| seen.insert(*title))
            .collect();

        let txn = self.write_conn().begin().await?;

        let removed = CategoryEntity::delete_many().exec(&txn).await?;

        for batch in unique.chunks(RESEED_BATCH) {
            let models = batch.iter().map(|title| CategoryActiveModel {
                title: Set(title.to_string()),
                state: Set(RankState::Unseeded.into()),
                result: Set(None),
                error_message: Set(None),
                task_id: Set(None),
                started_at: Set(None),
                completed_at: Set(None),
                updated_at: Set(now),
            });
            CategoryEntity::insert_many(models).exec(&txn).await?;
        }

        txn.commit().await?;

        info!(
            removed = removed.rows_affected,
            seeded = unique.len(),
            "Category registry reseeded"
        );
        Ok(unique.len() as u64)
    }

    async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }
}
