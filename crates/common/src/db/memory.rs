//! In-process rank store
//!
//! Backs tests and local runs without Postgres. Every guarded transition runs
//! under the map's write lock, which gives the same check-and-set guarantee
//! as the conditional `UPDATE` in [`PgStore`](super::PgStore).

use crate::db::store::{CategoryRecord, RankState, RankStore, RankedEntry};
use crate::errors::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, CategoryRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with `Unseeded` records
    pub fn with_categories<I, S>(titles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let records = titles
            .into_iter()
            .map(|title| {
                let record = CategoryRecord::unseeded(title);
                (record.title.clone(), record)
            })
            .collect();

        Self {
            records: RwLock::new(records),
        }
    }

    /// Insert or replace a record as-is
    pub async fn insert(&self, record: CategoryRecord) {
        self.records.write().await.insert(record.title.clone(), record);
    }
}

#[async_trait]
impl RankStore for MemoryStore {
    async fn get(&self, title: &str) -> Result<Option<CategoryRecord>> {
        Ok(self.records.read().await.get(title).cloned())
    }

    async fn try_claim(&self, title: &str, task_id: Uuid, started_at: DateTime<Utc>) -> Result<bool> {
        let mut records = self.records.write().await;
        match records.get_mut(title) {
            Some(record) if record.state.is_claimable() => {
                record.state = RankState::Computing;
                record.task_id = Some(task_id);
                record.error = None;
                record.started_at = Some(started_at);
                record.completed_at = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete(&self, title: &str, task_id: Uuid, result: &[RankedEntry]) -> Result<bool> {
        let mut records = self.records.write().await;
        match records.get_mut(title) {
            Some(record) if record.state == RankState::Computing && record.task_id == Some(task_id) => {
                record.state = RankState::Ready;
                record.result = result.to_vec();
                record.error = None;
                record.completed_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn fail(&self, title: &str, task_id: Uuid, error: &str) -> Result<bool> {
        let mut records = self.records.write().await;
        match records.get_mut(title) {
            Some(record) if record.state == RankState::Computing && record.task_id == Some(task_id) => {
                record.state = RankState::Failed;
                record.error = Some(error.to_string());
                record.completed_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn recover_computing(&self) -> Result<u64> {
        let mut records = self.records.write().await;
        let mut reset = 0;
        for record in records.values_mut() {
            if record.state == RankState::Computing {
                record.state = RankState::Unseeded;
                record.task_id = None;
                record.started_at = None;
                reset += 1;
            }
        }
        Ok(reset)
    }

    async fn list_titles(&self) -> Result<Vec<String>> {
        let mut titles: Vec<String> = self.records.read().await.keys().cloned().collect();
        titles.sort();
        Ok(titles)
    }

    async fn reseed(&self, titles: &[String]) -> Result<u64> {
        let mut records = self.records.write().await;
        records.clear();
        for title in titles {
            records
                .entry(title.clone())
                .or_insert_with(|| CategoryRecord::unseeded(title.clone()));
        }
        Ok(records.len() as u64)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    fn entry(title: &str, rank: f64) -> RankedEntry {
        RankedEntry {
            title: title.to_string(),
            rank,
            image: None,
        }
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let store = MemoryStore::with_categories(["Физика"]);

        assert!(store.try_claim("Физика", Uuid::new_v4(), Utc::now()).await.unwrap());
        assert!(!store.try_claim("Физика", Uuid::new_v4(), Utc::now()).await.unwrap());

        let record = store.get("Физика").await.unwrap().unwrap();
        assert_eq!(record.state, RankState::Computing);
    }

    #[tokio::test]
    async fn test_claim_unknown_category() {
        let store = MemoryStore::new();
        assert!(!store.try_claim("Нет", Uuid::new_v4(), Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn test_complete_requires_owning_task() {
        let store = MemoryStore::with_categories(["Химия"]);
        let owner = Uuid::new_v4();
        store.try_claim("Химия", owner, Utc::now()).await.unwrap();

        let stranger = Uuid::new_v4();
        assert!(!store.complete("Химия", stranger, &[entry("Атом", 100.0)]).await.unwrap());
        assert!(store.complete("Химия", owner, &[entry("Атом", 100.0)]).await.unwrap());

        let record = store.get("Химия").await.unwrap().unwrap();
        assert_eq!(record.state, RankState::Ready);
        assert_eq!(record.result, vec![entry("Атом", 100.0)]);

        // Ready is terminal for claims
        assert!(!store.try_claim("Химия", Uuid::new_v4(), Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_is_reclaimable() {
        let store = MemoryStore::with_categories(["Биология"]);
        let first = Uuid::new_v4();
        store.try_claim("Биология", first, Utc::now()).await.unwrap();
        assert!(store.fail("Биология", first, "timeout").await.unwrap());

        let record = store.get("Биология").await.unwrap().unwrap();
        assert_eq!(record.state, RankState::Failed);
        assert_eq!(record.error.as_deref(), Some("timeout"));

        assert!(store.try_claim("Биология", Uuid::new_v4(), Utc::now()).await.unwrap());
        let record = store.get("Биология").await.unwrap().unwrap();
        assert_eq!(record.state, RankState::Computing);
        assert!(record.error.is_none());
    }

    #[tokio::test]
    async fn test_recover_resets_only_computing() {
        let store = MemoryStore::with_categories(["A", "B", "C"]);
        let task = Uuid::new_v4();
        store.try_claim("A", task, Utc::now()).await.unwrap();
        store.try_claim("B", Uuid::new_v4(), Utc::now()).await.unwrap();
        store.complete("A", task, &[]).await.unwrap();

        let reset = assert_ok!(store.recover_computing().await);
        assert_eq!(reset, 1);

        assert_eq!(store.get("A").await.unwrap().unwrap().state, RankState::Ready);
        assert_eq!(store.get("B").await.unwrap().unwrap().state, RankState::Unseeded);
        assert_eq!(store.get("C").await.unwrap().unwrap().state, RankState::Unseeded);
    }

    #[tokio::test]
    async fn test_reseed_replaces_registry() {
        let store = MemoryStore::with_categories(["Old"]);
        let titles = vec!["Б".to_string(), "А".to_string(), "Б".to_string()];

        assert_eq!(store.reseed(&titles).await.unwrap(), 2);
        assert_eq!(store.list_titles().await.unwrap(), vec!["А".to_string(), "Б".to_string()]);
        assert!(store.get("Old").await.unwrap().is_none());
    }
}
