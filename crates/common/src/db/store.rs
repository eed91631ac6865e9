//! Rank store abstraction
//!
//! A `RankStore` owns the long-lived per-category records. Every state
//! transition that gates a build is a guarded write: `try_claim` only moves
//! `Unseeded`/`Failed` rows to `Computing`, and `complete`/`fail` only land
//! while the row is still `Computing` under the same task id.

use crate::errors::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a category record
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankState {
    Unseeded,
    Computing,
    Ready,
    Failed,
}

impl From<String> for RankState {
    fn from(s: String) -> Self {
        match s.as_str() {
            "unseeded" => RankState::Unseeded,
            "computing" => RankState::Computing,
            "ready" => RankState::Ready,
            "failed" => RankState::Failed,
            _ => RankState::Unseeded,
        }
    }
}

impl From<RankState> for String {
    fn from(state: RankState) -> Self {
        state.as_str().to_string()
    }
}

impl RankState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RankState::Unseeded => "unseeded",
            RankState::Computing => "computing",
            RankState::Ready => "ready",
            RankState::Failed => "failed",
        }
    }

    /// States a request may claim for a new build
    pub fn is_claimable(&self) -> bool {
        matches!(self, RankState::Unseeded | RankState::Failed)
    }
}

/// One page in a finished ranking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedEntry {
    pub title: String,

    /// Share of the stationary distribution, scaled to 0-100
    pub rank: f64,

    pub image: Option<String>,
}

/// A category record as seen by the ranking service
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryRecord {
    pub title: String,
    pub state: RankState,

    /// Sorted descending by rank; empty unless `state` is `Ready`
    pub result: Vec<RankedEntry>,

    /// Last failure detail; set only in `Failed`
    pub error: Option<String>,

    pub task_id: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl CategoryRecord {
    /// A freshly seeded record
    pub fn unseeded(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            state: RankState::Unseeded,
            result: Vec::new(),
            error: None,
            task_id: None,
            started_at: None,
            completed_at: None,
        }
    }
}

impl TryFrom<super::models::Category> for CategoryRecord {
    type Error = AppError;

    fn try_from(model: super::models::Category) -> Result<Self> {
        let result = match model.result {
            Some(json) => serde_json::from_value(json)?,
            None => Vec::new(),
        };

        Ok(Self {
            title: model.title,
            state: RankState::from(model.state),
            result,
            error: model.error_message,
            task_id: model.task_id,
            started_at: model.started_at.map(|t| t.with_timezone(&Utc)),
            completed_at: model.completed_at.map(|t| t.with_timezone(&Utc)),
        })
    }
}

/// Persistent store for category records
#[async_trait]
pub trait RankStore: Send + Sync {
    /// Read the current record for a category
    async fn get(&self, title: &str) -> Result<Option<CategoryRecord>>;

    /// Atomically move an `Unseeded` or `Failed` record to `Computing`.
    ///
    /// Returns `false` when the record is missing or in any other state.
    async fn try_claim(&self, title: &str, task_id: Uuid, started_at: DateTime<Utc>) -> Result<bool>;

    /// Store a finished ranking and move the record to `Ready`
    async fn complete(&self, title: &str, task_id: Uuid, result: &[RankedEntry]) -> Result<bool>;

    /// Move the record to `Failed` with the given detail
    async fn fail(&self, title: &str, task_id: Uuid, error: &str) -> Result<bool>;

    /// Reset every `Computing` record to `Unseeded`, returning how many changed
    async fn recover_computing(&self) -> Result<u64>;

    /// All registry titles, ascending
    async fn list_titles(&self) -> Result<Vec<String>>;

    /// Replace the registry with `Unseeded` records for the given titles
    async fn reseed(&self, titles: &[String]) -> Result<u64>;

    /// Check connectivity
    async fn ping(&self) -> Result<()>;
}
