//! Rank request service
//!
//! Wraps the ranking engine in the per-category state machine kept by the
//! rank store. A request either answers from a finished ranking, reports a
//! build in progress, or claims the category and starts a background build.
//! The claim is a compare-and-set on the store, so each category has at most
//! one build in flight.

mod task;

pub use task::{BuildOutcome, BuildTask, TaskRegistry};

use crate::paginate::paginate;
use crate::ranking::{build_ranking, RankSolver};
use catrank_common::{
    cache::{keys, Cache},
    config::AppConfig,
    errors::{AppError, Result},
    metrics,
    source::PageSource,
    RankState, RankStore, RankedEntry,
};
use serde::{Serialize, Serializer};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, info_span, warn, Instrument};

/// Attempts at claiming a category before reporting it as pending
const CLAIM_ATTEMPTS: usize = 3;

/// Status of a rank response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankStatus {
    Complete,
    Pending,
    Started,
}

impl RankStatus {
    pub fn as_code(&self) -> u8 {
        match self {
            RankStatus::Complete => 0,
            RankStatus::Pending => 1,
            RankStatus::Started => 2,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            RankStatus::Complete => "complete",
            RankStatus::Pending => "pending",
            RankStatus::Started => "started",
        }
    }
}

impl Serialize for RankStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_code())
    }
}

/// Answer to a rank request
#[derive(Debug, Clone, Serialize)]
pub struct RankResponse {
    pub total: i64,
    pub status: RankStatus,
    pub data: Vec<RankedEntry>,
    /// Last build error, echoed when a failed category is re-claimed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RankResponse {
    fn waiting(status: RankStatus, error: Option<String>) -> Self {
        Self {
            total: 0,
            status,
            data: Vec::new(),
            error,
        }
    }
}

/// Service tuning
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub build_timeout: Duration,
    pub default_page_size: usize,
    pub max_page_size: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for ServiceConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            build_timeout: config.build_timeout(),
            default_page_size: config.ranking.default_page_size,
            max_page_size: config.ranking.max_page_size,
        }
    }
}

#[derive(Clone)]
pub struct RankService {
    store: Arc<dyn RankStore>,
    source: Arc<dyn PageSource>,
    solver: RankSolver,
    cache: Option<Arc<Cache>>,
    tasks: Arc<TaskRegistry>,
    config: ServiceConfig,
}

impl RankService {
    pub fn new(
        store: Arc<dyn RankStore>,
        source: Arc<dyn PageSource>,
        solver: RankSolver,
        config: ServiceConfig,
    ) -> Self {
        Self {
            store,
            source,
            solver,
            cache: None,
            tasks: Arc::new(TaskRegistry::new()),
            config,
        }
    }

    /// Serve finished rankings through a Redis cache
    pub fn with_cache(mut self, cache: Arc<Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Handle a rank request for one page of a category
    pub async fn request(&self, category: &str, page: usize, size: usize) -> Result<RankResponse> {
        self.check_size(size)?;

        if let Some(entries) = self.cached(category).await {
            metrics::record_rank_request(RankStatus::Complete.as_str());
            return Ok(complete(&entries, page, size));
        }

        for _ in 0..CLAIM_ATTEMPTS {
            let record = self
                .store
                .get(category)
                .await?
                .ok_or_else(|| AppError::CategoryNotFound {
                    title: category.to_string(),
                })?;

            match record.state {
                RankState::Ready => {
                    self.populate_cache(category, &record.result).await;
                    metrics::record_rank_request(RankStatus::Complete.as_str());
                    return Ok(complete(&record.result, page, size));
                }
                RankState::Computing => {
                    metrics::record_rank_request(RankStatus::Pending.as_str());
                    return Ok(RankResponse::waiting(RankStatus::Pending, None));
                }
                RankState::Unseeded | RankState::Failed => {
                    let task = BuildTask::new(category);
                    if self.store.try_claim(category, task.id, task.started_at).await? {
                        self.spawn_build(task);
                        metrics::record_rank_request(RankStatus::Started.as_str());
                        return Ok(RankResponse::waiting(RankStatus::Started, record.error));
                    }
                    // Lost the claim; answer from whatever state won
                }
            }
        }

        metrics::record_rank_request(RankStatus::Pending.as_str());
        Ok(RankResponse::waiting(RankStatus::Pending, None))
    }

    /// Store a finished ranking; only the owning task can complete
    pub async fn complete(&self, task: &BuildTask, entries: &[RankedEntry]) -> Result<bool> {
        let stored = self.store.complete(&task.category, task.id, entries).await?;
        if stored {
            self.populate_cache(&task.category, entries).await;
        } else {
            warn!(category = %task.category, task_id = %task.id, "Build lost ownership, result discarded");
        }
        Ok(stored)
    }

    /// Mark a build as failed; only the owning task can fail it
    pub async fn fail(&self, task: &BuildTask, error: &str) -> Result<bool> {
        let stored = self.store.fail(&task.category, task.id, error).await?;
        if !stored {
            warn!(category = %task.category, task_id = %task.id, "Build lost ownership, failure discarded");
        }
        Ok(stored)
    }

    /// Reset builds orphaned by a previous process
    pub async fn recover_on_startup(&self) -> Result<u64> {
        let reset = self.store.recover_computing().await?;
        if reset > 0 {
            warn!(reset, "Reset interrupted builds to unseeded");
        } else {
            info!("No interrupted builds to recover");
        }
        Ok(reset)
    }

    /// All registered category titles, ascending
    pub async fn categories(&self) -> Result<Vec<String>> {
        self.store.list_titles().await
    }

    /// Wait for this process's build of `category`, if any
    pub async fn wait_for(&self, category: &str) -> Option<BuildOutcome> {
        self.tasks.wait_for(category).await
    }

    pub fn builds_in_flight(&self) -> usize {
        self.tasks.in_flight()
    }

    pub fn running_builds(&self) -> Vec<String> {
        self.tasks.running_categories()
    }

    pub async fn check_store(&self) -> Result<()> {
        self.store.ping().await
    }

    /// `None` when no cache is configured
    pub async fn check_cache(&self) -> Option<Result<()>> {
        match &self.cache {
            Some(cache) => Some(cache.ping().await),
            None => None,
        }
    }

    fn check_size(&self, size: usize) -> Result<()> {
        if size == 0 || size > self.config.max_page_size {
            return Err(AppError::Validation {
                message: format!("size must be between 1 and {}", self.config.max_page_size),
                field: Some("size".to_string()),
            });
        }
        Ok(())
    }

    async fn cached(&self, category: &str) -> Option<Vec<RankedEntry>> {
        let cache = self.cache.as_ref()?;
        match cache.get::<Vec<RankedEntry>>(&keys::ranking(category)).await {
            Ok(hit) => {
                metrics::record_cache(hit.is_some(), "ranking");
                hit
            }
            Err(e) => {
                warn!(category, error = %e, "Ranking cache read failed");
                None
            }
        }
    }

    async fn populate_cache(&self, category: &str, entries: &[RankedEntry]) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.set(&keys::ranking(category), &entries).await {
                warn!(category, error = %e, "Ranking cache write failed");
            }
        }
    }

    fn spawn_build(&self, task: BuildTask) {
        self.tasks.register(task.clone());
        metrics::record_build_started();

        let span = info_span!("build", category = %task.category, task_id = %task.id);
        let service = self.clone();
        tokio::spawn(async move { service.run_build(task).await }.instrument(span));
    }

    async fn run_build(&self, task: BuildTask) {
        let start = Instant::now();
        info!("Category build started");

        let cancel = Arc::new(AtomicBool::new(false));
        let built = build_ranking(
            self.source.as_ref(),
            self.solver,
            &task.category,
            self.config.build_timeout,
            cancel,
        )
        .await;

        let outcome = match built {
            Ok(entries) => match self.complete(&task, &entries).await {
                Ok(true) => BuildOutcome::Succeeded {
                    pages: entries.len(),
                    duration: start.elapsed(),
                },
                Ok(false) => BuildOutcome::Failed {
                    error: "build lost ownership, result discarded".to_string(),
                },
                Err(e) => {
                    error!(error = %e, "Failed to store ranking");
                    self.record_failure(&task, &e).await
                }
            },
            Err(e) => {
                warn!(error = %e, "Category build failed");
                self.record_failure(&task, &e).await
            }
        };

        match &outcome {
            BuildOutcome::Succeeded { pages, duration } => {
                info!(pages, duration_ms = duration.as_millis() as u64, "Category build finished");
                metrics::record_build_finished(duration.as_secs_f64(), *pages, true);
            }
            BuildOutcome::Failed { .. } => {
                metrics::record_build_finished(start.elapsed().as_secs_f64(), 0, false);
            }
        }

        self.tasks.finish(&task, outcome);
    }

    async fn record_failure(&self, task: &BuildTask, cause: &AppError) -> BuildOutcome {
        let message = cause.to_string();
        if let Err(e) = self.fail(task, &message).await {
            // Left in computing; startup recovery resets it
            error!(error = %e, "Failed to record build failure");
        }
        BuildOutcome::Failed { error: message }
    }
}

fn complete(entries: &[RankedEntry], page: usize, size: usize) -> RankResponse {
    let result = paginate(entries, page, size);
    RankResponse {
        total: result.total,
        status: RankStatus::Complete,
        data: result.data,
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use catrank_common::db::{CategoryRecord, MemoryStore};
    use catrank_common::source::{MemorySource, PageLinks};
    use chrono::{DateTime, Utc};
    use futures::future::join_all;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::{Barrier, Semaphore};
    use uuid::Uuid;

    /// Holds the first `parties` reads at a barrier, so concurrent callers
    /// all observe the record before any of them claims it
    struct LockstepStore {
        inner: MemoryStore,
        barrier: Barrier,
        parties: usize,
        reads: AtomicUsize,
        claims: AtomicUsize,
    }

    impl LockstepStore {
        fn new(inner: MemoryStore, parties: usize) -> Self {
            Self {
                inner,
                barrier: Barrier::new(parties),
                parties,
                reads: AtomicUsize::new(0),
                claims: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl RankStore for LockstepStore {
        async fn get(&self, title: &str) -> Result<Option<CategoryRecord>> {
            let record = self.inner.get(title).await?;
            if self.reads.fetch_add(1, Ordering::SeqCst) < self.parties {
                self.barrier.wait().await;
            }
            Ok(record)
        }

        async fn try_claim(&self, title: &str, task_id: Uuid, started_at: DateTime<Utc>) -> Result<bool> {
            self.claims.fetch_add(1, Ordering::SeqCst);
            self.inner.try_claim(title, task_id, started_at).await
        }

        async fn complete(&self, title: &str, task_id: Uuid, result: &[RankedEntry]) -> Result<bool> {
            self.inner.complete(title, task_id, result).await
        }

        async fn fail(&self, title: &str, task_id: Uuid, error: &str) -> Result<bool> {
            self.inner.fail(title, task_id, error).await
        }

        async fn recover_computing(&self) -> Result<u64> {
            self.inner.recover_computing().await
        }

        async fn list_titles(&self) -> Result<Vec<String>> {
            self.inner.list_titles().await
        }

        async fn reseed(&self, titles: &[String]) -> Result<u64> {
            self.inner.reseed(titles).await
        }

        async fn ping(&self) -> Result<()> {
            self.inner.ping().await
        }
    }

    /// A category large enough that its solve outlives a short build timeout
    fn large_category(name: &str, n: usize) -> MemorySource {
        let members: Vec<String> = (0..n).map(|i| format!("Статья {}", i)).collect();
        let pages = (0..n)
            .map(|i| PageLinks {
                title: members[i].clone(),
                links: vec![members[(i * 7 + 3) % n].clone(), members[(i * 13 + 5) % n].clone()],
                thumbnail: None,
            })
            .collect();
        MemorySource::new().with_category(name, members, pages)
    }

    fn physics() -> MemorySource {
        let members: Vec<String> = ["Масса", "Сила", "Вес", "Ускорение"]
            .iter()
            .map(|t| t.to_string())
            .collect();
        let pages = vec![
            PageLinks {
                title: "Масса".into(),
                links: vec!["Сила".into(), "Вес".into()],
                thumbnail: None,
            },
            PageLinks {
                title: "Вес".into(),
                links: vec!["Масса".into(), "Сила".into()],
                thumbnail: None,
            },
            PageLinks {
                title: "Ускорение".into(),
                links: vec!["Сила".into()],
                thumbnail: Some("https://upload.example/a.png".into()),
            },
        ];
        MemorySource::new().with_category("Физика", members, pages)
    }

    fn service(store: Arc<MemoryStore>, source: Arc<MemorySource>) -> RankService {
        service_with(store, source, ServiceConfig::default())
    }

    fn service_with(store: Arc<MemoryStore>, source: Arc<MemorySource>, config: ServiceConfig) -> RankService {
        RankService::new(store, source, RankSolver::new(0.15).unwrap(), config)
    }

    #[tokio::test]
    async fn test_first_request_starts_build() {
        let store = Arc::new(MemoryStore::with_categories(["Физика"]));
        let source = Arc::new(physics());
        let service = service(store.clone(), source.clone());

        let response = service.request("Физика", 0, 12).await.unwrap();
        assert_eq!(response.status, RankStatus::Started);
        assert!(response.data.is_empty());
        assert_eq!(response.total, 0);

        let outcome = service.wait_for("Физика").await.unwrap();
        assert!(outcome.is_success());

        let response = service.request("Физика", 0, 12).await.unwrap();
        assert_eq!(response.status, RankStatus::Complete);
        assert_eq!(response.total, 0);
        assert_eq!(response.data.len(), 4);
        assert_eq!(response.data[0].title, "Сила");

        let record = store.get("Физика").await.unwrap().unwrap();
        assert_eq!(record.state, RankState::Ready);
        assert_eq!(source.member_calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_requests_build_once() {
        let gate = Arc::new(Semaphore::new(0));
        let store = Arc::new(MemoryStore::with_categories(["Физика"]));
        let source = Arc::new(physics().gated(gate.clone()));
        let service = service(store.clone(), source.clone());

        let responses = join_all((0..2).map(|_| service.request("Физика", 0, 12))).await;
        let mut statuses: Vec<u8> = responses
            .into_iter()
            .map(|response| {
                let response = response.unwrap();
                assert!(response.data.is_empty());
                response.status.as_code()
            })
            .collect();
        statuses.sort();
        assert_eq!(statuses, vec![RankStatus::Pending.as_code(), RankStatus::Started.as_code()]);
        assert_eq!(service.builds_in_flight(), 1);

        gate.add_permits(1);
        assert!(service.wait_for("Физика").await.unwrap().is_success());
        assert_eq!(source.member_calls(), 1);
        assert_eq!(source.link_calls(), 1);
        assert_eq!(service.builds_in_flight(), 0);
    }

    #[tokio::test]
    async fn test_racing_claims_start_one_build() {
        let gate = Arc::new(Semaphore::new(0));
        let store = Arc::new(LockstepStore::new(MemoryStore::with_categories(["Физика"]), 2));
        let source = Arc::new(physics().gated(gate.clone()));
        let service = RankService::new(store.clone(), source.clone(), RankSolver::new(0.15).unwrap(), ServiceConfig::default());

        let responses = join_all((0..2).map(|_| service.request("Физика", 0, 12))).await;
        let mut statuses: Vec<u8> = responses
            .into_iter()
            .map(|response| response.unwrap().status.as_code())
            .collect();
        statuses.sort();

        // Both saw an unseeded record and tried to claim it
        assert_eq!(store.claims.load(Ordering::SeqCst), 2);
        assert_eq!(statuses, vec![RankStatus::Pending.as_code(), RankStatus::Started.as_code()]);
        assert_eq!(service.builds_in_flight(), 1);

        gate.add_permits(1);
        assert!(service.wait_for("Физика").await.unwrap().is_success());
        assert_eq!(source.member_calls(), 1);
    }

    #[tokio::test]
    async fn test_recovery_after_crash() {
        let store = Arc::new(MemoryStore::new());
        let mut orphan = CategoryRecord::unseeded("Физика");
        orphan.state = RankState::Computing;
        orphan.task_id = Some(Uuid::new_v4());
        orphan.started_at = Some(Utc::now());
        store.insert(orphan).await;

        let source = Arc::new(physics());
        let service = service(store.clone(), source.clone());

        // Before recovery the orphaned build blocks new claims
        let response = service.request("Физика", 0, 12).await.unwrap();
        assert_eq!(response.status, RankStatus::Pending);

        assert_eq!(service.recover_on_startup().await.unwrap(), 1);
        assert_eq!(store.get("Физика").await.unwrap().unwrap().state, RankState::Unseeded);

        let response = service.request("Физика", 0, 12).await.unwrap();
        assert_eq!(response.status, RankStatus::Started);
        assert!(service.wait_for("Физика").await.unwrap().is_success());
        assert_eq!(source.member_calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_build_is_reclaimed() {
        let store = Arc::new(MemoryStore::with_categories(["Физика"]));
        let source = Arc::new(physics().failing(1));
        let service = service(store.clone(), source.clone());

        service.request("Физика", 0, 12).await.unwrap();
        let outcome = service.wait_for("Физика").await.unwrap();
        assert!(matches!(outcome, BuildOutcome::Failed { .. }));

        let record = store.get("Физика").await.unwrap().unwrap();
        assert_eq!(record.state, RankState::Failed);
        assert!(record.result.is_empty());
        let detail = record.error.unwrap();
        assert!(detail.contains("scripted failure"));

        let response = service.request("Физика", 0, 12).await.unwrap();
        assert_eq!(response.status, RankStatus::Started);
        assert_eq!(response.error.as_deref(), Some(detail.as_str()));

        assert!(service.wait_for("Физика").await.unwrap().is_success());
        assert_eq!(store.get("Физика").await.unwrap().unwrap().state, RankState::Ready);
        assert_eq!(source.member_calls(), 2);
    }

    #[tokio::test]
    async fn test_build_timeout_fails_record() {
        let gate = Arc::new(Semaphore::new(0));
        let store = Arc::new(MemoryStore::with_categories(["Физика"]));
        let source = Arc::new(physics().gated(gate));
        let config = ServiceConfig {
            build_timeout: Duration::from_millis(50),
            ..ServiceConfig::default()
        };
        let service = service_with(store.clone(), source, config);

        service.request("Физика", 0, 12).await.unwrap();
        let outcome = service.wait_for("Физика").await.unwrap();
        assert!(matches!(outcome, BuildOutcome::Failed { ref error } if error.contains("timed out")));
        assert_eq!(store.get("Физика").await.unwrap().unwrap().state, RankState::Failed);
    }

    #[tokio::test]
    async fn test_timeout_during_solve_then_reclaim() {
        let store = Arc::new(MemoryStore::with_categories(["Огромная"]));
        let source = Arc::new(large_category("Огромная", 800));
        let config = ServiceConfig {
            build_timeout: Duration::from_millis(40),
            ..ServiceConfig::default()
        };
        let service = service_with(store.clone(), source, config);
        let detail = "Ranking build timed out after 40ms";

        assert_eq!(service.request("Огромная", 0, 12).await.unwrap().status, RankStatus::Started);
        let outcome = service.wait_for("Огромная").await.unwrap();
        assert_eq!(outcome, BuildOutcome::Failed { error: detail.to_string() });

        // The outcome is only published once the solve has stopped
        assert_eq!(service.builds_in_flight(), 0);
        let record = store.get("Огромная").await.unwrap().unwrap();
        assert_eq!(record.state, RankState::Failed);
        assert_eq!(record.error.as_deref(), Some(detail));

        let response = service.request("Огромная", 0, 12).await.unwrap();
        assert_eq!(response.status, RankStatus::Started);
        assert_eq!(response.error.as_deref(), Some(detail));
        assert_eq!(service.builds_in_flight(), 1);
        assert!(!service.wait_for("Огромная").await.unwrap().is_success());
    }

    #[tokio::test]
    async fn test_superseded_build_is_not_a_success() {
        let gate = Arc::new(Semaphore::new(0));
        let store = Arc::new(MemoryStore::with_categories(["Физика"]));
        let source = Arc::new(physics().gated(gate.clone()));
        let service = service(store.clone(), source);

        service.request("Физика", 0, 12).await.unwrap();

        // Another instance recovers and re-claims the record mid-build
        assert_eq!(store.recover_computing().await.unwrap(), 1);
        let other = BuildTask::new("Физика");
        assert!(store.try_claim("Физика", other.id, other.started_at).await.unwrap());

        gate.add_permits(1);
        let outcome = service.wait_for("Физика").await.unwrap();
        assert!(matches!(outcome, BuildOutcome::Failed { ref error } if error.contains("lost ownership")));

        let record = store.get("Физика").await.unwrap().unwrap();
        assert_eq!(record.state, RankState::Computing);
        assert_eq!(record.task_id, Some(other.id));
    }

    #[tokio::test]
    async fn test_unknown_category() {
        let service = service(Arc::new(MemoryStore::new()), Arc::new(physics()));
        let err = service.request("Физика", 0, 12).await.unwrap_err();
        assert!(matches!(err, AppError::CategoryNotFound { .. }));
    }

    #[tokio::test]
    async fn test_page_size_bounds() {
        let service = service(Arc::new(MemoryStore::with_categories(["Физика"])), Arc::new(physics()));
        for size in [0, 501] {
            let err = service.request("Физика", 0, size).await.unwrap_err();
            assert!(matches!(err, AppError::Validation { .. }));
        }
        assert!(service.request("Физика", 0, 500).await.is_ok());
    }

    #[tokio::test]
    async fn test_empty_category_is_ready() {
        let store = Arc::new(MemoryStore::with_categories(["Пусто"]));
        let source = Arc::new(MemorySource::new().with_category("Пусто", vec![], vec![]));
        let service = service(store, source);

        service.request("Пусто", 0, 12).await.unwrap();
        assert!(service.wait_for("Пусто").await.unwrap().is_success());

        let response = service.request("Пусто", 0, 12).await.unwrap();
        assert_eq!(response.status, RankStatus::Complete);
        assert_eq!(response.total, -1);
        assert!(response.data.is_empty());
    }

    #[tokio::test]
    async fn test_stale_task_cannot_complete() {
        let store = Arc::new(MemoryStore::with_categories(["Физика"]));
        let service = service(store.clone(), Arc::new(physics()));

        let owner = BuildTask::new("Физика");
        store.try_claim("Физика", owner.id, owner.started_at).await.unwrap();

        let stale = BuildTask::new("Физика");
        assert!(!service.complete(&stale, &[]).await.unwrap());
        assert!(!service.fail(&stale, "late").await.unwrap());
        assert!(service.complete(&owner, &[]).await.unwrap());
    }

    #[tokio::test]
    async fn test_categories_sorted() {
        let service = service(
            Arc::new(MemoryStore::with_categories(["Химия", "Биология", "Физика"])),
            Arc::new(physics()),
        );
        assert_eq!(
            service.categories().await.unwrap(),
            vec!["Биология".to_string(), "Физика".to_string(), "Химия".to_string()]
        );
    }

    #[test]
    fn test_response_wire_format() {
        let response = RankResponse {
            total: 2,
            status: RankStatus::Complete,
            data: vec![RankedEntry {
                title: "Сила".into(),
                rank: 41.5,
                image: None,
            }],
            error: None,
        };

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "total": 2,
                "status": 0,
                "data": [{ "title": "Сила", "rank": 41.5, "image": null }]
            })
        );
    }
}
