//! In-process registry of running category builds

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

/// One scheduled build of a category ranking
#[derive(Debug, Clone, PartialEq)]
pub struct BuildTask {
    pub id: Uuid,
    pub category: String,
    pub started_at: DateTime<Utc>,
}

impl BuildTask {
    pub fn new(category: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            category: category.into(),
            started_at: Utc::now(),
        }
    }
}

/// Terminal outcome of a build
#[derive(Debug, Clone, PartialEq)]
pub enum BuildOutcome {
    Succeeded { pages: usize, duration: Duration },
    Failed { error: String },
}

impl BuildOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, BuildOutcome::Succeeded { .. })
    }
}

struct Running {
    task: BuildTask,
    done: watch::Sender<Option<BuildOutcome>>,
}

#[derive(Default)]
struct Registry {
    running: HashMap<String, Running>,
    last: HashMap<String, BuildOutcome>,
}

/// Tracks running builds and their completion signals.
///
/// The lock is only held for map updates, never across an await.
#[derive(Default)]
pub struct TaskRegistry {
    inner: Mutex<Registry>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record a build as running
    pub fn register(&self, task: BuildTask) {
        let (done, _) = watch::channel(None);
        self.lock()
            .running
            .insert(task.category.clone(), Running { task, done });
    }

    /// Publish the outcome of `task` and drop it from the running set
    pub fn finish(&self, task: &BuildTask, outcome: BuildOutcome) {
        let mut registry = self.lock();
        let owned = registry
            .running
            .get(&task.category)
            .is_some_and(|running| running.task.id == task.id);

        if owned {
            if let Some(running) = registry.running.remove(&task.category) {
                running.done.send_replace(Some(outcome.clone()));
            }
        }
        registry.last.insert(task.category.clone(), outcome);
    }

    /// Categories with a build in flight
    pub fn running_categories(&self) -> Vec<String> {
        self.lock().running.keys().cloned().collect()
    }

    #[cfg(test)]
    fn running(&self, category: &str) -> Option<BuildTask> {
        self.lock().running.get(category).map(|running| running.task.clone())
    }

    pub fn in_flight(&self) -> usize {
        self.lock().running.len()
    }

    /// Wait for the running build of `category`.
    ///
    /// Falls back to the last finished outcome when nothing is running, and
    /// `None` when the category was never built by this process.
    pub async fn wait_for(&self, category: &str) -> Option<BuildOutcome> {
        let mut receiver = {
            let registry = self.lock();
            match registry.running.get(category) {
                Some(running) => running.done.subscribe(),
                None => return registry.last.get(category).cloned(),
            }
        };

        let outcome = receiver
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|outcome| outcome.clone());

        match outcome {
            Some(outcome) => Some(outcome),
            None => self.lock().last.get(category).cloned(),
        }
    }
}
