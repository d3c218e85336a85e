//! In-process task-result store with bounded per-entry lifetime.
//!
//! Each write schedules its own expiry task; an overwrite cancels the
//! superseded write's timer, and the removal itself is generation-guarded so
//! a stale timer can never delete a newer entry. Reads additionally treat
//! entries past their deadline as absent, so correctness does not depend on
//! when the runtime gets around to running the expiry task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::task::TaskResult;

/// Retention window for stored results. Pollers are expected to collect a
/// terminal result well within the hour.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(60 * 60);

struct Entry {
    result: TaskResult,
    generation: u64,
    deadline: Instant,
    expiry_token: CancellationToken,
}

/// Clone-cheap handle to the shared registry. All mutation goes through
/// [`TaskRegistry::put`]; there is no other way to touch the map.
#[derive(Clone)]
pub struct TaskRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    entries: DashMap<String, Entry>,
    retention: Duration,
    generations: AtomicU64,
}

impl TaskRegistry {
    pub fn new(retention: Duration) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                entries: DashMap::new(),
                retention,
                generations: AtomicU64::new(0),
            }),
        }
    }

    pub fn with_default_retention() -> Self {
        Self::new(DEFAULT_RETENTION)
    }

    pub fn retention(&self) -> Duration {
        self.inner.retention
    }

    /// Insert or overwrite the entry for `result.task_id` and schedule its
    /// removal after the retention window. Last write wins; the previous
    /// write's timer is cancelled and could not remove the new entry even if
    /// it fired, because removal checks the write generation.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn put(&self, result: TaskResult) {
        let task_id = result.task_id.clone();
        let generation = self.inner.generations.fetch_add(1, Ordering::Relaxed);
        let expiry_token = CancellationToken::new();
        let retention = self.inner.retention;

        let entry = Entry {
            result,
            generation,
            deadline: Instant::now() + retention,
            expiry_token: expiry_token.clone(),
        };

        if let Some(previous) = self.inner.entries.insert(task_id.clone(), entry) {
            previous.expiry_token.cancel();
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::select! {
                _ = expiry_token.cancelled() => {}
                _ = tokio::time::sleep(retention) => {
                    let removed = inner
                        .entries
                        .remove_if(&task_id, |_, entry| entry.generation == generation);
                    if removed.is_some() {
                        debug!(task_id, "task result expired");
                    }
                }
            }
        });
    }

    /// The current record for `task_id`, or `None` when it never arrived,
    /// already expired, or was lost to a restart. Never blocks. The three
    /// absent cases are indistinguishable to callers.
    pub fn get(&self, task_id: &str) -> Option<TaskResult> {
        let entry = self.inner.entries.get(task_id)?;
        if Instant::now() >= entry.deadline {
            return None;
        }
        Some(entry.result.clone())
    }

    /// Number of physically stored entries, counting entries past their
    /// deadline that the expiry task has not yet removed.
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }
}
