//! Task storage implementations.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::types::{FailureOutcome, QueueCounts, QueueName, QueuedTask, TaskId, TaskStatus};

/// Queue backend abstraction.
///
/// Acknowledgements carry the attempt number they belong to; an ack for an
/// attempt that is no longer the active one (e.g. it was declared stalled) is
/// ignored.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Record a new task.
    async fn enqueue(&self, task: QueuedTask) -> Result<TaskId, QueueError>;

    async fn get(&self, id: TaskId) -> Result<Option<QueuedTask>, QueueError>;

    /// Claim the oldest ready task on `queue`, marking it active.
    async fn claim_next(
        &self,
        queue: QueueName,
        now: DateTime<Utc>,
    ) -> Result<Option<QueuedTask>, QueueError>;

    /// Acknowledge success. Returns `false` if the ack was stale.
    async fn complete(&self, id: TaskId, attempt: u32, now: DateTime<Utc>)
    -> Result<bool, QueueError>;

    /// Acknowledge failure. Returns `None` if the ack was stale.
    async fn fail(
        &self,
        id: TaskId,
        attempt: u32,
        error: String,
        now: DateTime<Utc>,
    ) -> Result<Option<FailureOutcome>, QueueError>;

    /// Fail every active task on `queue` that started before `started_before`.
    async fn reclaim_stalled(
        &self,
        queue: QueueName,
        started_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<(QueuedTask, FailureOutcome)>, QueueError>;

    /// Remove finished tasks on `queue` that finished before `older_than`.
    async fn clean(&self, queue: QueueName, older_than: DateTime<Utc>) -> Result<usize, QueueError>;

    async fn counts(&self, queue: QueueName, now: DateTime<Utc>) -> Result<QueueCounts, QueueError>;

    /// Tasks whose attempts are exhausted, newest first.
    async fn failed(&self, queue: QueueName, limit: usize) -> Result<Vec<QueuedTask>, QueueError>;

    /// Every retained task on `queue`, oldest first.
    async fn list(&self, queue: QueueName) -> Result<Vec<QueuedTask>, QueueError>;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum QueueError {
    #[error("task not found: {0}")]
    NotFound(TaskId),
    #[error("task already exists: {0}")]
    AlreadyExists(TaskId),
    #[error("payload for queue {payload} enqueued on {queue}")]
    WrongQueue { queue: QueueName, payload: QueueName },
    #[error("queue storage error: {0}")]
    Storage(String),
}

/// Process-local task store.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<TaskId, QueuedTask>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<TaskId, QueuedTask>> {
        self.tasks.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<TaskId, QueuedTask>> {
        self.tasks.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn is_current_attempt(task: &QueuedTask, attempt: u32) -> bool {
    task.status == TaskStatus::Active && task.attempts_made == attempt
}

/// Keep only the newest `keep` finished tasks of one kind on `queue`.
fn trim(
    tasks: &mut HashMap<TaskId, QueuedTask>,
    queue: QueueName,
    keep: usize,
    completed: bool,
) {
    let mut finished: Vec<(DateTime<Utc>, TaskId)> = tasks
        .values()
        .filter(|t| t.queue == queue)
        .filter(|t| match t.status {
            TaskStatus::Completed => completed,
            TaskStatus::Failed { .. } => !completed,
            _ => false,
        })
        .map(|t| (t.finished_at.unwrap_or(t.created_at), t.id))
        .collect();

    if finished.len() <= keep {
        return;
    }

    finished.sort_by(|a, b| b.cmp(a));
    for (_, id) in finished.into_iter().skip(keep) {
        tasks.remove(&id);
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn enqueue(&self, task: QueuedTask) -> Result<TaskId, QueueError> {
        let mut tasks = self.write();
        if tasks.contains_key(&task.id) {
            return Err(QueueError::AlreadyExists(task.id));
        }
        let id = task.id;
        tasks.insert(id, task);
        Ok(id)
    }

    async fn get(&self, id: TaskId) -> Result<Option<QueuedTask>, QueueError> {
        Ok(self.read().get(&id).cloned())
    }

    async fn claim_next(
        &self,
        queue: QueueName,
        now: DateTime<Utc>,
    ) -> Result<Option<QueuedTask>, QueueError> {
        let mut tasks = self.write();

        // Oldest ready task first
        let next = tasks
            .values()
            .filter(|t| t.queue == queue && t.is_ready(now))
            .min_by_key(|t| (t.available_at, t.created_at, t.id))
            .map(|t| t.id);

        Ok(next.and_then(|id| {
            tasks.get_mut(&id).map(|task| {
                task.mark_active(now);
                task.clone()
            })
        }))
    }

    async fn complete(
        &self,
        id: TaskId,
        attempt: u32,
        now: DateTime<Utc>,
    ) -> Result<bool, QueueError> {
        let mut tasks = self.write();
        let task = tasks.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        if !is_current_attempt(task, attempt) {
            return Ok(false);
        }

        task.mark_completed(now);
        let (queue, keep) = (task.queue, task.keep_completed);
        trim(&mut tasks, queue, keep, true);
        Ok(true)
    }

    async fn fail(
        &self,
        id: TaskId,
        attempt: u32,
        error: String,
        now: DateTime<Utc>,
    ) -> Result<Option<FailureOutcome>, QueueError> {
        let mut tasks = self.write();
        let task = tasks.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        if !is_current_attempt(task, attempt) {
            return Ok(None);
        }

        let outcome = task.mark_failed(error, now);
        if outcome == FailureOutcome::Exhausted {
            let (queue, keep) = (task.queue, task.keep_failed);
            trim(&mut tasks, queue, keep, false);
        }
        Ok(Some(outcome))
    }

    async fn reclaim_stalled(
        &self,
        queue: QueueName,
        started_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<(QueuedTask, FailureOutcome)>, QueueError> {
        let mut tasks = self.write();
        let mut reclaimed = Vec::new();

        for task in tasks.values_mut() {
            let stalled = task.queue == queue
                && task.status == TaskStatus::Active
                && task.started_at.is_some_and(|s| s < started_before);
            if stalled {
                let outcome = task.mark_failed("task stalled".to_string(), now);
                reclaimed.push((task.clone(), outcome));
            }
        }

        if let Some(keep) = reclaimed
            .iter()
            .filter(|(_, o)| *o == FailureOutcome::Exhausted)
            .map(|(t, _)| t.keep_failed)
            .min()
        {
            trim(&mut tasks, queue, keep, false);
        }
        Ok(reclaimed)
    }

    async fn clean(&self, queue: QueueName, older_than: DateTime<Utc>) -> Result<usize, QueueError> {
        let mut tasks = self.write();
        let before = tasks.len();
        tasks.retain(|_, t| {
            !(t.queue == queue
                && t.status.is_finished()
                && t.finished_at.is_some_and(|f| f < older_than))
        });
        Ok(before - tasks.len())
    }

    async fn counts(&self, queue: QueueName, now: DateTime<Utc>) -> Result<QueueCounts, QueueError> {
        let tasks = self.read();
        let mut counts = QueueCounts::default();
        for task in tasks.values().filter(|t| t.queue == queue) {
            match task.status {
                TaskStatus::Waiting if task.is_delayed(now) => counts.delayed += 1,
                TaskStatus::Waiting => counts.waiting += 1,
                TaskStatus::Active => counts.active += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed { .. } => counts.failed += 1,
            }
        }
        Ok(counts)
    }

    async fn failed(&self, queue: QueueName, limit: usize) -> Result<Vec<QueuedTask>, QueueError> {
        let tasks = self.read();
        let mut failed: Vec<_> = tasks
            .values()
            .filter(|t| t.queue == queue && matches!(t.status, TaskStatus::Failed { .. }))
            .cloned()
            .collect();
        failed.sort_by(|a, b| b.finished_at.cmp(&a.finished_at));
        failed.truncate(limit);
        Ok(failed)
    }

    async fn list(&self, queue: QueueName) -> Result<Vec<QueuedTask>, QueueError> {
        let tasks = self.read();
        let mut list: Vec<_> = tasks.values().filter(|t| t.queue == queue).cloned().collect();
        list.sort_by_key(|t| (t.created_at, t.id));
        Ok(list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::types::{Backoff, MatchingTask, RetryPolicy, TaskPayload};
    use chrono::Duration;
    use rigger_core::JobPostingId;

    fn task(now: DateTime<Utc>, max_attempts: u32) -> QueuedTask {
        QueuedTask {
            id: TaskId::new(),
            queue: QueueName::Matching,
            payload: TaskPayload::Matching(MatchingTask {
                job_id: JobPostingId::new(),
            }),
            status: TaskStatus::Waiting,
            retry: RetryPolicy::new(max_attempts, Backoff::None),
            attempts_made: 0,
            keep_completed: 2,
            keep_failed: 1,
            created_at: now,
            available_at: now,
            started_at: None,
            finished_at: None,
            history: Vec::new(),
        }
    }

    #[tokio::test]
    async fn claim_is_fifo_and_skips_delayed() {
        let store = InMemoryTaskStore::new();
        let now = Utc::now();

        let mut delayed = task(now, 1);
        delayed.available_at = now + Duration::minutes(5);
        let first = task(now, 1);
        let mut second = task(now + Duration::seconds(1), 1);
        second.available_at = now + Duration::seconds(1);

        store.enqueue(delayed.clone()).await.unwrap();
        store.enqueue(second.clone()).await.unwrap();
        store.enqueue(first.clone()).await.unwrap();

        let later = now + Duration::seconds(2);
        let claimed = store.claim_next(QueueName::Matching, later).await.unwrap().unwrap();
        assert_eq!(claimed.id, first.id);
        assert_eq!(claimed.attempts_made, 1);

        let claimed = store.claim_next(QueueName::Matching, later).await.unwrap().unwrap();
        assert_eq!(claimed.id, second.id);

        assert!(store.claim_next(QueueName::Matching, later).await.unwrap().is_none());
        assert!(store.claim_next(QueueName::Payments, later).await.unwrap().is_none());

        let counts = store.counts(QueueName::Matching, later).await.unwrap();
        assert_eq!(counts.active, 2);
        assert_eq!(counts.delayed, 1);
    }

    #[tokio::test]
    async fn retention_keeps_newest_completed() {
        let store = InMemoryTaskStore::new();
        let now = Utc::now();

        for i in 0..4 {
            let t = task(now, 1);
            store.enqueue(t).await.unwrap();
            let at = now + Duration::seconds(i);
            let claimed = store.claim_next(QueueName::Matching, at).await.unwrap().unwrap();
            assert!(store.complete(claimed.id, 1, at).await.unwrap());
        }

        let counts = store.counts(QueueName::Matching, now).await.unwrap();
        assert_eq!(counts.completed, 2);
    }

    #[tokio::test]
    async fn exhausted_tasks_land_in_failed_set() {
        let store = InMemoryTaskStore::new();
        let now = Utc::now();
        let t = task(now, 2);
        let id = store.enqueue(t).await.unwrap();

        store.claim_next(QueueName::Matching, now).await.unwrap();
        let outcome = store.fail(id, 1, "first".into(), now).await.unwrap();
        assert_eq!(outcome, Some(FailureOutcome::RetryAt(now)));

        store.claim_next(QueueName::Matching, now).await.unwrap();
        let outcome = store.fail(id, 2, "second".into(), now).await.unwrap();
        assert_eq!(outcome, Some(FailureOutcome::Exhausted));

        let failed = store.failed(QueueName::Matching, 10).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].history.len(), 2);
    }

    #[tokio::test]
    async fn stale_ack_after_stall_is_ignored() {
        let store = InMemoryTaskStore::new();
        let now = Utc::now();
        let id = store.enqueue(task(now, 3)).await.unwrap();

        store.claim_next(QueueName::Matching, now).await.unwrap();
        let later = now + Duration::minutes(20);
        let reclaimed = store
            .reclaim_stalled(QueueName::Matching, later - Duration::minutes(10), later)
            .await
            .unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].1, FailureOutcome::RetryAt(later));

        // The first attempt finishing late must not complete the task.
        assert!(!store.complete(id, 1, later).await.unwrap());
        let task = store.get(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Waiting);

        store.claim_next(QueueName::Matching, later).await.unwrap();
        assert!(store.complete(id, 2, later).await.unwrap());
    }

    #[tokio::test]
    async fn clean_removes_only_old_finished_tasks() {
        let store = InMemoryTaskStore::new();
        let now = Utc::now();

        let old = store.enqueue(task(now, 1)).await.unwrap();
        store.claim_next(QueueName::Matching, now).await.unwrap();
        store.complete(old, 1, now).await.unwrap();

        let pending = store.enqueue(task(now, 1)).await.unwrap();

        let removed = store
            .clean(QueueName::Matching, now + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.get(old).await.unwrap().is_none());
        assert!(store.get(pending).await.unwrap().is_some());
    }
}
