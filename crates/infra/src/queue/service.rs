//! The enqueue side of the queue layer.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, instrument};

use rigger_core::{JobPostingId, SubscriptionId, WorkerProfileId};

use crate::clock::Clock;

use super::settings::{EnqueueOptions, QueueSettings};
use super::store::{QueueError, TaskStore};
use super::types::{
    ComplianceCheck, ComplianceTask, MatchingTask, NotificationMessage, NotificationTask,
    PaymentTask, QueueCounts, QueueName, QueuedTask, RetryPolicy, TaskHandle, TaskId,
    TaskPayload, TaskStatus,
};

/// Constructed once at start-up and cloned into whatever needs to enqueue work
/// (processors, scheduler, HTTP handlers).
#[derive(Clone)]
pub struct QueueService {
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    settings: Arc<HashMap<QueueName, QueueSettings>>,
}

impl QueueService {
    /// Service with the default settings for every queue.
    pub fn new(store: Arc<dyn TaskStore>, clock: Arc<dyn Clock>) -> Self {
        let settings = QueueName::ALL
            .into_iter()
            .map(|name| (name, QueueSettings::for_queue(name)))
            .collect();
        Self {
            store,
            clock,
            settings: Arc::new(settings),
        }
    }

    /// Replace the settings of one queue.
    pub fn with_settings(mut self, settings: QueueSettings) -> Self {
        Arc::make_mut(&mut self.settings).insert(settings.name, settings);
        self
    }

    pub fn settings(&self, queue: QueueName) -> QueueSettings {
        self.settings
            .get(&queue)
            .copied()
            .unwrap_or_else(|| QueueSettings::for_queue(queue))
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Record a task. Returns once the task is stored; never waits for it to run.
    #[instrument(skip(self, payload), fields(queue = %payload.queue()))]
    pub async fn enqueue(
        &self,
        payload: TaskPayload,
        options: EnqueueOptions,
    ) -> Result<TaskHandle, QueueError> {
        let queue = payload.queue();
        let settings = self.settings(queue);
        let now = self.clock.now();

        let delay = options.delay.unwrap_or(settings.default_delay);
        let retry = RetryPolicy::new(
            options.max_attempts.unwrap_or(settings.retry.max_attempts),
            options.backoff.unwrap_or(settings.retry.backoff),
        );

        let task = QueuedTask {
            id: TaskId::new(),
            queue,
            payload,
            status: TaskStatus::Waiting,
            retry,
            attempts_made: 0,
            keep_completed: options.keep_completed.unwrap_or(settings.keep_completed),
            keep_failed: options.keep_failed.unwrap_or(settings.keep_failed),
            created_at: now,
            available_at: now + chrono::Duration::from_std(delay).unwrap_or_default(),
            started_at: None,
            finished_at: None,
            history: Vec::new(),
        };
        let available_at = task.available_at;

        let id = self.store.enqueue(task).await?;
        debug!(task_id = %id, %available_at, "task enqueued");

        Ok(TaskHandle {
            id,
            queue,
            task_name: queue.task_name().to_string(),
            available_at,
        })
    }

    pub async fn enqueue_matching(
        &self,
        job_id: JobPostingId,
        options: EnqueueOptions,
    ) -> Result<TaskHandle, QueueError> {
        self.enqueue(TaskPayload::Matching(MatchingTask { job_id }), options)
            .await
    }

    pub async fn enqueue_notification(
        &self,
        recipient: impl Into<String>,
        message: NotificationMessage,
        options: EnqueueOptions,
    ) -> Result<TaskHandle, QueueError> {
        let payload = TaskPayload::Notification(NotificationTask {
            recipient: recipient.into(),
            message,
        });
        self.enqueue(payload, options).await
    }

    pub async fn enqueue_payment(
        &self,
        subscription_id: SubscriptionId,
        options: EnqueueOptions,
    ) -> Result<TaskHandle, QueueError> {
        self.enqueue(TaskPayload::Payment(PaymentTask { subscription_id }), options)
            .await
    }

    pub async fn enqueue_compliance(
        &self,
        worker_id: WorkerProfileId,
        check_type: ComplianceCheck,
        options: EnqueueOptions,
    ) -> Result<TaskHandle, QueueError> {
        let payload = TaskPayload::Compliance(ComplianceTask {
            worker_id,
            check_type,
        });
        self.enqueue(payload, options).await
    }

    pub async fn counts(&self, queue: QueueName) -> Result<QueueCounts, QueueError> {
        self.store.counts(queue, self.clock.now()).await
    }

    /// Counts for every queue, in [`QueueName::ALL`] order.
    pub async fn all_counts(&self) -> Result<Vec<(QueueName, QueueCounts)>, QueueError> {
        let mut all = Vec::with_capacity(QueueName::ALL.len());
        for queue in QueueName::ALL {
            all.push((queue, self.counts(queue).await?));
        }
        Ok(all)
    }

    pub async fn failed_tasks(
        &self,
        queue: QueueName,
        limit: usize,
    ) -> Result<Vec<QueuedTask>, QueueError> {
        self.store.failed(queue, limit).await
    }

    /// Purge finished tasks older than each queue's retention window.
    pub async fn clean_all(&self) -> Result<usize, QueueError> {
        let now = self.clock.now();
        let mut removed = 0;
        for queue in QueueName::ALL {
            let window = self.settings(queue).clean_after;
            let cutoff = now - chrono::Duration::from_std(window).unwrap_or_default();
            let n = self.store.clean(queue, cutoff).await?;
            if n > 0 {
                info!(queue = %queue, removed = n, "cleaned finished tasks");
            }
            removed += n;
        }
        Ok(removed)
    }
}
