//! Worker pools: one per queue, bound to that queue's processor.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::processors::Processor;

use super::service::QueueService;
use super::store::QueueError;
use super::types::{FailureOutcome, QueueName, QueuedTask};

#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    /// How long an idle worker sleeps before polling again.
    pub poll_interval: Duration,
    /// Active tasks older than this are treated as stalled.
    pub stall_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            stall_timeout: Duration::from_secs(600),
        }
    }
}

impl WorkerConfig {
    fn stall_check_interval(&self) -> Duration {
        (self.stall_timeout / 2)
            .min(Duration::from_secs(30))
            .max(Duration::from_millis(1))
    }
}

/// What became of one claimed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskRun {
    Completed,
    RetryScheduled(DateTime<Utc>),
    Failed,
    /// The attempt had already been reclaimed; its outcome was dropped.
    Stale,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct WorkerStats {
    pub processed: u64,
    pub completed: u64,
    pub retried: u64,
    pub failed: u64,
    pub stalled: u64,
}

impl WorkerStats {
    fn record(&mut self, run: TaskRun) {
        self.processed += 1;
        match run {
            TaskRun::Completed => self.completed += 1,
            TaskRun::RetryScheduled(_) => self.retried += 1,
            TaskRun::Failed => self.failed += 1,
            TaskRun::Stale => {}
        }
    }
}

/// Run one claimed task through `processor` and acknowledge the outcome.
pub async fn run_task(
    queues: &QueueService,
    processor: &dyn Processor,
    task: QueuedTask,
) -> Result<TaskRun, QueueError> {
    let attempt = task.attempts_made;
    let (queue, task_id) = (task.queue, task.id);
    debug!(queue = %queue, task_id = %task_id, attempt, "processing task");

    let result = processor.process(&task).await;
    let now = queues.clock().now();
    let store = queues.store();

    let run = match result {
        Ok(()) => {
            if store.complete(task_id, attempt, now).await? {
                info!(queue = %queue, task_id = %task_id, "task completed");
                TaskRun::Completed
            } else {
                TaskRun::Stale
            }
        }
        Err(err) => match store.fail(task_id, attempt, err.to_string(), now).await? {
            Some(FailureOutcome::RetryAt(at)) => {
                warn!(queue = %queue, task_id = %task_id, attempt, error = %err, retry_at = %at, "task failed, retry scheduled");
                TaskRun::RetryScheduled(at)
            }
            Some(FailureOutcome::Exhausted) => {
                error!(queue = %queue, task_id = %task_id, attempts = attempt, error = %err, "task failed");
                TaskRun::Failed
            }
            None => TaskRun::Stale,
        },
    };

    if run == TaskRun::Stale {
        warn!(queue = %queue, task_id = %task_id, attempt, "late acknowledgement from stalled attempt ignored");
    }
    Ok(run)
}

/// Claim and run the next ready task on the processor's queue, if any.
pub async fn process_next(
    queues: &QueueService,
    processor: &dyn Processor,
) -> Result<Option<TaskRun>, QueueError> {
    let now = queues.clock().now();
    match queues.store().claim_next(processor.queue(), now).await? {
        Some(task) => run_task(queues, processor, task).await.map(Some),
        None => Ok(None),
    }
}

/// Fail (and possibly re-queue) active tasks that exceeded `stall_timeout`.
pub async fn reclaim_stalled(
    queues: &QueueService,
    queue: QueueName,
    stall_timeout: Duration,
) -> Result<usize, QueueError> {
    let now = queues.clock().now();
    let cutoff = now - chrono::Duration::from_std(stall_timeout).unwrap_or_default();
    let reclaimed = queues.store().reclaim_stalled(queue, cutoff, now).await?;

    for (task, outcome) in &reclaimed {
        match outcome {
            FailureOutcome::RetryAt(at) => {
                warn!(queue = %queue, task_id = %task.id, attempt = task.attempts_made, retry_at = %at, "task stalled, re-queued")
            }
            FailureOutcome::Exhausted => {
                error!(queue = %queue, task_id = %task.id, attempts = task.attempts_made, "task stalled, attempts exhausted")
            }
        }
    }
    Ok(reclaimed.len())
}

/// Handle to a running worker pool.
#[derive(Debug)]
pub struct WorkerPoolHandle {
    queue: QueueName,
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
    stats: Arc<Mutex<WorkerStats>>,
}

impl WorkerPoolHandle {
    pub fn queue(&self) -> QueueName {
        self.queue
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Stop claiming new tasks and wait, up to the stall timeout, for in-flight
    /// ones to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.join.await {
            error!(queue = %self.queue, error = %err, "worker pool terminated abnormally");
        }
    }
}

pub struct WorkerPool;

impl WorkerPool {
    /// Spawn a pool sized by the queue's configured concurrency.
    pub fn spawn(
        queues: QueueService,
        processor: Arc<dyn Processor>,
        config: WorkerConfig,
    ) -> WorkerPoolHandle {
        let queue = processor.queue();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(Mutex::new(WorkerStats::default()));

        let join = tokio::spawn(pool_loop(
            queues,
            processor,
            config,
            shutdown_rx,
            stats.clone(),
        ));

        WorkerPoolHandle {
            queue,
            shutdown: shutdown_tx,
            join,
            stats,
        }
    }
}

async fn pool_loop(
    queues: QueueService,
    processor: Arc<dyn Processor>,
    config: WorkerConfig,
    mut shutdown: watch::Receiver<bool>,
    stats: Arc<Mutex<WorkerStats>>,
) {
    let queue = processor.queue();
    let concurrency = queues.settings(queue).concurrency.max(1);
    let semaphore = Arc::new(Semaphore::new(concurrency));
    // Runs on its own timer so a pool whose permits are all held by hung
    // tasks still gets those tasks reclaimed.
    let mut stall_tick = tokio::time::interval(config.stall_check_interval());
    stall_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(queue = %queue, concurrency, "worker pool started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        let permit = tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            _ = stall_tick.tick() => {
                check_stalled(&queues, queue, config.stall_timeout, &stats).await;
                continue;
            }
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        match queues.store().claim_next(queue, queues.clock().now()).await {
            Ok(Some(task)) => {
                let queues = queues.clone();
                let processor = processor.clone();
                let stats = stats.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    let task_id = task.id;
                    match run_task(&queues, processor.as_ref(), task).await {
                        Ok(run) => stats.lock().unwrap_or_else(|e| e.into_inner()).record(run),
                        Err(err) => {
                            error!(queue = %queue, task_id = %task_id, error = %err, "failed to acknowledge task")
                        }
                    }
                });
            }
            Ok(None) => {
                drop(permit);
                if idle(&mut shutdown, config.poll_interval).await {
                    break;
                }
            }
            Err(err) => {
                drop(permit);
                error!(queue = %queue, error = %err, "failed to claim task");
                if idle(&mut shutdown, config.poll_interval).await {
                    break;
                }
            }
        }
    }

    // In-flight tasks hold permits; taking all of them waits for those to
    // finish, but no longer than a task is allowed to run.
    let drain = semaphore.acquire_many(concurrency as u32);
    match tokio::time::timeout(config.stall_timeout, drain).await {
        Ok(_) => info!(queue = %queue, "worker pool stopped"),
        Err(_) => warn!(
            queue = %queue,
            waited_ms = config.stall_timeout.as_millis() as u64,
            "worker pool stopped with tasks still in flight"
        ),
    }
}

async fn check_stalled(
    queues: &QueueService,
    queue: QueueName,
    stall_timeout: Duration,
    stats: &Mutex<WorkerStats>,
) {
    match reclaim_stalled(queues, queue, stall_timeout).await {
        Ok(n) if n > 0 => {
            stats.lock().unwrap_or_else(|e| e.into_inner()).stalled += n as u64;
        }
        Ok(_) => {}
        Err(err) => error!(queue = %queue, error = %err, "stall check failed"),
    }
}

/// Sleep for one poll interval. Returns `true` if the pool should stop.
async fn idle(shutdown: &mut watch::Receiver<bool>, poll_interval: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(poll_interval) => false,
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::processors::ProcessError;
    use crate::queue::settings::{EnqueueOptions, QueueSettings};
    use crate::queue::store::InMemoryTaskStore;
    use crate::queue::types::{Backoff, RetryPolicy, TaskStatus};
    use async_trait::async_trait;
    use rigger_core::SubscriptionId;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    /// Fails the first `failures` calls, then succeeds.
    struct Flaky {
        failures: usize,
        calls: AtomicUsize,
    }

    impl Flaky {
        fn new(failures: usize) -> Arc<Self> {
            Arc::new(Self {
                failures,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Processor for Flaky {
        fn queue(&self) -> QueueName {
            QueueName::Payments
        }

        async fn process(&self, _task: &QueuedTask) -> Result<(), ProcessError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(ProcessError::Integration(format!("gateway down ({call})")))
            } else {
                Ok(())
            }
        }
    }

    /// Never finishes.
    struct Hangs;

    #[async_trait]
    impl Processor for Hangs {
        fn queue(&self) -> QueueName {
            QueueName::Payments
        }

        async fn process(&self, _task: &QueuedTask) -> Result<(), ProcessError> {
            std::future::pending().await
        }
    }

    fn queues() -> (QueueService, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        (QueueService::new(InMemoryTaskStore::arc(), clock.clone()), clock)
    }

    #[tokio::test]
    async fn failed_attempts_back_off_then_succeed() {
        let (queues, clock) = queues();
        let processor = Flaky::new(2);
        let handle = queues
            .enqueue_payment(SubscriptionId::new(), EnqueueOptions::default())
            .await
            .unwrap();

        let run = process_next(&queues, processor.as_ref()).await.unwrap();
        assert!(matches!(run, Some(TaskRun::RetryScheduled(_))));

        // Fixed 5s backoff: nothing to claim until it elapses.
        assert_eq!(process_next(&queues, processor.as_ref()).await.unwrap(), None);
        clock.advance(chrono::Duration::seconds(5));

        let run = process_next(&queues, processor.as_ref()).await.unwrap();
        assert!(matches!(run, Some(TaskRun::RetryScheduled(_))));
        clock.advance(chrono::Duration::seconds(5));

        let run = process_next(&queues, processor.as_ref()).await.unwrap();
        assert_eq!(run, Some(TaskRun::Completed));

        let task = queues.store().get(handle.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.history.len(), 3);
    }

    #[tokio::test]
    async fn exhausted_task_is_kept_for_inspection() {
        let (queues, _clock) = queues();
        let processor = Flaky::new(usize::MAX);
        let options = EnqueueOptions::default().max_attempts(1);
        queues
            .enqueue_payment(SubscriptionId::new(), options)
            .await
            .unwrap();

        let run = process_next(&queues, processor.as_ref()).await.unwrap();
        assert_eq!(run, Some(TaskRun::Failed));

        let failed = queues.failed_tasks(QueueName::Payments, 10).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert!(matches!(&failed[0].status, TaskStatus::Failed { error } if error.contains("gateway down")));
    }

    #[tokio::test]
    async fn stalled_task_is_requeued_and_late_ack_dropped() {
        let (queues, clock) = queues();
        let processor = Flaky::new(0);
        queues
            .enqueue_payment(SubscriptionId::new(), EnqueueOptions::default())
            .await
            .unwrap();

        let claimed = queues
            .store()
            .claim_next(QueueName::Payments, clock.now())
            .await
            .unwrap()
            .unwrap();

        clock.advance(chrono::Duration::minutes(11));
        let reclaimed = reclaim_stalled(&queues, QueueName::Payments, Duration::from_secs(600))
            .await
            .unwrap();
        assert_eq!(reclaimed, 1);

        let run = run_task(&queues, processor.as_ref(), claimed).await.unwrap();
        assert_eq!(run, TaskRun::Stale);

        clock.advance(chrono::Duration::seconds(5));
        let run = process_next(&queues, processor.as_ref()).await.unwrap();
        assert_eq!(run, Some(TaskRun::Completed));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn pool_drains_queue_and_shuts_down() {
        let (queues, _clock) = queues();
        let queues = queues.with_settings(
            QueueSettings::for_queue(QueueName::Payments)
                .with_retry(RetryPolicy::new(1, Backoff::None))
                .with_concurrency(2),
        );
        let processor = Flaky::new(0);

        for _ in 0..5 {
            queues
                .enqueue_payment(SubscriptionId::new(), EnqueueOptions::default())
                .await
                .unwrap();
        }

        let config = WorkerConfig {
            poll_interval: Duration::from_millis(10),
            stall_timeout: Duration::from_secs(600),
        };
        let pool = WorkerPool::spawn(queues.clone(), processor.clone(), config);

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let counts = queues.counts(QueueName::Payments).await.unwrap();
            if counts.completed == 5 || Instant::now() > deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let stats = pool.stats();
        pool.shutdown().await;

        let counts = queues.counts(QueueName::Payments).await.unwrap();
        assert_eq!(counts.completed, 5);
        assert_eq!(counts.active, 0);
        assert_eq!(processor.calls.load(Ordering::SeqCst), 5);
        assert!(stats.completed <= 5);
    }

    async fn wait_until_active(queues: &QueueService) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while queues.counts(QueueName::Payments).await.unwrap().active == 0 {
            assert!(Instant::now() < deadline, "task was never claimed");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn single_slot_pool(queues: &QueueService) -> QueueService {
        queues
            .clone()
            .with_settings(QueueSettings::for_queue(QueueName::Payments).with_concurrency(1))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn full_pool_still_reclaims_stalled_tasks() {
        let (queues, clock) = queues();
        let queues = single_slot_pool(&queues);
        let handle = queues
            .enqueue_payment(SubscriptionId::new(), EnqueueOptions::default())
            .await
            .unwrap();

        let config = WorkerConfig {
            poll_interval: Duration::from_millis(10),
            stall_timeout: Duration::from_millis(200),
        };
        let pool = WorkerPool::spawn(queues.clone(), Arc::new(Hangs), config);
        wait_until_active(&queues).await;

        // The only permit is held by the hung task.
        clock.advance(chrono::Duration::minutes(30));
        let deadline = Instant::now() + Duration::from_millis(1500);
        while pool.stats().stalled == 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let task = queues.store().get(handle.id).await.unwrap().unwrap();
        assert!(pool.stats().stalled >= 1);
        assert_eq!(task.status, TaskStatus::Waiting);
        assert_eq!(task.history.len(), 1);

        pool.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_gives_up_on_hung_tasks() {
        let (queues, _clock) = queues();
        let queues = single_slot_pool(&queues);
        queues
            .enqueue_payment(SubscriptionId::new(), EnqueueOptions::default())
            .await
            .unwrap();

        let config = WorkerConfig {
            poll_interval: Duration::from_millis(10),
            stall_timeout: Duration::from_millis(200),
        };
        let pool = WorkerPool::spawn(queues.clone(), Arc::new(Hangs), config);
        wait_until_active(&queues).await;

        let stopped = tokio::time::timeout(Duration::from_secs(2), pool.shutdown()).await;
        assert!(stopped.is_ok(), "shutdown waited on a task that never finishes");
    }
}
