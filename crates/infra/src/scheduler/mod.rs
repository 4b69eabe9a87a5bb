//! Time-driven triggers that enqueue work or run housekeeping inline.
//!
//! One loop reads the injected clock, works out which triggers fell due since
//! the previous tick and fires each in its own task, so a failing trigger never
//! holds up the others. A trigger that is still running when it falls due
//! again is skipped for that firing.

pub mod health;
pub mod triggers;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use serde_json::{Value as JsonValue, json};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::queue::{ComplianceCheck, EnqueueOptions, NotificationMessage, QueueError, QueueService};
use crate::store::{MarketplaceStore, StoreError};

pub use triggers::{TRIGGER_TABLE, Trigger, TriggerKind, default_triggers};

const MAX_TICK: StdDuration = StdDuration::from_secs(60);
const MIN_TICK: StdDuration = StdDuration::from_millis(50);

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("invalid calendar expression for {trigger}: {message}")]
    InvalidExpression {
        trigger: TriggerKind,
        message: String,
    },
    #[error("{0} is still running")]
    AlreadyRunning(TriggerKind),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("{trigger} aborted: {message}")]
    Aborted {
        trigger: TriggerKind,
        message: String,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    /// Resident memory above this is reported by the health check.
    pub memory_threshold_bytes: u64,
    /// Upper bound of the random delay added to each swept matching task.
    pub max_jitter: StdDuration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            memory_threshold_bytes: 500 * 1024 * 1024,
            max_jitter: StdDuration::from_secs(5 * 60),
        }
    }
}

/// What one firing did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggerReport {
    pub trigger: TriggerKind,
    /// Tasks put on queues by this firing.
    pub enqueued: usize,
    pub detail: JsonValue,
}

impl TriggerReport {
    fn new(trigger: TriggerKind, enqueued: usize, detail: JsonValue) -> Self {
        Self {
            trigger,
            enqueued,
            detail,
        }
    }
}

pub struct SchedulerService {
    triggers: Vec<Trigger>,
    store: Arc<dyn MarketplaceStore>,
    queues: QueueService,
    clock: Arc<dyn Clock>,
    settings: SchedulerSettings,
    running: Mutex<HashSet<TriggerKind>>,
    rng: Mutex<StdRng>,
    /// When the last successful matching sweep ran.
    last_sweep: Mutex<Option<DateTime<Utc>>>,
}

/// Releases a trigger's run-lock when the firing ends, including by panic.
struct RunGuard<'a> {
    running: &'a Mutex<HashSet<TriggerKind>>,
    kind: TriggerKind,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.kind);
    }
}

impl SchedulerService {
    pub fn new(
        store: Arc<dyn MarketplaceStore>,
        queues: QueueService,
        clock: Arc<dyn Clock>,
        settings: SchedulerSettings,
    ) -> Result<Self, SchedulerError> {
        Ok(Self {
            triggers: default_triggers()?,
            store,
            queues,
            clock,
            settings,
            running: Mutex::new(HashSet::new()),
            rng: Mutex::new(StdRng::from_entropy()),
            last_sweep: Mutex::new(None),
        })
    }

    /// Deterministic jitter, for tests and replays.
    pub fn with_rng_seed(self, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..self
        }
    }

    pub fn triggers(&self) -> &[Trigger] {
        &self.triggers
    }

    /// Triggers that fire at least once in `(since, until]`, in table order.
    pub fn due(&self, since: DateTime<Utc>, until: DateTime<Utc>) -> Vec<TriggerKind> {
        self.triggers
            .iter()
            .filter(|t| t.is_due(since, until))
            .map(|t| t.kind)
            .collect()
    }

    /// Run one trigger's action now. Fails with `AlreadyRunning` if the
    /// previous firing of the same trigger has not finished.
    pub async fn fire(
        &self,
        kind: TriggerKind,
        now: DateTime<Utc>,
    ) -> Result<TriggerReport, SchedulerError> {
        let _guard = self.lock(kind)?;
        debug!(trigger = %kind, "trigger fired");

        match kind {
            TriggerKind::JobMatchingSweep => self.matching_sweep(now).await,
            TriggerKind::PaymentRun => self.payment_run(now).await,
            TriggerKind::ComplianceSweep => self.compliance_sweep(now).await,
            TriggerKind::WeeklyReport => self.weekly_report(now).await,
            TriggerKind::DatabaseCleanup => self.database_cleanup(now).await,
            TriggerKind::HealthCheck => self.health_check(now).await,
        }
    }

    fn lock(&self, kind: TriggerKind) -> Result<RunGuard<'_>, SchedulerError> {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if !running.insert(kind) {
            return Err(SchedulerError::AlreadyRunning(kind));
        }
        Ok(RunGuard {
            running: &self.running,
            kind,
        })
    }

    /// Fire every trigger due in `(since, until]`, each in its own task.
    pub fn spawn_due(
        self: &Arc<Self>,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Vec<(TriggerKind, JoinHandle<Result<TriggerReport, SchedulerError>>)> {
        self.due(since, until)
            .into_iter()
            .map(|kind| {
                let this = Arc::clone(self);
                let handle = tokio::spawn(async move {
                    let result = this.fire(kind, until).await;
                    match &result {
                        Ok(report) => {
                            info!(trigger = %kind, enqueued = report.enqueued, "trigger completed")
                        }
                        Err(SchedulerError::AlreadyRunning(_)) => {
                            warn!(trigger = %kind, "previous run still in progress, skipping")
                        }
                        Err(err) => error!(trigger = %kind, error = %err, "trigger failed"),
                    }
                    result
                });
                (kind, handle)
            })
            .collect()
    }

    /// Fire the triggers due in `(since, until]` and wait for all of them.
    pub async fn run_due(
        self: &Arc<Self>,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Vec<(TriggerKind, Result<TriggerReport, SchedulerError>)> {
        let mut results = Vec::new();
        for (kind, handle) in self.spawn_due(since, until) {
            let result = handle.await.unwrap_or_else(|e| {
                Err(SchedulerError::Aborted {
                    trigger: kind,
                    message: e.to_string(),
                })
            });
            results.push((kind, result));
        }
        results
    }

    /// Start the scheduling loop.
    pub fn spawn(self: Arc<Self>) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let join = tokio::spawn(async move {
            let mut last_tick = self.clock.now();
            info!(triggers = self.triggers.len(), "scheduler started");

            loop {
                let wait = self.until_next(last_tick);
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }

                let now = self.clock.now();
                if now <= last_tick {
                    continue;
                }
                // Detached: each firing logs its own outcome.
                drop(self.spawn_due(last_tick, now));
                last_tick = now;
            }

            info!("scheduler stopped");
        });

        SchedulerHandle {
            shutdown: shutdown_tx,
            join,
        }
    }

    fn until_next(&self, last_tick: DateTime<Utc>) -> StdDuration {
        let now = self.clock.now();
        self.triggers
            .iter()
            .filter_map(|t| t.next_after(last_tick))
            .min()
            .and_then(|next| (next - now).to_std().ok())
            .unwrap_or(MIN_TICK)
            .clamp(MIN_TICK, MAX_TICK)
    }

    fn jitter(&self) -> StdDuration {
        let max_ms = self.settings.max_jitter.as_millis() as u64;
        let ms = self
            .rng
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .gen_range(0..=max_ms);
        StdDuration::from_millis(ms)
    }

    /// Start of the sweep's publication window: fifteen minutes back, or
    /// further if the previous sweep ran earlier than that.
    fn sweep_window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let lookback = now - Duration::minutes(15);
        match *self.last_sweep.lock().unwrap_or_else(|e| e.into_inner()) {
            Some(previous) => previous.min(lookback),
            None => lookback,
        }
    }

    async fn matching_sweep(&self, now: DateTime<Utc>) -> Result<TriggerReport, SchedulerError> {
        let jobs = self
            .store
            .jobs_published_since(self.sweep_window_start(now))
            .await?;

        let mut delays_ms = Vec::with_capacity(jobs.len());
        for job_id in &jobs {
            let delay = self.jitter();
            self.queues
                .enqueue_matching(*job_id, EnqueueOptions::default().delay(delay))
                .await?;
            delays_ms.push(delay.as_millis() as u64);
        }

        *self.last_sweep.lock().unwrap_or_else(|e| e.into_inner()) = Some(now);

        if !jobs.is_empty() {
            info!(jobs = jobs.len(), "queued matching for newly published jobs");
        }
        Ok(TriggerReport::new(
            TriggerKind::JobMatchingSweep,
            jobs.len(),
            json!({ "jobs_found": jobs.len(), "delays_ms": delays_ms }),
        ))
    }

    async fn payment_run(&self, now: DateTime<Utc>) -> Result<TriggerReport, SchedulerError> {
        let due = self
            .store
            .subscriptions_due_by(now + Duration::hours(24))
            .await?;

        for subscription_id in &due {
            self.queues
                .enqueue_payment(*subscription_id, EnqueueOptions::default())
                .await?;
        }

        info!(subscriptions = due.len(), "queued subscription renewals");
        Ok(TriggerReport::new(
            TriggerKind::PaymentRun,
            due.len(),
            json!({ "subscriptions_due": due.len() }),
        ))
    }

    async fn compliance_sweep(&self, now: DateTime<Utc>) -> Result<TriggerReport, SchedulerError> {
        let workers = self
            .store
            .workers_with_expiring_certifications(now, now + Duration::days(30))
            .await?;

        for worker_id in &workers {
            self.queues
                .enqueue_compliance(
                    *worker_id,
                    ComplianceCheck::CertificationExpiry,
                    EnqueueOptions::default(),
                )
                .await?;
        }

        info!(workers = workers.len(), "queued certification expiry checks");
        Ok(TriggerReport::new(
            TriggerKind::ComplianceSweep,
            workers.len(),
            json!({ "workers_with_expiring_certifications": workers.len() }),
        ))
    }

    async fn weekly_report(&self, now: DateTime<Utc>) -> Result<TriggerReport, SchedulerError> {
        let metrics = self.store.activity_since(now - Duration::days(7)).await?;
        let admins = self.store.admin_users().await?;

        for admin in &admins {
            let message = NotificationMessage::WeeklyReport {
                period: "weekly".to_string(),
                metrics,
                report_date: now,
            };
            self.queues
                .enqueue_notification(admin.email.clone(), message, EnqueueOptions::default())
                .await?;
        }

        info!(admins = admins.len(), "queued weekly reports");
        Ok(TriggerReport::new(
            TriggerKind::WeeklyReport,
            admins.len(),
            json!({ "metrics": metrics }),
        ))
    }

    async fn database_cleanup(&self, now: DateTime<Utc>) -> Result<TriggerReport, SchedulerError> {
        let audit_logs = self
            .store
            .delete_audit_logs_before(now - Duration::days(90))
            .await?;
        let automation_logs = self
            .store
            .delete_automation_logs_before(now - Duration::days(30))
            .await?;
        let sessions = self.store.delete_expired_sessions(now).await?;
        let tasks = self.queues.clean_all().await?;

        info!(audit_logs, automation_logs, sessions, tasks, "database cleanup finished");
        Ok(TriggerReport::new(
            TriggerKind::DatabaseCleanup,
            0,
            json!({
                "audit_logs_deleted": audit_logs,
                "automation_logs_deleted": automation_logs,
                "sessions_deleted": sessions,
                "queue_tasks_cleaned": tasks,
            }),
        ))
    }

    async fn health_check(&self, now: DateTime<Utc>) -> Result<TriggerReport, SchedulerError> {
        let rss = health::resident_memory_bytes().await;
        let memory_high = rss.map(|bytes| bytes > self.settings.memory_threshold_bytes);
        if memory_high == Some(true) {
            warn!(
                rss_mb = rss.unwrap_or_default() / (1024 * 1024),
                threshold_mb = self.settings.memory_threshold_bytes / (1024 * 1024),
                "high memory usage"
            );
        }

        let stuck = self
            .store
            .count_running_logs_before(now - Duration::minutes(30))
            .await?;
        if stuck > 0 {
            warn!(stuck, "automation tasks stuck in RUNNING for over 30 minutes");
        }

        Ok(TriggerReport::new(
            TriggerKind::HealthCheck,
            0,
            json!({ "rss_bytes": rss, "memory_high": memory_high, "stuck_tasks": stuck }),
        ))
    }
}

/// Handle to the running scheduler loop.
#[derive(Debug)]
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.join.await {
            error!(error = %err, "scheduler terminated abnormally");
        }
    }
}
