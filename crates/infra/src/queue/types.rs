//! Task payloads, retry policy and the queued-task lifecycle.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use rigger_core::{JobPostingId, SubscriptionId, WorkerProfileId};
use rigger_marketplace::ActivityMetrics;

/// Unique task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The four named queues. Each is consumed by exactly one processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueName {
    Matching,
    Notifications,
    Payments,
    Compliance,
}

impl QueueName {
    pub const ALL: [QueueName; 4] = [
        QueueName::Matching,
        QueueName::Notifications,
        QueueName::Payments,
        QueueName::Compliance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Matching => "matching",
            QueueName::Notifications => "notifications",
            QueueName::Payments => "payments",
            QueueName::Compliance => "compliance",
        }
    }

    /// Fixed task name used for every task on this queue.
    pub fn task_name(&self) -> &'static str {
        match self {
            QueueName::Matching => "match-workers-to-job",
            QueueName::Notifications => "send-notification",
            QueueName::Payments => "process-payment",
            QueueName::Compliance => "check-compliance",
        }
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchingTask {
    pub job_id: JobPostingId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationTask {
    pub recipient: String,
    pub message: NotificationMessage,
}

/// What a notification says. The variant name doubles as the notification type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum NotificationMessage {
    JobMatch {
        job_title: String,
        company_name: String,
        match_score: u8,
        pay_rate: Option<f64>,
        location: String,
    },
    WeeklyReport {
        period: String,
        metrics: ActivityMetrics,
        report_date: DateTime<Utc>,
    },
    /// Free-form notification submitted through the HTTP surface.
    Custom { kind: String, data: JsonValue },
}

impl NotificationMessage {
    pub fn kind(&self) -> &str {
        match self {
            NotificationMessage::JobMatch { .. } => "job-match",
            NotificationMessage::WeeklyReport { .. } => "weekly-report",
            NotificationMessage::Custom { kind, .. } => kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentTask {
    pub subscription_id: SubscriptionId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComplianceCheck {
    /// Scheduled sweep: certifications about to lapse.
    CertificationExpiry,
    /// On-demand review of a worker's certifications.
    Certification,
}

impl ComplianceCheck {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComplianceCheck::CertificationExpiry => "certification-expiry",
            ComplianceCheck::Certification => "certification",
        }
    }
}

impl std::str::FromStr for ComplianceCheck {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "certification-expiry" => Ok(ComplianceCheck::CertificationExpiry),
            "certification" => Ok(ComplianceCheck::Certification),
            other => Err(format!("unknown compliance check type: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceTask {
    pub worker_id: WorkerProfileId,
    pub check_type: ComplianceCheck,
}

/// Closed union of everything that can sit on a queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task", content = "payload", rename_all = "snake_case")]
pub enum TaskPayload {
    Matching(MatchingTask),
    Notification(NotificationTask),
    Payment(PaymentTask),
    Compliance(ComplianceTask),
}

impl TaskPayload {
    /// The queue this payload belongs on.
    pub fn queue(&self) -> QueueName {
        match self {
            TaskPayload::Matching(_) => QueueName::Matching,
            TaskPayload::Notification(_) => QueueName::Notifications,
            TaskPayload::Payment(_) => QueueName::Payments,
            TaskPayload::Compliance(_) => QueueName::Compliance,
        }
    }

    /// Flat JSON view of the payload, used as the outcome-log snapshot.
    pub fn snapshot(&self) -> JsonValue {
        let value = match self {
            TaskPayload::Matching(t) => serde_json::to_value(t),
            TaskPayload::Notification(t) => serde_json::to_value(t),
            TaskPayload::Payment(t) => serde_json::to_value(t),
            TaskPayload::Compliance(t) => serde_json::to_value(t),
        };
        value.unwrap_or(JsonValue::Null)
    }
}

/// How long to wait before re-running a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "base", rename_all = "snake_case")]
pub enum Backoff {
    /// Retry immediately.
    None,
    Fixed(Duration),
    /// `base * 2^(attempt - 1)`
    Exponential(Duration),
}

/// Retry policy for one queue (or one task, when overridden at enqueue).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Delay after the given attempt (1-indexed) failed.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        match self.backoff {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed(base) => base,
            Backoff::Exponential(base) => {
                let factor = 2_u32.saturating_pow(attempt - 1);
                base.saturating_mul(factor)
            }
        }
    }

    /// Whether another attempt is allowed after `attempts_made`.
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskStatus {
    /// Ready now, or delayed until `available_at`.
    Waiting,
    Active,
    Completed,
    /// Attempts exhausted.
    Failed { error: String },
}

impl TaskStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed { .. })
    }
}

/// Record of one execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub error: Option<String>,
}

/// What happened to a task after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    RetryAt(DateTime<Utc>),
    Exhausted,
}

/// A task sitting on (or recently taken off) a queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedTask {
    pub id: TaskId,
    pub queue: QueueName,
    pub payload: TaskPayload,
    pub status: TaskStatus,
    pub retry: RetryPolicy,
    /// Attempts started so far.
    pub attempts_made: u32,
    pub keep_completed: usize,
    pub keep_failed: usize,
    pub created_at: DateTime<Utc>,
    /// Earliest time the task may be claimed.
    pub available_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub history: Vec<AttemptRecord>,
}

impl QueuedTask {
    pub fn task_name(&self) -> &'static str {
        self.queue.task_name()
    }

    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Waiting && self.available_at <= now
    }

    pub fn is_delayed(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Waiting && self.available_at > now
    }

    pub fn mark_active(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Active;
        self.attempts_made += 1;
        self.started_at = Some(now);
    }

    pub fn mark_completed(&mut self, now: DateTime<Utc>) {
        self.push_history(None, now);
        self.status = TaskStatus::Completed;
        self.finished_at = Some(now);
    }

    /// Record a failed attempt and either reschedule the task or give up on it.
    pub fn mark_failed(&mut self, error: String, now: DateTime<Utc>) -> FailureOutcome {
        self.push_history(Some(error.clone()), now);

        if self.retry.should_retry(self.attempts_made) {
            let delay = self.retry.delay_for_attempt(self.attempts_made);
            self.available_at = now + chrono::Duration::from_std(delay).unwrap_or_default();
            self.status = TaskStatus::Waiting;
            self.started_at = None;
            FailureOutcome::RetryAt(self.available_at)
        } else {
            self.status = TaskStatus::Failed { error };
            self.finished_at = Some(now);
            FailureOutcome::Exhausted
        }
    }

    fn push_history(&mut self, error: Option<String>, now: DateTime<Utc>) {
        self.history.push(AttemptRecord {
            attempt: self.attempts_made,
            started_at: self.started_at.unwrap_or(now),
            finished_at: now,
            error,
        });
    }
}

/// Returned by every enqueue call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskHandle {
    pub id: TaskId,
    pub queue: QueueName,
    pub task_name: String,
    pub available_at: DateTime<Utc>,
}

/// Per-queue counts for health reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub waiting: usize,
    pub delayed: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(retry: RetryPolicy, now: DateTime<Utc>) -> QueuedTask {
        QueuedTask {
            id: TaskId::new(),
            queue: QueueName::Payments,
            payload: TaskPayload::Payment(PaymentTask {
                subscription_id: SubscriptionId::new(),
            }),
            status: TaskStatus::Waiting,
            retry,
            attempts_made: 0,
            keep_completed: 10,
            keep_failed: 10,
            created_at: now,
            available_at: now,
            started_at: None,
            finished_at: None,
            history: Vec::new(),
        }
    }

    #[test]
    fn exponential_backoff_doubles_from_base() {
        let policy = RetryPolicy::new(5, Backoff::Exponential(Duration::from_secs(1)));

        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(8));
    }

    #[test]
    fn fixed_and_no_backoff() {
        let fixed = RetryPolicy::new(3, Backoff::Fixed(Duration::from_secs(5)));
        assert_eq!(fixed.delay_for_attempt(1), Duration::from_secs(5));
        assert_eq!(fixed.delay_for_attempt(3), Duration::from_secs(5));

        let none = RetryPolicy::new(2, Backoff::None);
        assert_eq!(none.delay_for_attempt(1), Duration::ZERO);
    }

    #[test]
    fn should_retry_counts_the_first_attempt() {
        let policy = RetryPolicy::new(3, Backoff::None);

        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn failed_attempt_reschedules_until_exhausted() {
        let now = Utc::now();
        let mut task = task(
            RetryPolicy::new(2, Backoff::Fixed(Duration::from_secs(5))),
            now,
        );

        task.mark_active(now);
        let outcome = task.mark_failed("boom".into(), now);
        assert_eq!(outcome, FailureOutcome::RetryAt(now + chrono::Duration::seconds(5)));
        assert_eq!(task.status, TaskStatus::Waiting);
        assert!(task.is_delayed(now));
        assert!(task.is_ready(now + chrono::Duration::seconds(5)));

        task.mark_active(now);
        let outcome = task.mark_failed("boom again".into(), now);
        assert_eq!(outcome, FailureOutcome::Exhausted);
        assert_eq!(
            task.status,
            TaskStatus::Failed {
                error: "boom again".into()
            }
        );
        assert_eq!(task.history.len(), 2);
        assert_eq!(task.history[1].attempt, 2);
    }

    #[test]
    fn payload_routes_to_its_queue() {
        let payload = TaskPayload::Compliance(ComplianceTask {
            worker_id: WorkerProfileId::new(),
            check_type: ComplianceCheck::CertificationExpiry,
        });

        assert_eq!(payload.queue(), QueueName::Compliance);
        assert_eq!(payload.queue().task_name(), "check-compliance");
        assert_eq!(payload.snapshot()["check_type"], "certification-expiry");
    }

    #[test]
    fn notification_kind_follows_variant() {
        let custom = NotificationMessage::Custom {
            kind: "welcome".into(),
            data: JsonValue::Null,
        };
        assert_eq!(custom.kind(), "welcome");

        let weekly = NotificationMessage::WeeklyReport {
            period: "weekly".into(),
            metrics: ActivityMetrics::default(),
            report_date: Utc::now(),
        };
        assert_eq!(weekly.kind(), "weekly-report");
        assert_eq!(serde_json::to_value(&weekly).unwrap()["type"], "weekly-report");
    }
}
