//! Persistence seam between the automation engine and the marketplace database.
//!
//! The engine only reads marketplace data (postings, workers, certifications,
//! subscriptions, admins) and writes the two tables it owns: match records and
//! automation logs. Housekeeping deletes are the only other writes.

pub mod in_memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use rigger_core::{JobPostingId, SubscriptionId, WorkerProfileId};
use rigger_marketplace::{
    ActivityMetrics, AdminUser, AutomationLog, JobPosting, MatchRecord, Subscription,
    WorkerProfile,
};

pub use in_memory::InMemoryMarketplaceStore;
pub use postgres::PostgresMarketplaceStore;

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("database error in {operation}: {message}")]
    Database {
        operation: &'static str,
        message: String,
    },
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("invalid row in {operation}: {message}")]
    Decode {
        operation: &'static str,
        message: String,
    },
}

impl StoreError {
    pub fn database(operation: &'static str, message: impl Into<String>) -> Self {
        StoreError::Database {
            operation,
            message: message.into(),
        }
    }

    pub fn decode(operation: &'static str, message: impl Into<String>) -> Self {
        StoreError::Decode {
            operation,
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait MarketplaceStore: Send + Sync {
    /// Cheap connectivity check for health reporting.
    async fn ping(&self) -> Result<(), StoreError>;

    async fn job_posting(&self, id: JobPostingId) -> Result<Option<JobPosting>, StoreError>;

    /// Published postings whose `published_at >= since`.
    async fn jobs_published_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<JobPostingId>, StoreError>;

    /// Workers whose availability is AVAILABLE.
    async fn available_workers(&self) -> Result<Vec<WorkerProfile>, StoreError>;

    async fn worker(&self, id: WorkerProfileId) -> Result<Option<WorkerProfile>, StoreError>;

    /// Distinct workers holding an active certification expiring in `[from, until]`.
    async fn workers_with_expiring_certifications(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<WorkerProfileId>, StoreError>;

    async fn subscription(&self, id: SubscriptionId) -> Result<Option<Subscription>, StoreError>;

    /// Active subscriptions whose period ends on or before `deadline`.
    async fn subscriptions_due_by(
        &self,
        deadline: DateTime<Utc>,
    ) -> Result<Vec<SubscriptionId>, StoreError>;

    async fn admin_users(&self) -> Result<Vec<AdminUser>, StoreError>;

    /// Counts of rows created at or after `since`.
    async fn activity_since(&self, since: DateTime<Utc>) -> Result<ActivityMetrics, StoreError>;

    /// Insert matches, skipping pairs that already exist. Returns how many were new.
    async fn insert_matches(&self, matches: &[MatchRecord]) -> Result<u64, StoreError>;

    async fn append_log(&self, log: &AutomationLog) -> Result<(), StoreError>;

    /// Logs still RUNNING that were created before `before`.
    async fn count_running_logs_before(&self, before: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn delete_audit_logs_before(&self, before: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn delete_automation_logs_before(
        &self,
        before: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}
