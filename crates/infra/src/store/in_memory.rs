//! In-memory marketplace store for tests/dev.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use rigger_core::{JobPostingId, SubscriptionId, WorkerProfileId};
use rigger_marketplace::{
    ActivityMetrics, AdminUser, AutomationLog, JobPosting, JobStatus, LogStatus, MatchRecord,
    Subscription, WorkerProfile,
};

use super::{MarketplaceStore, StoreError};

#[derive(Debug, Default)]
struct State {
    jobs: HashMap<JobPostingId, JobPosting>,
    workers: HashMap<WorkerProfileId, WorkerProfile>,
    subscriptions: HashMap<SubscriptionId, Subscription>,
    admins: Vec<AdminUser>,
    matches: HashMap<(JobPostingId, WorkerProfileId), MatchRecord>,
    logs: Vec<AutomationLog>,
    /// `created_at` of each audit row.
    audit_logs: Vec<DateTime<Utc>>,
    /// `expires_at` of each session.
    sessions: Vec<DateTime<Utc>>,
    applications: Vec<DateTime<Utc>>,
    user_signups: Vec<DateTime<Utc>>,
    failing: HashSet<&'static str>,
}

/// Marketplace store held entirely in memory.
///
/// Seed it with the `insert_*` / `record_*` helpers. `fail_operation` makes a
/// named trait method return [`StoreError::Unavailable`], for exercising error
/// paths.
#[derive(Debug, Default)]
pub struct InMemoryMarketplaceStore {
    state: RwLock<State>,
}

impl InMemoryMarketplaceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn check(&self, operation: &'static str) -> Result<(), StoreError> {
        if self.read().failing.contains(operation) {
            return Err(StoreError::Unavailable(format!(
                "{operation} is failing"
            )));
        }
        Ok(())
    }

    pub fn insert_job(&self, job: JobPosting) {
        self.write().jobs.insert(job.id, job);
    }

    pub fn insert_worker(&self, worker: WorkerProfile) {
        self.write().workers.insert(worker.id, worker);
    }

    pub fn insert_subscription(&self, subscription: Subscription) {
        self.write()
            .subscriptions
            .insert(subscription.id, subscription);
    }

    pub fn insert_admin(&self, admin: AdminUser) {
        self.write().admins.push(admin);
    }

    pub fn record_audit_entry(&self, created_at: DateTime<Utc>) {
        self.write().audit_logs.push(created_at);
    }

    pub fn record_session(&self, expires_at: DateTime<Utc>) {
        self.write().sessions.push(expires_at);
    }

    pub fn record_application(&self, created_at: DateTime<Utc>) {
        self.write().applications.push(created_at);
    }

    pub fn record_user_signup(&self, created_at: DateTime<Utc>) {
        self.write().user_signups.push(created_at);
    }

    /// Make the named operation (e.g. `"available_workers"`) fail until cleared.
    pub fn fail_operation(&self, operation: &'static str) {
        self.write().failing.insert(operation);
    }

    pub fn clear_failures(&self) {
        self.write().failing.clear();
    }

    pub fn matches(&self) -> Vec<MatchRecord> {
        let mut matches: Vec<_> = self.read().matches.values().cloned().collect();
        matches.sort_by_key(|m| (m.created_at, m.id));
        matches
    }

    pub fn logs(&self) -> Vec<AutomationLog> {
        self.read().logs.clone()
    }

    pub fn audit_entries(&self) -> usize {
        self.read().audit_logs.len()
    }

    pub fn sessions(&self) -> usize {
        self.read().sessions.len()
    }
}

#[async_trait]
impl MarketplaceStore for InMemoryMarketplaceStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.check("ping")
    }

    async fn job_posting(&self, id: JobPostingId) -> Result<Option<JobPosting>, StoreError> {
        self.check("job_posting")?;
        Ok(self.read().jobs.get(&id).cloned())
    }

    async fn jobs_published_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<JobPostingId>, StoreError> {
        self.check("jobs_published_since")?;
        let state = self.read();
        let mut jobs: Vec<_> = state
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Published)
            .filter(|j| j.published_at.is_some_and(|p| p >= since))
            .collect();
        jobs.sort_by_key(|j| (j.published_at, j.id));
        Ok(jobs.into_iter().map(|j| j.id).collect())
    }

    async fn available_workers(&self) -> Result<Vec<WorkerProfile>, StoreError> {
        self.check("available_workers")?;
        let state = self.read();
        let mut workers: Vec<_> = state
            .workers
            .values()
            .filter(|w| w.is_available())
            .cloned()
            .collect();
        workers.sort_by_key(|w| w.id);
        Ok(workers)
    }

    async fn worker(&self, id: WorkerProfileId) -> Result<Option<WorkerProfile>, StoreError> {
        self.check("worker")?;
        Ok(self.read().workers.get(&id).cloned())
    }

    async fn workers_with_expiring_certifications(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<WorkerProfileId>, StoreError> {
        self.check("workers_with_expiring_certifications")?;
        let state = self.read();
        let ids: BTreeSet<_> = state
            .workers
            .values()
            .filter(|w| w.certifications.iter().any(|c| c.expires_within(from, until)))
            .map(|w| w.id)
            .collect();
        Ok(ids.into_iter().collect())
    }

    async fn subscription(&self, id: SubscriptionId) -> Result<Option<Subscription>, StoreError> {
        self.check("subscription")?;
        Ok(self.read().subscriptions.get(&id).cloned())
    }

    async fn subscriptions_due_by(
        &self,
        deadline: DateTime<Utc>,
    ) -> Result<Vec<SubscriptionId>, StoreError> {
        self.check("subscriptions_due_by")?;
        let state = self.read();
        let mut due: Vec<_> = state
            .subscriptions
            .values()
            .filter(|s| s.is_due_by(deadline))
            .map(|s| s.id)
            .collect();
        due.sort();
        Ok(due)
    }

    async fn admin_users(&self) -> Result<Vec<AdminUser>, StoreError> {
        self.check("admin_users")?;
        Ok(self.read().admins.clone())
    }

    async fn activity_since(&self, since: DateTime<Utc>) -> Result<ActivityMetrics, StoreError> {
        self.check("activity_since")?;
        let state = self.read();
        let count = |times: &[DateTime<Utc>]| times.iter().filter(|t| **t >= since).count() as u64;
        Ok(ActivityMetrics {
            new_jobs: state.jobs.values().filter(|j| j.created_at >= since).count() as u64,
            new_applications: count(&state.applications),
            new_users: count(&state.user_signups),
            matches_generated: state
                .matches
                .values()
                .filter(|m| m.created_at >= since)
                .count() as u64,
        })
    }

    async fn insert_matches(&self, matches: &[MatchRecord]) -> Result<u64, StoreError> {
        self.check("insert_matches")?;
        let mut state = self.write();
        let mut inserted = 0;
        for record in matches {
            if let std::collections::hash_map::Entry::Vacant(slot) = state.matches.entry(record.pair())
            {
                slot.insert(record.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn append_log(&self, log: &AutomationLog) -> Result<(), StoreError> {
        self.check("append_log")?;
        self.write().logs.push(log.clone());
        Ok(())
    }

    async fn count_running_logs_before(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        self.check("count_running_logs_before")?;
        let state = self.read();
        Ok(state
            .logs
            .iter()
            .filter(|l| l.status == LogStatus::Running && l.created_at < before)
            .count() as u64)
    }

    async fn delete_audit_logs_before(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        self.check("delete_audit_logs_before")?;
        let mut state = self.write();
        let count = state.audit_logs.len();
        state.audit_logs.retain(|created| *created >= before);
        Ok((count - state.audit_logs.len()) as u64)
    }

    async fn delete_automation_logs_before(
        &self,
        before: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        self.check("delete_automation_logs_before")?;
        let mut state = self.write();
        let count = state.logs.len();
        state.logs.retain(|log| log.created_at >= before);
        Ok((count - state.logs.len()) as u64)
    }

    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        self.check("delete_expired_sessions")?;
        let mut state = self.write();
        let count = state.sessions.len();
        state.sessions.retain(|expires| *expires > now);
        Ok((count - state.sessions.len()) as u64)
    }
}
