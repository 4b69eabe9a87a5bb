use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use rigger_core::JobPostingId;
use rigger_marketplace::{AutomationLogType, JobPosting, MatchRecord};

use crate::queue::{
    EnqueueOptions, MatchingTask, NotificationMessage, QueueName, QueuedTask, TaskPayload,
};

use super::{Outcome, ProcessError, Processor, ProcessorContext, wrong_payload};

/// Result of matching one posting against the available workers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchingSummary {
    pub job_id: JobPostingId,
    pub candidates: usize,
    pub matches_found: usize,
    /// New rows; pairs matched by an earlier run are not counted.
    pub matches_inserted: u64,
    pub notifications_enqueued: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<String>,
}

impl MatchingSummary {
    fn skipped(job_id: JobPostingId, reason: String) -> Self {
        Self {
            job_id,
            candidates: 0,
            matches_found: 0,
            matches_inserted: 0,
            notifications_enqueued: 0,
            skipped: Some(reason),
        }
    }
}

impl Outcome for MatchingSummary {
    fn details(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}

/// Scores every available worker against a posting and stores the matches.
pub struct MatchingProcessor {
    ctx: ProcessorContext,
}

impl MatchingProcessor {
    pub fn new(ctx: ProcessorContext) -> Self {
        Self { ctx }
    }

    /// Match one claimed task, writing its outcome log.
    pub async fn process_matching(&self, task: &QueuedTask) -> Result<MatchingSummary, ProcessError> {
        self.ctx
            .record_outcome(AutomationLogType::JobMatching, task, async {
                match &task.payload {
                    TaskPayload::Matching(MatchingTask { job_id }) => self.match_job(*job_id).await,
                    other => Err(wrong_payload(QueueName::Matching, other)),
                }
            })
            .await
    }

    async fn match_job(&self, job_id: JobPostingId) -> Result<MatchingSummary, ProcessError> {
        let now = self.ctx.clock.now();
        info!(job_id = %job_id, "matching workers to job");

        let job = self
            .ctx
            .store
            .job_posting(job_id)
            .await?
            .ok_or_else(|| ProcessError::not_found("job posting", job_id))?;

        if !job.is_matchable(now) {
            let reason = format!("job is {} or past its deadline", job.status);
            debug!(job_id = %job_id, reason = %reason, "skipping matching");
            return Ok(MatchingSummary::skipped(job_id, reason));
        }

        let workers = self.ctx.store.available_workers().await?;
        let mut matches = Vec::new();
        let mut notified = 0;

        for worker in workers.iter().filter(|w| w.is_available()) {
            let result = rigger_matching::score(&job, worker, now);
            if !result.is_match() {
                continue;
            }

            let score = result.score;
            matches.push(MatchRecord::new(job.id, worker.id, result.into(), now));
            if self.notify(&job, &worker.email, score).await {
                notified += 1;
            }
        }

        let inserted = if matches.is_empty() {
            0
        } else {
            self.ctx.store.insert_matches(&matches).await?
        };

        info!(
            job_id = %job_id,
            candidates = workers.len(),
            matches = matches.len(),
            inserted,
            "matching finished"
        );

        Ok(MatchingSummary {
            job_id,
            candidates: workers.len(),
            matches_found: matches.len(),
            matches_inserted: inserted,
            notifications_enqueued: notified,
            skipped: None,
        })
    }

    /// Best effort: a failed enqueue is logged and does not fail the match.
    async fn notify(&self, job: &JobPosting, recipient: &str, score: u8) -> bool {
        let message = NotificationMessage::JobMatch {
            job_title: job.title.clone(),
            company_name: job.company_name.clone(),
            match_score: score,
            pay_rate: job.pay_rate,
            location: job.location(),
        };
        match self
            .ctx
            .queues
            .enqueue_notification(recipient, message, EnqueueOptions::default())
            .await
        {
            Ok(_) => true,
            Err(err) => {
                warn!(job_id = %job.id, recipient, error = %err, "failed to enqueue match notification");
                false
            }
        }
    }
}

#[async_trait]
impl Processor for MatchingProcessor {
    fn queue(&self) -> QueueName {
        QueueName::Matching
    }

    async fn process(&self, task: &QueuedTask) -> Result<(), ProcessError> {
        self.process_matching(task).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::testing::Harness;
    use crate::queue::{
        FailureOutcome, InMemoryTaskStore, QueueCounts, QueueError, QueueService, TaskId,
        TaskStore,
    };
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, Utc};
    use rigger_core::{CompanyId, SkillId, UserId, WorkerProfileId};
    use rigger_marketplace::{
        Availability, CertificationStatus, JobStatus, LogStatus, SkillRequirement,
        WorkerCertification, WorkerProfile, WorkerSkill,
    };
    use std::sync::Arc;

    fn job(skill: SkillId, status: JobStatus, now: DateTime<Utc>) -> JobPosting {
        JobPosting {
            id: JobPostingId::new(),
            company_id: CompanyId::new(),
            company_name: "Granite Builders".into(),
            title: "Framing Carpenter".into(),
            skills: vec![SkillRequirement::required(skill).with_min_experience(5)],
            city: "Austin".into(),
            state: "TX".into(),
            pay_rate: Some(38.5),
            status,
            created_at: now - Duration::days(1),
            published_at: Some(now - Duration::minutes(10)),
            application_deadline: None,
        }
    }

    fn strong_worker(skill: SkillId, availability: Availability, now: DateTime<Utc>) -> WorkerProfile {
        WorkerProfile {
            id: WorkerProfileId::new(),
            user_id: UserId::new(),
            email: format!("{}@example.com", WorkerProfileId::new()),
            city: Some("Austin".into()),
            state: Some("TX".into()),
            years_experience: 12,
            availability,
            skills: vec![WorkerSkill {
                skill_id: skill,
                name: "Framing".into(),
                proficiency: 9,
                years_experience: Some(12),
            }],
            certifications: vec![WorkerCertification {
                name: "OSHA 30".into(),
                status: CertificationStatus::Active,
                expires_at: Some(now + Duration::days(200)),
            }],
        }
    }

    fn weak_worker() -> WorkerProfile {
        WorkerProfile {
            id: WorkerProfileId::new(),
            user_id: UserId::new(),
            email: "weak@example.com".into(),
            city: Some("Boise".into()),
            state: Some("ID".into()),
            years_experience: 1,
            availability: Availability::Available,
            skills: vec![],
            certifications: vec![],
        }
    }

    #[tokio::test]
    async fn matches_are_stored_and_notified() {
        let h = Harness::new();
        let skill = SkillId::new();
        let job = job(skill, JobStatus::Published, h.now());
        let strong = strong_worker(skill, Availability::Available, h.now());
        let strong_id = strong.id;
        h.store.insert_job(job.clone());
        h.store.insert_worker(strong);
        h.store.insert_worker(weak_worker());

        let processor = MatchingProcessor::new(h.ctx.clone());
        let task = h.claimed(TaskPayload::Matching(MatchingTask { job_id: job.id })).await;
        let summary = processor.process_matching(&task).await.unwrap();

        assert_eq!(summary.candidates, 2);
        assert_eq!(summary.matches_found, 1);
        assert_eq!(summary.matches_inserted, 1);
        assert_eq!(summary.notifications_enqueued, 1);

        let matches = h.store.matches();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].worker_profile_id, strong_id);
        assert_eq!(matches[0].score, 100);

        let pending = h
            .ctx
            .queues
            .store()
            .list(QueueName::Notifications)
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        match &pending[0].payload {
            TaskPayload::Notification(n) => match &n.message {
                NotificationMessage::JobMatch {
                    match_score,
                    location,
                    ..
                } => {
                    assert_eq!(*match_score, 100);
                    assert_eq!(location, "Austin, TX");
                }
                other => panic!("unexpected message {other:?}"),
            },
            other => panic!("unexpected payload {other:?}"),
        }

        let logs = h.store.logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, LogStatus::Success);
        assert_eq!(logs[0].data["matches_found"], 1);
        assert!(logs[0].data.get("processing_time_ms").is_some());
    }

    #[tokio::test]
    async fn second_run_inserts_no_duplicates() {
        let h = Harness::new();
        let skill = SkillId::new();
        let job = job(skill, JobStatus::Published, h.now());
        h.store.insert_job(job.clone());
        h.store
            .insert_worker(strong_worker(skill, Availability::Available, h.now()));

        let processor = MatchingProcessor::new(h.ctx.clone());
        for expected in [1, 0] {
            let task = h.claimed(TaskPayload::Matching(MatchingTask { job_id: job.id })).await;
            let summary = processor.process_matching(&task).await.unwrap();
            assert_eq!(summary.matches_found, 1);
            assert_eq!(summary.matches_inserted, expected);
        }

        assert_eq!(h.store.matches().len(), 1);
        assert_eq!(h.store.logs().len(), 2);
    }

    #[tokio::test]
    async fn unavailable_workers_are_never_matched() {
        let h = Harness::new();
        let skill = SkillId::new();
        let job = job(skill, JobStatus::Published, h.now());
        h.store.insert_job(job.clone());
        for availability in [Availability::Busy, Availability::Inactive, Availability::Suspended] {
            h.store
                .insert_worker(strong_worker(skill, availability, h.now()));
        }

        let processor = MatchingProcessor::new(h.ctx.clone());
        let task = h.claimed(TaskPayload::Matching(MatchingTask { job_id: job.id })).await;
        let summary = processor.process_matching(&task).await.unwrap();

        assert_eq!(summary.candidates, 0);
        assert!(h.store.matches().is_empty());
        assert_eq!(h.store.logs()[0].status, LogStatus::Success);
    }

    #[tokio::test]
    async fn missing_job_fails_with_one_failed_log() {
        let h = Harness::new();
        let missing = JobPostingId::new();

        let processor = MatchingProcessor::new(h.ctx.clone());
        let task = h.claimed(TaskPayload::Matching(MatchingTask { job_id: missing })).await;
        let err = processor.process_matching(&task).await.unwrap_err();

        assert!(matches!(err, ProcessError::NotFound { entity: "job posting", .. }));
        let logs = h.store.logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, LogStatus::Failed);
        assert_eq!(logs[0].data["job_id"], missing.to_string());
        assert!(logs[0].error.as_deref().unwrap().contains(&missing.to_string()));
    }

    #[tokio::test]
    async fn unpublished_job_is_skipped() {
        let h = Harness::new();
        let skill = SkillId::new();
        let draft = job(skill, JobStatus::Draft, h.now());
        h.store.insert_job(draft.clone());
        h.store
            .insert_worker(strong_worker(skill, Availability::Available, h.now()));

        let processor = MatchingProcessor::new(h.ctx.clone());
        let task = h.claimed(TaskPayload::Matching(MatchingTask { job_id: draft.id })).await;
        let summary = processor.process_matching(&task).await.unwrap();

        assert!(summary.skipped.is_some());
        assert!(h.store.matches().is_empty());
        assert_eq!(h.store.logs()[0].status, LogStatus::Success);
    }

    #[tokio::test]
    async fn insert_failure_fails_the_task() {
        let h = Harness::new();
        let skill = SkillId::new();
        let job = job(skill, JobStatus::Published, h.now());
        h.store.insert_job(job.clone());
        h.store
            .insert_worker(strong_worker(skill, Availability::Available, h.now()));
        h.store.fail_operation("insert_matches");

        let processor = MatchingProcessor::new(h.ctx.clone());
        let task = h.claimed(TaskPayload::Matching(MatchingTask { job_id: job.id })).await;
        let err = processor.process_matching(&task).await.unwrap_err();

        assert!(matches!(err, ProcessError::Persistence(_)));
        assert_eq!(h.store.logs()[0].status, LogStatus::Failed);
    }

    /// Accepts matching tasks, rejects everything else.
    struct NotificationsDown(InMemoryTaskStore);

    #[async_trait]
    impl TaskStore for NotificationsDown {
        async fn enqueue(&self, task: QueuedTask) -> Result<TaskId, QueueError> {
            if task.queue == QueueName::Notifications {
                return Err(QueueError::Storage("notifications backend down".into()));
            }
            self.0.enqueue(task).await
        }
        async fn get(&self, id: TaskId) -> Result<Option<QueuedTask>, QueueError> {
            self.0.get(id).await
        }
        async fn claim_next(
            &self,
            queue: QueueName,
            now: DateTime<Utc>,
        ) -> Result<Option<QueuedTask>, QueueError> {
            self.0.claim_next(queue, now).await
        }
        async fn complete(
            &self,
            id: TaskId,
            attempt: u32,
            now: DateTime<Utc>,
        ) -> Result<bool, QueueError> {
            self.0.complete(id, attempt, now).await
        }
        async fn fail(
            &self,
            id: TaskId,
            attempt: u32,
            error: String,
            now: DateTime<Utc>,
        ) -> Result<Option<FailureOutcome>, QueueError> {
            self.0.fail(id, attempt, error, now).await
        }
        async fn reclaim_stalled(
            &self,
            queue: QueueName,
            started_before: DateTime<Utc>,
            now: DateTime<Utc>,
        ) -> Result<Vec<(QueuedTask, FailureOutcome)>, QueueError> {
            self.0.reclaim_stalled(queue, started_before, now).await
        }
        async fn clean(&self, queue: QueueName, older_than: DateTime<Utc>) -> Result<usize, QueueError> {
            self.0.clean(queue, older_than).await
        }
        async fn counts(
            &self,
            queue: QueueName,
            now: DateTime<Utc>,
        ) -> Result<QueueCounts, QueueError> {
            self.0.counts(queue, now).await
        }
        async fn failed(&self, queue: QueueName, limit: usize) -> Result<Vec<QueuedTask>, QueueError> {
            self.0.failed(queue, limit).await
        }
        async fn list(&self, queue: QueueName) -> Result<Vec<QueuedTask>, QueueError> {
            self.0.list(queue).await
        }
    }

    #[tokio::test]
    async fn notification_failures_do_not_undo_matches() {
        let mut h = Harness::new();
        h.ctx.queues = QueueService::new(
            Arc::new(NotificationsDown(InMemoryTaskStore::new())),
            h.clock.clone(),
        );
        let skill = SkillId::new();
        let job = job(skill, JobStatus::Published, h.now());
        h.store.insert_job(job.clone());
        h.store
            .insert_worker(strong_worker(skill, Availability::Available, h.now()));

        let processor = MatchingProcessor::new(h.ctx.clone());
        let task = h.claimed(TaskPayload::Matching(MatchingTask { job_id: job.id })).await;
        let summary = processor.process_matching(&task).await.unwrap();

        assert_eq!(summary.matches_inserted, 1);
        assert_eq!(summary.notifications_enqueued, 0);
        assert_eq!(h.store.matches().len(), 1);
        assert_eq!(h.store.logs()[0].status, LogStatus::Success);
    }
}
