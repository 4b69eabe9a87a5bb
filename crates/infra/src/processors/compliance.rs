use async_trait::async_trait;
use chrono::Duration;
use serde_json::{Value as JsonValue, json};
use tracing::{info, warn};

use rigger_marketplace::AutomationLogType;

use crate::queue::{ComplianceTask, QueueName, QueuedTask, TaskPayload};

use super::{ProcessError, Processor, ProcessorContext, wrong_payload};

/// Certifications expiring inside this window are flagged.
pub const EXPIRY_WINDOW_DAYS: i64 = 30;

pub struct ComplianceProcessor {
    ctx: ProcessorContext,
}

impl ComplianceProcessor {
    pub fn new(ctx: ProcessorContext) -> Self {
        Self { ctx }
    }

    async fn check(&self, task: &ComplianceTask) -> Result<JsonValue, ProcessError> {
        let worker = self
            .ctx
            .store
            .worker(task.worker_id)
            .await?
            .ok_or_else(|| ProcessError::not_found("worker profile", task.worker_id))?;

        let now = self.ctx.clock.now();
        let until = now + Duration::days(EXPIRY_WINDOW_DAYS);
        let expiring: Vec<&str> = worker
            .certifications
            .iter()
            .filter(|c| c.expires_within(now, until))
            .map(|c| c.name.as_str())
            .collect();

        if expiring.is_empty() {
            info!(worker_id = %worker.id, check = task.check_type.as_str(), "compliance check passed");
        } else {
            warn!(
                worker_id = %worker.id,
                check = task.check_type.as_str(),
                expiring = expiring.len(),
                "certifications expiring soon"
            );
        }

        Ok(json!({
            "active_certifications": worker.active_certifications(now),
            "expiring_certifications": expiring.len(),
            "expiring": expiring,
        }))
    }
}

#[async_trait]
impl Processor for ComplianceProcessor {
    fn queue(&self) -> QueueName {
        QueueName::Compliance
    }

    async fn process(&self, task: &QueuedTask) -> Result<(), ProcessError> {
        self.ctx
            .record_outcome(AutomationLogType::ComplianceCheck, task, async {
                match &task.payload {
                    TaskPayload::Compliance(check) => self.check(check).await,
                    other => Err(wrong_payload(QueueName::Compliance, other)),
                }
            })
            .await
            .map(|_| ())
    }
}
