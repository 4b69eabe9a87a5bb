use async_trait::async_trait;
use serde_json::{Value as JsonValue, json};
use tracing::info;

use rigger_core::SubscriptionId;
use rigger_marketplace::AutomationLogType;

use crate::queue::{PaymentTask, QueueName, QueuedTask, TaskPayload};

use super::{ProcessError, Processor, ProcessorContext, wrong_payload};

/// Records a renewal attempt for a subscription. Charging is not wired to a
/// payment provider.
pub struct PaymentProcessor {
    ctx: ProcessorContext,
}

impl PaymentProcessor {
    pub fn new(ctx: ProcessorContext) -> Self {
        Self { ctx }
    }

    async fn charge(&self, subscription_id: SubscriptionId) -> Result<JsonValue, ProcessError> {
        let subscription = self
            .ctx
            .store
            .subscription(subscription_id)
            .await?
            .ok_or_else(|| ProcessError::not_found("subscription", subscription_id))?;

        info!(
            subscription_id = %subscription.id,
            company_id = %subscription.company_id,
            period_end = %subscription.current_period_end,
            "processing subscription renewal"
        );

        Ok(json!({
            "company_id": subscription.company_id,
            "subscription_status": subscription.status,
            "current_period_end": subscription.current_period_end,
        }))
    }
}

#[async_trait]
impl Processor for PaymentProcessor {
    fn queue(&self) -> QueueName {
        QueueName::Payments
    }

    async fn process(&self, task: &QueuedTask) -> Result<(), ProcessError> {
        self.ctx
            .record_outcome(AutomationLogType::PaymentProcessing, task, async {
                match &task.payload {
                    TaskPayload::Payment(PaymentTask { subscription_id }) => {
                        self.charge(*subscription_id).await
                    }
                    other => Err(wrong_payload(QueueName::Payments, other)),
                }
            })
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::testing::Harness;
    use chrono::Duration;
    use rigger_core::CompanyId;
    use rigger_marketplace::{LogStatus, Subscription, SubscriptionStatus};

    #[tokio::test]
    async fn renewal_is_logged() {
        let h = Harness::new();
        let subscription = Subscription {
            id: SubscriptionId::new(),
            company_id: CompanyId::new(),
            status: SubscriptionStatus::Active,
            current_period_end: h.now() + Duration::hours(6),
        };
        h.store.insert_subscription(subscription.clone());

        let processor = PaymentProcessor::new(h.ctx.clone());
        let task = h
            .claimed(TaskPayload::Payment(PaymentTask {
                subscription_id: subscription.id,
            }))
            .await;
        processor.process(&task).await.unwrap();

        let logs = h.store.logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, LogStatus::Success);
        assert_eq!(logs[0].data["subscription_id"], subscription.id.to_string());
        assert_eq!(logs[0].data["subscription_status"], "ACTIVE");
    }

    #[tokio::test]
    async fn missing_subscription_fails() {
        let h = Harness::new();
        let processor = PaymentProcessor::new(h.ctx.clone());
        let task = h
            .claimed(TaskPayload::Payment(PaymentTask {
                subscription_id: SubscriptionId::new(),
            }))
            .await;

        let err = processor.process(&task).await.unwrap_err();
        assert!(matches!(err, ProcessError::NotFound { entity: "subscription", .. }));
        assert_eq!(h.store.logs()[0].status, LogStatus::Failed);
    }
}
