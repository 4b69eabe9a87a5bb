use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value as JsonValue, json};
use tracing::info;

use rigger_marketplace::AutomationLogType;

use crate::queue::{NotificationMessage, NotificationTask, QueueName, QueuedTask, TaskPayload};

use super::{ProcessError, Processor, ProcessorContext, wrong_payload};

/// Delivery channel for notifications (email, push, ...).
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn deliver(
        &self,
        recipient: &str,
        message: &NotificationMessage,
    ) -> Result<(), ProcessError>;
}

/// Records deliveries in the tracing log; no external provider is wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(
        &self,
        recipient: &str,
        message: &NotificationMessage,
    ) -> Result<(), ProcessError> {
        info!(recipient, kind = message.kind(), "notification delivered");
        Ok(())
    }
}

pub struct NotificationProcessor {
    ctx: ProcessorContext,
    notifier: Arc<dyn Notifier>,
}

impl NotificationProcessor {
    pub fn new(ctx: ProcessorContext, notifier: Arc<dyn Notifier>) -> Self {
        Self { ctx, notifier }
    }

    async fn send(&self, task: &NotificationTask) -> Result<JsonValue, ProcessError> {
        info!(recipient = %task.recipient, kind = task.message.kind(), "sending notification");
        self.notifier.deliver(&task.recipient, &task.message).await?;
        Ok(json!({ "delivered": true }))
    }
}

#[async_trait]
impl Processor for NotificationProcessor {
    fn queue(&self) -> QueueName {
        QueueName::Notifications
    }

    async fn process(&self, task: &QueuedTask) -> Result<(), ProcessError> {
        self.ctx
            .record_outcome(AutomationLogType::NotificationSent, task, async {
                match &task.payload {
                    TaskPayload::Notification(notification) => self.send(notification).await,
                    other => Err(wrong_payload(QueueName::Notifications, other)),
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
    use crate::queue::PaymentTask;
    use rigger_core::SubscriptionId;
    use rigger_marketplace::LogStatus;

    struct Bouncing;

    #[async_trait]
    impl Notifier for Bouncing {
        async fn deliver(&self, recipient: &str, _: &NotificationMessage) -> Result<(), ProcessError> {
            Err(ProcessError::Integration(format!("mailbox {recipient} rejected message")))
        }
    }

    fn custom(recipient: &str) -> TaskPayload {
        TaskPayload::Notification(NotificationTask {
            recipient: recipient.into(),
            message: NotificationMessage::Custom {
                kind: "welcome".into(),
                data: json!({ "name": "Sam" }),
            },
        })
    }

    #[tokio::test]
    async fn delivery_is_logged_with_payload() {
        let h = Harness::new();
        let processor = NotificationProcessor::new(h.ctx.clone(), Arc::new(LogNotifier));

        let task = h.claimed(custom("sam@example.com")).await;
        processor.process(&task).await.unwrap();

        let logs = h.store.logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, LogStatus::Success);
        assert_eq!(logs[0].data["recipient"], "sam@example.com");
        assert_eq!(logs[0].data["message"]["type"], "custom");
        assert_eq!(logs[0].data["message"]["kind"], "welcome");
        assert_eq!(logs[0].data["delivered"], true);
    }

    #[tokio::test]
    async fn delivery_failure_is_logged_and_returned() {
        let h = Harness::new();
        let processor = NotificationProcessor::new(h.ctx.clone(), Arc::new(Bouncing));

        let task = h.claimed(custom("bad@example.com")).await;
        let err = processor.process(&task).await.unwrap_err();

        assert!(matches!(err, ProcessError::Integration(_)));
        let logs = h.store.logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, LogStatus::Failed);
        assert!(logs[0].error.as_deref().unwrap().contains("bad@example.com"));
    }

    #[tokio::test]
    async fn foreign_payload_is_rejected() {
        let h = Harness::new();
        let processor = NotificationProcessor::new(h.ctx.clone(), Arc::new(LogNotifier));

        let task = h
            .claimed(TaskPayload::Payment(PaymentTask {
                subscription_id: SubscriptionId::new(),
            }))
            .await;
        let err = processor.process(&task).await.unwrap_err();

        assert!(matches!(err, ProcessError::InvalidPayload { .. }));
        assert_eq!(h.store.logs()[0].status, LogStatus::Failed);
    }
}
