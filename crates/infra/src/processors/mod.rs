//! Queue processors: one per queue.
//!
//! Every invocation writes exactly one automation log row, SUCCESS or FAILED,
//! and a failure is returned to the worker pool so the queue's retry policy
//! counts the attempt.

pub mod compliance;
pub mod matching;
pub mod notification;
pub mod payment;

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue};
use tracing::{error, warn};

use rigger_marketplace::{AutomationLog, AutomationLogType};

use crate::clock::Clock;
use crate::queue::{QueueError, QueueName, QueueService, QueuedTask, TaskPayload};
use crate::store::{MarketplaceStore, StoreError};

pub use compliance::ComplianceProcessor;
pub use matching::{MatchingProcessor, MatchingSummary};
pub use notification::{LogNotifier, NotificationProcessor, Notifier};
pub use payment::PaymentProcessor;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProcessError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error(transparent)]
    Persistence(#[from] StoreError),
    #[error("integration failed: {0}")]
    Integration(String),
    #[error("{processor} cannot handle {task} tasks")]
    InvalidPayload {
        processor: QueueName,
        task: QueueName,
    },
}

impl ProcessError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        ProcessError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

impl From<QueueError> for ProcessError {
    fn from(err: QueueError) -> Self {
        ProcessError::Integration(err.to_string())
    }
}

/// Consumer bound to exactly one queue.
#[async_trait]
pub trait Processor: Send + Sync + 'static {
    fn queue(&self) -> QueueName;

    async fn process(&self, task: &QueuedTask) -> Result<(), ProcessError>;
}

/// Services every processor needs.
#[derive(Clone)]
pub struct ProcessorContext {
    pub store: Arc<dyn MarketplaceStore>,
    pub queues: QueueService,
    pub clock: Arc<dyn Clock>,
}

impl ProcessorContext {
    pub fn new(
        store: Arc<dyn MarketplaceStore>,
        queues: QueueService,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            queues,
            clock,
        }
    }

    /// Run `body` and write its single outcome log.
    ///
    /// On success the log data is the payload snapshot merged with the details
    /// returned by `body`, plus `processing_time_ms` (time since the task was
    /// enqueued). On failure the snapshot is logged with the error message and
    /// the error is returned unchanged.
    pub(crate) async fn record_outcome<T, F>(
        &self,
        log_type: AutomationLogType,
        task: &QueuedTask,
        body: F,
    ) -> Result<T, ProcessError>
    where
        T: Outcome,
        F: Future<Output = Result<T, ProcessError>>,
    {
        let snapshot = task.payload.snapshot();

        match body.await {
            Ok(outcome) => {
                let now = self.clock.now();
                let elapsed = (now - task.created_at).num_milliseconds().max(0);
                let mut data = merge(snapshot, outcome.details());
                if let JsonValue::Object(fields) = &mut data {
                    fields.insert("processing_time_ms".into(), elapsed.into());
                }

                self.store
                    .append_log(&AutomationLog::success(log_type, data, now))
                    .await?;
                Ok(outcome)
            }
            Err(err) => {
                error!(log_type = %log_type, task_id = %task.id, error = %err, "processor failed");
                let log = AutomationLog::failed(log_type, snapshot, err.to_string(), self.clock.now());
                if let Err(log_err) = self.store.append_log(&log).await {
                    warn!(task_id = %task.id, error = %log_err, "failed to record failure log");
                }
                Err(err)
            }
        }
    }
}

/// Details a processor contributes to its success log.
pub trait Outcome {
    fn details(&self) -> JsonValue;
}

impl Outcome for JsonValue {
    fn details(&self) -> JsonValue {
        self.clone()
    }
}

fn merge(snapshot: JsonValue, details: JsonValue) -> JsonValue {
    let mut fields = match snapshot {
        JsonValue::Object(fields) => fields,
        JsonValue::Null => Map::new(),
        other => {
            let mut fields = Map::new();
            fields.insert("payload".into(), other);
            fields
        }
    };
    if let JsonValue::Object(extra) = details {
        fields.extend(extra);
    }
    JsonValue::Object(fields)
}

/// Reject a payload meant for another queue.
pub(crate) fn wrong_payload(processor: QueueName, payload: &TaskPayload) -> ProcessError {
    ProcessError::InvalidPayload {
        processor,
        task: payload.queue(),
    }
}
