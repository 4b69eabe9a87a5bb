//! Named work queues with retry, backoff, retention and stall detection.
//!
//! ## Components
//!
//! - `QueuedTask`: a typed payload plus its scheduling state
//! - `TaskStore`: queue backend (process-local in-memory store)
//! - `QueueService`: enqueue API shared by processors, scheduler and HTTP handlers
//! - `WorkerPool`: per-queue pool bounded by the queue's concurrency
//!
//! Tasks that exhaust their attempts stay in the failed set, up to the queue's
//! retention count, for inspection.

pub mod service;
pub mod settings;
pub mod store;
pub mod types;
pub mod worker;

pub use service::QueueService;
pub use settings::{EnqueueOptions, QueueSettings};
pub use store::{InMemoryTaskStore, QueueError, TaskStore};
pub use types::{
    AttemptRecord, Backoff, ComplianceCheck, ComplianceTask, FailureOutcome, MatchingTask,
    NotificationMessage, NotificationTask, PaymentTask, QueueCounts, QueueName, QueuedTask,
    RetryPolicy, TaskHandle, TaskId, TaskPayload, TaskStatus,
};
pub use worker::{TaskRun, WorkerConfig, WorkerPool, WorkerPoolHandle, WorkerStats};
