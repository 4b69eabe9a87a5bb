use std::time::Duration;

use super::types::{Backoff, QueueName, RetryPolicy};

const HOUR: u64 = 60 * 60;
const DAY: u64 = 24 * HOUR;

/// Default scheduling, retention and concurrency for one queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSettings {
    pub name: QueueName,
    pub retry: RetryPolicy,
    /// Delay applied to every enqueue unless overridden.
    pub default_delay: Duration,
    pub keep_completed: usize,
    pub keep_failed: usize,
    /// Finished tasks older than this are purged by `clean`.
    pub clean_after: Duration,
    /// Worker pool size.
    pub concurrency: usize,
}

impl QueueSettings {
    pub fn for_queue(name: QueueName) -> Self {
        match name {
            QueueName::Matching => Self {
                name,
                retry: RetryPolicy::new(3, Backoff::Exponential(Duration::from_secs(1))),
                default_delay: Duration::from_secs(5 * 60),
                keep_completed: 10,
                keep_failed: 5,
                clean_after: Duration::from_secs(DAY),
                concurrency: 5,
            },
            QueueName::Notifications => Self {
                name,
                retry: RetryPolicy::new(5, Backoff::Exponential(Duration::from_secs(1))),
                default_delay: Duration::ZERO,
                keep_completed: 50,
                keep_failed: 10,
                clean_after: Duration::from_secs(DAY),
                concurrency: 10,
            },
            QueueName::Payments => Self {
                name,
                retry: RetryPolicy::new(3, Backoff::Fixed(Duration::from_secs(5))),
                default_delay: Duration::ZERO,
                keep_completed: 20,
                keep_failed: 10,
                clean_after: Duration::from_secs(7 * DAY),
                concurrency: 3,
            },
            QueueName::Compliance => Self {
                name,
                retry: RetryPolicy::new(2, Backoff::None),
                default_delay: Duration::from_secs(HOUR),
                keep_completed: 5,
                keep_failed: 5,
                clean_after: Duration::from_secs(30 * DAY),
                concurrency: 2,
            },
        }
    }

    pub fn with_default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }
}

/// Per-task overrides of the queue defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnqueueOptions {
    pub delay: Option<Duration>,
    pub max_attempts: Option<u32>,
    pub backoff: Option<Backoff>,
    pub keep_completed: Option<usize>,
    pub keep_failed: Option<usize>,
}

impl EnqueueOptions {
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub fn keep_completed(mut self, count: usize) -> Self {
        self.keep_completed = Some(count);
        self
    }

    pub fn keep_failed(mut self, count: usize) -> Self {
        self.keep_failed = Some(count);
        self
    }
}
