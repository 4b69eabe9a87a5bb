//! Infrastructure layer of the automation engine: persistence, queues,
//! processors and the scheduler.
//!
//! Every service here is an explicitly constructed value; nothing is a
//! process-wide singleton. Processors receive theirs through
//! [`ProcessorContext`](crate::processors::ProcessorContext).

pub mod clock;
pub mod config;
pub mod processors;
pub mod queue;
pub mod scheduler;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, EngineConfig};
