//! Named job queues with priorities, delays, retries and write-through
//! persistence.
//!
//! A [`JobQueues`] registry hands out [`JobQueue`] handles by name. Jobs move
//! through the states in [`JobState`]:
//!
//! ```text
//! enqueue ──> Delayed ──(ready_at)──> Waiting ──claim──> Active ──complete──> Completed
//!                ^                                        │
//!                └────────── retryable failure ───────────┤
//!                                                         └──fail──> Failed
//! ```
//!
//! Records are written through to a [`JobStore`] so that a restart can
//! [`restore`](JobQueue::restore) them.

mod clock;
mod config;
mod error;
mod health;
mod job;
mod kind;
mod options;
mod queue;
pub mod retry;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::QueueConfig;
pub use error::{QueueError, Result, StoreError};
pub use health::{QueueHealth, QueueStats};
pub use job::{Claim, ClaimToken, Job, JobFailure, JobId, JobState, Progress};
pub use kind::{BulkSendRequest, JobKind, JobPayload, JobSubmission, TemplateSendRequest};
pub use options::{Backoff, BackoffKind, JobOptions};
pub use queue::{JobQueue, JobQueues};
pub use store::{FileJobStore, JobStore, MemoryJobStore, StoreConfig};

/// Queue used when none is configured
pub const DEFAULT_QUEUE: &str = "email-processing";
