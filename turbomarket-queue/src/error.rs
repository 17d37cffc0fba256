//! Error types for the turbomarket-queue crate.

use std::io;

use thiserror::Error;

use crate::{JobId, JobState};

/// Errors surfaced by queue operations
#[derive(Debug, Error)]
pub enum QueueError {
    /// The backing store rejected a write the operation depends on.
    #[error("Job store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),

    /// No such job, or the caller does not hold the claim it names.
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    /// Queue names must be usable as a storage key.
    #[error("Invalid queue name: {0}")]
    InvalidQueueName(String),

    /// A submission named a job kind this worker cannot process.
    #[error("Unsupported job kind: {0}")]
    UnsupportedJobKind(String),

    /// The payload does not have the shape its kind requires.
    #[error("Invalid {kind} payload: {reason}")]
    InvalidPayload { kind: String, reason: String },

    /// The job exists but is not in a state the operation applies to.
    #[error("Operation not permitted while job {id} is {state}")]
    InvalidState { id: JobId, state: JobState },
}

/// Errors produced by a [`JobStore`](crate::JobStore) implementation
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The store cannot be reached at all.
    #[error("Store offline: {0}")]
    Offline(String),

    /// The store refused a write because it is full.
    #[error("Store capacity exceeded: {0}")]
    Capacity(String),

    /// Queue name rejected for use as a storage key.
    #[error("Invalid queue name: {0}")]
    InvalidQueueName(String),

    /// Internal error (lock poisoning, etc.).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::Internal(format!("Lock poisoned: {err}"))
    }
}

pub type Result<T, E = QueueError> = std::result::Result<T, E>;
