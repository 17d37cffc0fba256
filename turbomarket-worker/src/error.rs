//! Handler failures and how they map onto queue retries.

use thiserror::Error;
use turbomarket_content::ContentError;
use turbomarket_gateway::GatewayError;
use turbomarket_queue::{JobFailure, QueueError};

#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Content(#[from] ContentError),

    #[error(transparent)]
    Delivery(#[from] GatewayError),

    /// Generated content could not be handed on to the delivery queue.
    #[error("Failed to enqueue delivery job: {0}")]
    Chain(#[source] QueueError),

    #[error("Failed to encode job result: {0}")]
    Result(#[from] serde_json::Error),
}

impl JobError {
    /// Returns `true` if another attempt could succeed
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Content(err) => err.is_retryable(),
            Self::Delivery(err) => err.is_retryable(),
            Self::Chain(err) => matches!(err, QueueError::StoreUnavailable(_)),
            Self::Result(_) => false,
        }
    }

    /// The record stored on the job
    #[must_use]
    pub fn into_failure(self) -> JobFailure {
        let failure = if self.is_retryable() {
            JobFailure::retryable(self.to_string())
        } else {
            JobFailure::permanent(self.to_string())
        };

        match self {
            Self::Content(ContentError::Malformed(err)) => failure.with_details(err.raw),
            _ => failure,
        }
    }
}
