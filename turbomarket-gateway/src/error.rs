//! Typed errors for delivery gateway calls.
//!
//! Only failures of the request as a whole are errors. A provider accepting
//! the request but refusing some of its destinations is reported per
//! destination as a failed [`DeliveryOutcome`](turbomarket_common::DeliveryOutcome).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// The request never got a definitive answer. Retrying may succeed.
    #[error("Transport failure: {0}")]
    Transport(#[from] TransportError),

    /// The provider refused the request. Retrying will not help.
    #[error("Rejected by provider: {0}")]
    Rejected(String),

    /// The request was malformed before it was sent.
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),
}

/// Failures reaching the provider
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    /// The provider asked us to slow down.
    #[error("Throttled: {0}")]
    Throttled(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl GatewayError {
    /// Returns `true` if the same request could succeed later
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}
