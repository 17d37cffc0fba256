//! Per-recipient delivery results

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Success,
    Failed,
}

/// Result of sending to one recipient.
///
/// `message_id` is only present on success and `error` only on failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryOutcome {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub status: DeliveryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeliveryOutcome {
    #[must_use]
    pub fn success(recipient_id: Option<String>, message_id: impl Into<String>) -> Self {
        Self {
            recipient_id,
            message_id: Some(message_id.into()),
            status: DeliveryStatus::Success,
            error: None,
        }
    }

    #[must_use]
    pub fn failure(recipient_id: Option<String>, error: impl Into<String>) -> Self {
        Self {
            recipient_id,
            message_id: None,
            status: DeliveryStatus::Failed,
            error: Some(error.into()),
        }
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.status, DeliveryStatus::Success)
    }

    /// Attach the recipient this outcome belongs to
    #[must_use]
    pub fn for_recipient(mut self, recipient_id: impl Into<String>) -> Self {
        self.recipient_id = Some(recipient_id.into());
        self
    }
}

/// Aggregate of a multi-recipient send; the result of every bulk job.
///
/// `sent + failed == results.len()` always holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliverySummary {
    pub sent: usize,
    pub failed: usize,
    pub results: Vec<DeliveryOutcome>,
}

impl DeliverySummary {
    #[must_use]
    pub fn from_outcomes(results: Vec<DeliveryOutcome>) -> Self {
        let sent = results.iter().filter(|r| r.is_success()).count();
        Self {
            sent,
            failed: results.len() - sent,
            results,
        }
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.results.len()
    }
}
