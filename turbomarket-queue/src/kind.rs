use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use turbomarket_common::{CampaignRequest, EmailAddress, EmailContent, Envelope, Recipient};

use crate::{Backoff, JobOptions, QueueError};

/// Kinds of work the worker knows how to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    GenerateContent,
    SendSingle,
    SendBulk,
    SendTemplate,
}

impl JobKind {
    pub const ALL: [Self; 4] = [
        Self::GenerateContent,
        Self::SendSingle,
        Self::SendBulk,
        Self::SendTemplate,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GenerateContent => "generate-content",
            Self::SendSingle => "send-single",
            Self::SendBulk => "send-bulk",
            Self::SendTemplate => "send-template",
        }
    }

    /// Options a job of this kind gets unless the submitter overrides them
    #[must_use]
    pub const fn preset(self) -> JobOptions {
        match self {
            Self::GenerateContent => JobOptions::new(),
            Self::SendSingle | Self::SendTemplate => JobOptions::new()
                .priority(1)
                .max_attempts(3)
                .backoff(Backoff::exponential(5000)),
            Self::SendBulk => JobOptions::new()
                .priority(2)
                .max_attempts(2)
                .backoff(Backoff::exponential(10_000)),
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| QueueError::UnsupportedJobKind(s.to_string()))
    }
}

/// Send previously generated content to many recipients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkSendRequest {
    pub content: EmailContent,
    pub from: EmailAddress,
    pub recipients: Vec<Recipient>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration_set: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

/// Render a provider-side template once per destination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateSendRequest {
    pub from: EmailAddress,
    pub template_name: String,
    /// Defaults for every recipient; each recipient's own data is merged over it
    #[serde(default)]
    pub template_data: serde_json::Map<String, serde_json::Value>,
    pub recipients: Vec<Recipient>,
    #[serde(default)]
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration_set: Option<String>,
}

/// Kind-specific job data.
///
/// Serialized as `{"kind": "...", "payload": {...}}` so the kind string is
/// visible to any consumer of the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "kebab-case")]
pub enum JobPayload {
    GenerateContent(CampaignRequest),
    SendSingle(Envelope),
    SendBulk(BulkSendRequest),
    SendTemplate(TemplateSendRequest),
}

impl JobPayload {
    #[must_use]
    pub const fn kind(&self) -> JobKind {
        match self {
            Self::GenerateContent(_) => JobKind::GenerateContent,
            Self::SendSingle(_) => JobKind::SendSingle,
            Self::SendBulk(_) => JobKind::SendBulk,
            Self::SendTemplate(_) => JobKind::SendTemplate,
        }
    }

    /// The user the work is done on behalf of, when the payload names one
    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Self::GenerateContent(request) => Some(&request.user_id),
            Self::SendBulk(request) => Some(&request.content.metadata.user_id),
            Self::SendTemplate(request) if !request.user_id.is_empty() => Some(&request.user_id),
            Self::SendSingle(_) | Self::SendTemplate(_) => None,
        }
    }
}

/// A job as submitted from outside the process.
///
/// The kind is an open string here; [`JobSubmission::decode`] is where an
/// unknown kind is rejected, before anything reaches a queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSubmission {
    pub kind: String,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub options: JobOptions,
}

impl JobSubmission {
    #[must_use]
    pub fn new(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
            options: JobOptions::default(),
        }
    }

    /// Check the kind and payload shape, yielding typed job data
    pub fn decode(self) -> Result<(JobPayload, JobOptions), QueueError> {
        let kind: JobKind = self.kind.parse()?;

        let invalid = |err: serde_json::Error| QueueError::InvalidPayload {
            kind: kind.to_string(),
            reason: err.to_string(),
        };

        let payload = match kind {
            JobKind::GenerateContent => {
                JobPayload::GenerateContent(serde_json::from_value(self.payload).map_err(invalid)?)
            }
            JobKind::SendSingle => {
                JobPayload::SendSingle(serde_json::from_value(self.payload).map_err(invalid)?)
            }
            JobKind::SendBulk => {
                JobPayload::SendBulk(serde_json::from_value(self.payload).map_err(invalid)?)
            }
            JobKind::SendTemplate => {
                JobPayload::SendTemplate(serde_json::from_value(self.payload).map_err(invalid)?)
            }
        };

        Ok((payload, self.options))
    }
}
