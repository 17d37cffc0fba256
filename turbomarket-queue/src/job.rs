use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{Backoff, JobOptions, JobPayload};

/// Identifier for a queued job
///
/// A ULID, so identifiers sort by creation time and are unique across
/// queues and restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId {
    id: ulid::Ulid,
}

impl JobId {
    #[must_use]
    pub const fn new(id: ulid::Ulid) -> Self {
        Self { id }
    }

    /// Generate a new unique job ID
    #[must_use]
    pub fn generate() -> Self {
        Self {
            id: ulid::Ulid::new(),
        }
    }

    /// Parse a job ID from a store filename like `01ARYZ6S41TSV4RRFFQ69G5FAV.json`
    ///
    /// Anything containing path separators or traversal patterns is rejected.
    #[must_use]
    pub fn from_filename(filename: &str) -> Option<Self> {
        if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
            return None;
        }

        let stem = filename.strip_suffix(".json")?;
        ulid::Ulid::from_string(stem).ok().map(Self::new)
    }

    #[must_use]
    pub const fn ulid(&self) -> ulid::Ulid {
        self.id
    }

    /// Milliseconds since the Unix epoch at which this ID was generated
    #[must_use]
    pub const fn timestamp_ms(&self) -> u64 {
        self.id.timestamp_ms()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl FromStr for JobId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ulid::Ulid::from_string(s).map(Self::new)
    }
}

impl Serialize for JobId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.id.to_string())
    }
}

impl<'de> Deserialize<'de> for JobId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Lifecycle state of a job.
///
/// `Completed` and `Failed` are terminal; a job leaves them only through an
/// explicit retry or removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Delayed,
    Waiting,
    Active,
    Completed,
    Failed,
}

impl JobState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Delayed => "delayed",
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "delayed" => Ok(Self::Delayed),
            "waiting" => Ok(Self::Waiting),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("Unknown job state: {other}")),
        }
    }
}

/// How far through its work a job is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Progress {
    /// Percentage complete, 0 to 100
    Percent(u8),
    /// Structured counter for multi-part work
    Steps { completed: u64, total: u64 },
}

impl Progress {
    #[must_use]
    pub fn percent(value: u8) -> Self {
        Self::Percent(value.min(100))
    }

    /// Completion as a percentage, whichever form the progress is in
    #[must_use]
    pub fn as_percent(&self) -> u8 {
        match *self {
            Self::Percent(value) => value.min(100),
            Self::Steps { total: 0, .. } => 0,
            Self::Steps { completed, total } => {
                u8::try_from(completed.min(total).saturating_mul(100) / total).unwrap_or(100)
            }
        }
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::Percent(0)
    }
}

/// Serializable description of why an attempt failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub reason: String,
    /// Whether another attempt could succeed; permanent failures skip backoff
    pub retryable: bool,
    /// Extra diagnostic material, such as the raw text that failed to parse
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl JobFailure {
    #[must_use]
    pub fn retryable(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            retryable: true,
            details: None,
        }
    }

    #[must_use]
    pub fn permanent(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            retryable: false,
            details: None,
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

/// Proof that a worker holds the claim on an active job.
///
/// Every claim issues a fresh token, so a stale holder cannot complete or
/// fail a job that has since been re-claimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClaimToken(pub(crate) u64);

/// A unit of work in a named queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub queue: String,
    #[serde(flatten)]
    pub payload: JobPayload,
    /// Lower values are claimed first
    pub priority: u32,
    /// Number of attempts made so far
    pub attempt: u32,
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub state: JobState,
    pub progress: Progress,
    /// Set once, when the job completes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Set once, when the job fails for the last time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobFailure>,
    pub enqueued_at: u64,
    /// When a delayed job becomes claimable
    pub ready_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) claim: Option<ClaimToken>,
    #[serde(default)]
    pub(crate) seq: u64,
}

impl Job {
    /// A fresh job; `options` should already be resolved against the queue defaults
    pub(crate) fn new(queue: &str, payload: JobPayload, options: &JobOptions, now: u64) -> Self {
        let delay = options.delay.unwrap_or_default();

        Self {
            id: JobId::generate(),
            queue: queue.to_string(),
            payload,
            priority: options.priority.unwrap_or_default(),
            attempt: 0,
            max_attempts: options.max_attempts.unwrap_or(1).max(1),
            backoff: options.backoff.unwrap_or_default(),
            state: if delay > 0 {
                JobState::Delayed
            } else {
                JobState::Waiting
            },
            progress: Progress::default(),
            result: None,
            error: None,
            enqueued_at: now,
            ready_at: now.saturating_add(delay),
            processed_at: None,
            finished_at: None,
            logs: Vec::new(),
            claim: None,
            seq: 0,
        }
    }

    /// Whether `token` is the live claim on this job
    #[must_use]
    pub fn is_claimed_by(&self, token: ClaimToken) -> bool {
        self.state == JobState::Active && self.claim == Some(token)
    }

    /// Attempts left before the job fails permanently
    #[must_use]
    pub const fn attempts_remaining(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempt)
    }
}

/// A claimed job together with the token needed to settle it
#[derive(Debug, Clone)]
pub struct Claim {
    pub job: Job,
    pub token: ClaimToken,
}

impl Claim {
    #[must_use]
    pub const fn id(&self) -> JobId {
        self.job.id
    }
}
