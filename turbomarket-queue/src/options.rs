use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    /// `delay * 2^(attempt - 1)`
    Exponential,
    /// The same delay before every retry
    Fixed,
}

/// Delay schedule between attempts, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backoff {
    #[serde(rename = "type")]
    pub kind: BackoffKind,
    pub delay: u64,
}

impl Backoff {
    #[must_use]
    pub const fn exponential(delay_ms: u64) -> Self {
        Self {
            kind: BackoffKind::Exponential,
            delay: delay_ms,
        }
    }

    #[must_use]
    pub const fn fixed(delay_ms: u64) -> Self {
        Self {
            kind: BackoffKind::Fixed,
            delay: delay_ms,
        }
    }

    /// Delay before the retry that follows failed attempt number `attempt`
    /// (1-indexed), capped at `max_delay_ms`
    #[must_use]
    pub fn delay_for(&self, attempt: u32, max_delay_ms: u64) -> u64 {
        match self.kind {
            BackoffKind::Exponential => {
                crate::retry::exponential_delay(attempt, self.delay, max_delay_ms)
            }
            BackoffKind::Fixed => self.delay.min(max_delay_ms),
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::exponential(2000)
    }
}

/// Per-job overrides supplied at enqueue time.
///
/// Anything left unset falls back to the kind's preset and then to the
/// queue defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,
    /// Milliseconds to wait before the job becomes claimable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<u64>,
    #[serde(
        default,
        alias = "attempts",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff: Option<Backoff>,
}

impl JobOptions {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            priority: None,
            delay: None,
            max_attempts: None,
            backoff: None,
        }
    }

    #[must_use]
    pub const fn priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }

    #[must_use]
    pub const fn delay(mut self, delay_ms: u64) -> Self {
        self.delay = Some(delay_ms);
        self
    }

    #[must_use]
    pub const fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    #[must_use]
    pub const fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Fill every unset field from `fallback`
    #[must_use]
    pub const fn or(self, fallback: Self) -> Self {
        Self {
            priority: match self.priority {
                Some(v) => Some(v),
                None => fallback.priority,
            },
            delay: match self.delay {
                Some(v) => Some(v),
                None => fallback.delay,
            },
            max_attempts: match self.max_attempts {
                Some(v) => Some(v),
                None => fallback.max_attempts,
            },
            backoff: match self.backoff {
                Some(v) => Some(v),
                None => fallback.backoff,
            },
        }
    }
}
