use thiserror::Error;

/// The model provider failed to produce anything. Always worth retrying.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Generation timed out: {0}")]
    Timeout(String),

    #[error("Rate limited by provider: {0}")]
    RateLimited(String),

    /// The provider answered but returned no usable output.
    #[error("Empty response: {0}")]
    Empty(String),
}

/// Generated text that does not follow the email schema.
///
/// Carries the raw text so it can be inspected after the job fails.
#[derive(Debug, Error)]
#[error("Generated content is not valid email JSON: {reason}")]
pub struct MalformedContentError {
    pub reason: String,
    pub raw: String,
}

/// Anything that can go wrong turning a campaign request into content
#[derive(Debug, Error)]
pub enum ContentError {
    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Malformed(#[from] MalformedContentError),
}

impl GenerationError {
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        true
    }
}

impl ContentError {
    /// Malformed output is deterministic enough that retrying is wasted spend
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Generation(err) => err.is_retryable(),
            Self::Malformed(_) => false,
        }
    }
}
