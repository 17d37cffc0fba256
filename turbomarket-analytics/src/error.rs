use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Recorder unavailable: {0}")]
    Unavailable(String),
}
