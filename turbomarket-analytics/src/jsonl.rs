use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::{
    fs::{File, OpenOptions},
    io::AsyncWriteExt,
    sync::Mutex,
};
use turbomarket_common::internal;

use crate::{EventRecorder, EventRow, RecorderError};

/// Appends one JSON object per line to a file
#[derive(Debug)]
pub struct JsonLinesRecorder {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonLinesRecorder {
    /// Open `path` for appending, creating it and its directory if needed
    ///
    /// # Errors
    /// When the directory or file cannot be created
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, RecorderError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        internal!(level = INFO, "Recording analytics events to {}", path.display());

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl EventRecorder for JsonLinesRecorder {
    async fn record(&self, row: &EventRow) -> Result<(), RecorderError> {
        let mut line = serde_json::to_vec(row)?;
        line.push(b'\n');

        // One write per row so concurrent appenders never interleave lines
        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;

        Ok(())
    }

    async fn ping(&self) -> Result<(), RecorderError> {
        let metadata = tokio::fs::metadata(&self.path).await?;
        if metadata.is_file() {
            Ok(())
        } else {
            Err(RecorderError::Unavailable(format!(
                "{} is not a file",
                self.path.display()
            )))
        }
    }
}
