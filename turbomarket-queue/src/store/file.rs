use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::fs;
use turbomarket_common::internal;

use crate::{Job, JobId, StoreError, store::JobStore, store::validate_queue_name};

/// File-backed job store
///
/// Each job is a JSON document at `{path}/{queue}/{job_id}.json`.
///
/// Writes go to `.tmp_{job_id}.json` first and are then renamed into place,
/// so a crash never leaves a half-written record visible to [`JobStore::load`].
#[derive(Debug, Clone)]
pub struct FileJobStore {
    path: PathBuf,
}

impl Default for FileJobStore {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/turbomarket/jobs"),
        }
    }
}

impl<'de> Deserialize<'de> for FileJobStore {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct FileJobStoreHelper {
            path: PathBuf,
        }

        let helper = FileJobStoreHelper::deserialize(deserializer)?;
        Self::validate_path(&helper.path).map_err(serde::de::Error::custom)?;

        Ok(Self { path: helper.path })
    }
}

impl FileJobStore {
    /// Create a store rooted at `path`
    ///
    /// # Errors
    /// Returns an error if the path contains `..` or points into a system directory
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        Self::validate_path(&path)?;
        Ok(Self { path })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn validate_path(path: &Path) -> Result<(), StoreError> {
        if path.components().any(|c| c == Component::ParentDir) {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("Store path cannot contain '..' components: {}", path.display()),
            )));
        }

        let sensitive_prefixes = [
            "/etc", "/bin", "/sbin", "/usr/bin", "/usr/sbin", "/boot", "/sys", "/proc", "/dev",
        ];

        if let Some(prefix) = sensitive_prefixes.iter().find(|p| path.starts_with(p)) {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!(
                    "Store path cannot be in system directory {prefix}: {}",
                    path.display()
                ),
            )));
        }

        Ok(())
    }

    /// Create the store directory if needed and sweep up temporary files left
    /// by interrupted writes
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created or is not a directory
    pub fn init(&mut self) -> Result<(), StoreError> {
        internal!("Initialising job store at {}", self.path.display());

        if !self.path.try_exists()? {
            internal!("{} does not exist, creating...", self.path.display());
            std::fs::create_dir_all(&self.path)?;
        } else if !self.path.is_dir() {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::NotADirectory,
                format!("Expected {} to be a directory", self.path.display()),
            )));
        }

        let mut cleaned = 0;
        for queue_dir in std::fs::read_dir(&self.path)? {
            let queue_dir = queue_dir?;
            if !queue_dir.file_type()?.is_dir() {
                continue;
            }

            for entry in std::fs::read_dir(queue_dir.path())? {
                let entry = entry?;
                if entry.file_name().to_string_lossy().starts_with(".tmp_") {
                    std::fs::remove_file(entry.path())?;
                    cleaned += 1;
                }
            }
        }

        if cleaned > 0 {
            internal!(
                level = INFO,
                "Cleaned up {cleaned} orphaned temporary files from job store"
            );
        }

        Ok(())
    }

    fn queue_dir(&self, queue: &str) -> Result<PathBuf, StoreError> {
        validate_queue_name(queue)?;
        Ok(self.path.join(queue))
    }
}

#[async_trait]
impl JobStore for FileJobStore {
    async fn save(&self, job: &Job) -> Result<(), StoreError> {
        let dir = self.queue_dir(&job.queue)?;
        fs::create_dir_all(&dir).await?;

        let filename = format!("{}.json", job.id);
        let temp_path = dir.join(format!(".tmp_{filename}"));

        fs::write(&temp_path, serde_json::to_vec(job)?).await?;
        fs::rename(&temp_path, dir.join(filename)).await?;

        Ok(())
    }

    async fn delete(&self, queue: &str, id: &JobId) -> Result<(), StoreError> {
        let path = self.queue_dir(queue)?.join(format!("{id}.json"));

        match fs::remove_file(&path).await {
            Err(err) if err.kind() != std::io::ErrorKind::NotFound => Err(err.into()),
            _ => Ok(()),
        }
    }

    async fn load(&self, queue: &str) -> Result<Vec<Job>, StoreError> {
        let dir = self.queue_dir(queue)?;
        if !fs::try_exists(&dir).await? {
            return Ok(Vec::new());
        }

        let mut jobs = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let filename = entry.file_name();
            let Some(id) = JobId::from_filename(&filename.to_string_lossy()) else {
                continue;
            };

            let bytes = fs::read(entry.path()).await?;
            match serde_json::from_slice::<Job>(&bytes) {
                Ok(job) => jobs.push(job),
                Err(err) => {
                    tracing::warn!(job_id = %id, error = %err, "Skipping unreadable job record");
                }
            }
        }

        Ok(jobs)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let metadata = fs::metadata(&self.path)
            .await
            .map_err(|err| StoreError::Offline(format!("{}: {err}", self.path.display())))?;

        if metadata.is_dir() {
            Ok(())
        } else {
            Err(StoreError::Offline(format!(
                "{} is not a directory",
                self.path.display()
            )))
        }
    }
}
