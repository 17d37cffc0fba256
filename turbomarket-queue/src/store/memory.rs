use std::{
    collections::HashMap,
    sync::{
        Arc, RwLock,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;

use crate::{Job, JobId, StoreError, store::JobStore};

/// In-memory job store
///
/// Records live in a `HashMap` behind an `RwLock`. Intended for tests and for
/// deployments where losing queued work on restart is acceptable.
///
/// The store can be taken offline with [`MemoryJobStore::set_available`], after
/// which every operation fails with [`StoreError::Offline`].
#[derive(Debug, Clone)]
pub struct MemoryJobStore {
    jobs: Arc<RwLock<HashMap<(String, JobId), Job>>>,
    /// Maximum number of records (None = unlimited)
    capacity: Option<usize>,
    available: Arc<AtomicBool>,
}

impl MemoryJobStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            capacity: None,
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::new()
        }
    }

    /// Number of stored records
    ///
    /// Recovers gracefully if the lock is poisoned by accessing the underlying data.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub const fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Simulate the store going away (`false`) or coming back (`true`)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StoreError::Offline("memory store marked unavailable".into()))
        }
    }
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn save(&self, job: &Job) -> Result<(), StoreError> {
        self.check_available()?;

        let key = (job.queue.clone(), job.id);
        let mut jobs = self.jobs.write()?;

        // Overwrites don't count against capacity
        if let Some(cap) = self.capacity
            && !jobs.contains_key(&key)
            && jobs.len() >= cap
        {
            return Err(StoreError::Capacity(format!(
                "{}/{cap} jobs",
                jobs.len()
            )));
        }

        jobs.insert(key, job.clone());
        Ok(())
    }

    async fn delete(&self, queue: &str, id: &JobId) -> Result<(), StoreError> {
        self.check_available()?;
        self.jobs.write()?.remove(&(queue.to_string(), *id));
        Ok(())
    }

    async fn load(&self, queue: &str) -> Result<Vec<Job>, StoreError> {
        self.check_available()?;
        Ok(self
            .jobs
            .read()?
            .iter()
            .filter(|((name, _), _)| name == queue)
            .map(|(_, job)| job.clone())
            .collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_available()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use turbomarket_common::CampaignRequest;

    use super::*;
    use crate::{JobOptions, JobPayload};

    fn job(queue: &str) -> Job {
        Job::new(
            queue,
            JobPayload::GenerateContent(CampaignRequest::new("launch", "new", "g", "u1")),
            &JobOptions::default(),
            0,
        )
    }

    #[tokio::test]
    async fn test_save_load_delete() {
        let store = MemoryJobStore::new();
        let a = job("a");
        let b = job("b");

        store.save(&a).await.unwrap();
        store.save(&b).await.unwrap();
        assert_eq!(store.len(), 2);

        let loaded = store.load("a").await.unwrap();
        assert_eq!(loaded, vec![a.clone()]);

        store.delete("a", &a.id).await.unwrap();
        assert!(store.load("a").await.unwrap().is_empty());
        // Deleting twice is fine
        store.delete("a", &a.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_capacity_limit() {
        let store = MemoryJobStore::with_capacity(1);
        let mut first = job("q");
        store.save(&first).await.unwrap();

        let err = store.save(&job("q")).await.unwrap_err();
        assert!(matches!(err, StoreError::Capacity(_)));

        // Overwriting an existing record is allowed at capacity
        first.attempt = 1;
        store.save(&first).await.unwrap();
    }

    #[tokio::test]
    async fn test_unavailable_store_rejects_everything() {
        let store = MemoryJobStore::new();
        store.set_available(false);

        assert!(matches!(store.ping().await, Err(StoreError::Offline(_))));
        assert!(store.save(&job("q")).await.is_err());
        assert!(store.load("q").await.is_err());

        store.set_available(true);
        assert!(store.ping().await.is_ok());
    }
}
