use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::{EventRecorder, EventRow, RecorderError};

/// Keeps rows in memory; used when no file is configured and in tests
#[derive(Debug)]
pub struct MemoryRecorder {
    rows: RwLock<Vec<EventRow>>,
    available: AtomicBool,
}

impl Default for MemoryRecorder {
    fn default() -> Self {
        Self {
            rows: RwLock::default(),
            available: AtomicBool::new(true),
        }
    }
}

impl MemoryRecorder {
    #[must_use]
    pub fn rows(&self) -> Vec<EventRow> {
        self.rows.read().clone()
    }

    /// Rows with the given event name, in insertion order
    #[must_use]
    pub fn named(&self, event_name: &str) -> Vec<EventRow> {
        self.rows
            .read()
            .iter()
            .filter(|row| row.event_name == event_name)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    /// Simulate an outage: while unavailable, `record` and `ping` fail
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), RecorderError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RecorderError::Unavailable("memory recorder offline".into()))
        }
    }
}

#[async_trait]
impl EventRecorder for MemoryRecorder {
    async fn record(&self, row: &EventRow) -> Result<(), RecorderError> {
        self.check()?;
        self.rows.write().push(row.clone());
        Ok(())
    }

    async fn ping(&self) -> Result<(), RecorderError> {
        self.check()
    }
}
