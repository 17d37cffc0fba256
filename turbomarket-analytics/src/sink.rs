use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use serde::Serialize;
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use turbomarket_common::{Event, Signal, internal, tracing};

use crate::{EventRecorder, EventRow, RecorderError};

#[derive(Debug, Default)]
struct Counters {
    recorded: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
}

/// Counts of events since the sink was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SinkStats {
    pub recorded: u64,
    /// Rejected because the channel was full or closed
    pub dropped: u64,
    /// Accepted but the recorder failed to persist them
    pub failed: u64,
}

/// Non-blocking handle for emitting events.
///
/// Cloning is cheap; every clone feeds the same drain task.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<Event>,
    recorder: Arc<dyn EventRecorder>,
    counters: Arc<Counters>,
}

impl EventSink {
    /// Create a sink and spawn the task that drains it into `recorder`.
    ///
    /// The task stops on [`Signal::Shutdown`], after recording whatever is
    /// already buffered.
    #[must_use]
    pub fn spawn(
        recorder: Arc<dyn EventRecorder>,
        capacity: usize,
        shutdown: broadcast::Receiver<Signal>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let counters = Arc::new(Counters::default());

        let handle = tokio::spawn(drain(
            rx,
            Arc::clone(&recorder),
            Arc::clone(&counters),
            shutdown,
        ));

        (
            Self {
                tx,
                recorder,
                counters,
            },
            handle,
        )
    }

    /// Queue an event for recording. Never waits and never fails the caller.
    pub fn record(&self, event: Event) {
        if let Err(err) = self.tx.try_send(event) {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            let (reason, event) = match err {
                mpsc::error::TrySendError::Full(event) => ("channel full", event),
                mpsc::error::TrySendError::Closed(event) => ("sink closed", event),
            };
            tracing::warn!(
                event_name = %event.event_name,
                "Dropping analytics event: {reason}"
            );
        }
    }

    #[must_use]
    pub fn stats(&self) -> SinkStats {
        SinkStats {
            recorded: self.counters.recorded.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Check the recorder behind this sink
    ///
    /// # Errors
    /// Whatever the recorder reports
    pub async fn ping(&self) -> Result<(), RecorderError> {
        self.recorder.ping().await
    }
}

async fn store(recorder: &dyn EventRecorder, counters: &Counters, event: &Event) {
    let result = match EventRow::try_from(event) {
        Ok(row) => recorder.record(&row).await,
        Err(err) => Err(err.into()),
    };

    match result {
        Ok(()) => {
            counters.recorded.fetch_add(1, Ordering::Relaxed);
        }
        Err(err) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                event_name = %event.event_name,
                "Failed to record analytics event: {err}"
            );
        }
    }
}

async fn drain(
    mut rx: mpsc::Receiver<Event>,
    recorder: Arc<dyn EventRecorder>,
    counters: Arc<Counters>,
    mut shutdown: broadcast::Receiver<Signal>,
) {
    internal!("Analytics sink started");

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else {
                    break;
                };
                store(recorder.as_ref(), &counters, &event).await;
            }
            sig = shutdown.recv() => {
                match sig {
                    Ok(Signal::Shutdown | Signal::Finalised) => {
                        internal!("Analytics sink received shutdown signal");
                    }
                    Err(err) => {
                        tracing::error!("Analytics sink shutdown channel error: {err}");
                    }
                }

                rx.close();
                while let Some(event) = rx.recv().await {
                    store(recorder.as_ref(), &counters, &event).await;
                }
                break;
            }
        }
    }

    internal!(
        level = INFO,
        "Analytics sink stopped after recording {} events",
        counters.recorded.load(Ordering::Relaxed)
    );
}
