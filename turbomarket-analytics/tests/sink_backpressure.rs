#![allow(clippy::unwrap_used)]

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::sync::{Notify, broadcast};
use turbomarket_analytics::{EventRecorder, EventRow, EventSink, MemoryRecorder, RecorderError};
use turbomarket_common::{Event, Signal};

/// Holds every write until released
#[derive(Debug, Default)]
struct StalledRecorder {
    release: Notify,
    inner: MemoryRecorder,
}

#[async_trait]
impl EventRecorder for StalledRecorder {
    async fn record(&self, row: &EventRow) -> Result<(), RecorderError> {
        self.release.notified().await;
        self.inner.record(row).await
    }

    async fn ping(&self) -> Result<(), RecorderError> {
        Ok(())
    }
}

#[tokio::test]
async fn test_full_channel_drops_instead_of_blocking() {
    let recorder = Arc::new(StalledRecorder::default());
    let (_tx, rx) = broadcast::channel::<Signal>(1);
    let (sink, _handle) = EventSink::spawn(recorder.clone(), 2, rx);

    // With the recorder stalled, at most one in flight plus two buffered
    let emitted = tokio::time::timeout(Duration::from_secs(1), async {
        for i in 0..50 {
            sink.record(Event::new("email_sent", "u1").property("i", i));
        }
    })
    .await;

    assert!(emitted.is_ok(), "record must never wait on the recorder");
    let stats = sink.stats();
    assert!(stats.dropped >= 47, "dropped {}", stats.dropped);
    assert_eq!(stats.recorded, 0);
}

#[tokio::test]
async fn test_events_recorded_in_emission_order() {
    let recorder = Arc::new(MemoryRecorder::default());
    let (tx, rx) = broadcast::channel(1);
    let (sink, handle) = EventSink::spawn(recorder.clone(), 64, rx);

    for name in ["email_generation_started", "email_generation_completed", "email_sent"] {
        sink.record(Event::new(name, "u1"));
    }

    tx.send(Signal::Shutdown).unwrap();
    handle.await.unwrap();

    let names: Vec<String> = recorder.rows().into_iter().map(|row| row.event_name).collect();
    assert_eq!(
        names,
        vec!["email_generation_started", "email_generation_completed", "email_sent"]
    );
}
