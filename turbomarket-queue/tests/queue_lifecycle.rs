#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{collections::HashSet, sync::Arc, time::Duration};

use pretty_assertions::assert_eq;
use serde_json::json;
use turbomarket_common::{CampaignRequest, EmailAddress, Envelope};
use turbomarket_queue::{
    FileJobStore, JobFailure, JobOptions, JobPayload, JobQueues, JobState, JobSubmission,
    ManualClock, MemoryJobStore, QueueConfig, QueueError,
};

fn campaign() -> JobPayload {
    JobPayload::GenerateContent(CampaignRequest::new("launch", "new", "drive_clicks", "u1"))
}

fn single() -> JobPayload {
    JobPayload::SendSingle(
        Envelope::new(
            EmailAddress::new("news@turbomarket.io"),
            vec![EmailAddress::new("ada@example.com")],
            "Hello",
        )
        .with_text("Hi"),
    )
}

fn queues(start_ms: u64) -> (JobQueues, Arc<MemoryJobStore>, Arc<ManualClock>) {
    let store = Arc::new(MemoryJobStore::new());
    let clock = Arc::new(ManualClock::new(start_ms));
    let queues = JobQueues::with_clock(store.clone(), QueueConfig::default(), clock.clone());
    (queues, store, clock)
}

#[tokio::test]
async fn test_enqueue_fails_when_store_unavailable() {
    let (queues, store, _) = queues(0);
    let queue = queues.queue("email-processing").unwrap();

    store.set_available(false);
    let err = queue.enqueue(campaign(), JobOptions::new()).await.unwrap_err();
    assert!(matches!(err, QueueError::StoreUnavailable(_)));
    assert_eq!(queue.stats().waiting, 0);

    store.set_available(true);
    queue.enqueue(campaign(), JobOptions::new()).await.unwrap();
    assert_eq!(queue.stats().waiting, 1);
}

#[tokio::test]
async fn test_transition_survives_store_outage() {
    let (queues, store, _) = queues(0);
    let queue = queues.queue("email-processing").unwrap();
    queue.enqueue(campaign(), JobOptions::new()).await.unwrap();

    let claim = queue.claim_next(1).await.unwrap();
    store.set_available(false);

    let job = queue
        .complete(&claim.id(), claim.token, json!({"ok": true}))
        .await
        .unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(queue.stats().completed, 1);
}

#[tokio::test]
async fn test_delayed_job_waits_for_clock() {
    let (queues, _, clock) = queues(1_000);
    let queue = queues.queue("email-processing").unwrap();

    let job = queue
        .enqueue(campaign(), JobOptions::new().delay(5_000))
        .await
        .unwrap();
    assert_eq!(job.state, JobState::Delayed);
    assert!(queue.claim_next(1).await.is_none());

    clock.advance(4_999);
    assert!(queue.claim_next(1).await.is_none());

    clock.advance(1);
    assert_eq!(queue.claim_next(1).await.unwrap().id(), job.id);
}

#[tokio::test]
async fn test_kind_presets_apply() {
    let (queues, _, _) = queues(0);
    let queue = queues.queue("email-processing").unwrap();

    let job = queue.enqueue(single(), JobOptions::new()).await.unwrap();
    assert_eq!(job.priority, 1);
    assert_eq!(job.max_attempts, 3);
    assert_eq!(job.backoff.delay, 5_000);

    let job = queue
        .enqueue(campaign(), JobOptions::new().priority(7))
        .await
        .unwrap();
    assert_eq!(job.priority, 7);
    assert_eq!(job.max_attempts, 3);
    assert_eq!(job.backoff.delay, 2_000);
}

#[tokio::test]
async fn test_retry_cycle_through_queue() {
    let (queues, _, clock) = queues(0);
    let queue = queues.queue("email-processing").unwrap();
    let job = queue.enqueue(campaign(), JobOptions::new()).await.unwrap();

    for expected_delay in [2_000, 4_000] {
        let claim = queue.claim_next(1).await.unwrap();
        let failed = queue
            .fail(&claim.id(), claim.token, JobFailure::retryable("upstream timeout"))
            .await
            .unwrap();
        assert_eq!(failed.state, JobState::Delayed);
        assert_eq!(failed.ready_at, clock_now(&clock) + expected_delay);
        clock.advance(expected_delay);
    }

    let claim = queue.claim_next(1).await.unwrap();
    let done = queue.complete(&claim.id(), claim.token, json!("ok")).await.unwrap();
    assert_eq!(done.id, job.id);
    assert_eq!(done.attempt, 3);
    assert_eq!(done.logs.len(), 2);
}

fn clock_now(clock: &ManualClock) -> u64 {
    use turbomarket_queue::Clock;
    clock.now_ms()
}

#[tokio::test]
async fn test_pause_and_resume() {
    let (queues, _, _) = queues(0);
    let queue = queues.queue("email-processing").unwrap();
    queue.enqueue(campaign(), JobOptions::new()).await.unwrap();

    queue.pause();
    assert!(queue.is_paused());
    assert!(queue.claim_next(5).await.is_none());
    assert!(queue.stats().paused);

    queue.resume();
    assert!(queue.claim_next(5).await.is_some());
}

#[tokio::test]
async fn test_submit_rejects_unknown_kind() {
    let (queues, _, _) = queues(0);

    let err = queues
        .submit("email-processing", JobSubmission::new("unknown-kind", json!({})))
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::UnsupportedJobKind(_)));
    assert_eq!(queues.stats("email-processing").unwrap().waiting, 0);
}

#[tokio::test]
async fn test_invalid_queue_name() {
    let (queues, _, _) = queues(0);
    assert!(matches!(
        queues.queue("../jobs"),
        Err(QueueError::InvalidQueueName(_))
    ));
}

#[tokio::test]
async fn test_enqueue_bulk_reports_each_item() {
    let (queues, _, _) = queues(0);
    let queue = queues.queue("email-processing").unwrap();

    let results = queue
        .enqueue_bulk(vec![
            (campaign(), JobOptions::new()),
            (single(), JobOptions::new()),
        ])
        .await;

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(Result::is_ok));
    assert_eq!(queue.stats().waiting, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claims_are_exclusive() {
    let (queues, _, _) = queues(0);
    let queue = queues.queue("email-processing").unwrap();

    for _ in 0..50 {
        queue.enqueue(campaign(), JobOptions::new()).await.unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..8 {
        let queue = queue.clone();
        handles.push(tokio::spawn(async move {
            let mut claimed = Vec::new();
            while let Some(claim) = queue.claim_next(1).await {
                claimed.push(claim.id());
            }
            claimed
        }));
    }

    let mut seen = HashSet::new();
    for handle in handles {
        for id in handle.await.unwrap() {
            assert!(seen.insert(id), "job {id} claimed twice");
        }
    }
    assert_eq!(seen.len(), 50);
}

#[tokio::test]
#[cfg_attr(miri, ignore = "Calls an unsupported method")]
async fn test_restore_from_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = FileJobStore::new(dir.path()).unwrap();
    store.init().unwrap();
    let store = Arc::new(store);

    let first = JobQueues::new(store.clone(), QueueConfig::default());
    let queue = first.queue("email-processing").unwrap();
    let done = queue.enqueue(campaign(), JobOptions::new()).await.unwrap();
    let interrupted = queue.enqueue(campaign(), JobOptions::new()).await.unwrap();
    let waiting = queue.enqueue(single(), JobOptions::new().priority(9)).await.unwrap();

    let claim = queue.claim_next(1).await.unwrap();
    queue.complete(&claim.id(), claim.token, json!(1)).await.unwrap();
    let claim = queue.claim_next(1).await.unwrap();
    assert_eq!(claim.id(), interrupted.id);
    drop(first);

    let second = JobQueues::new(store, QueueConfig::default());
    let restored = second
        .restore(&["email-processing".to_string()])
        .await
        .unwrap();
    assert_eq!(restored, 3);

    let queue = second.queue("email-processing").unwrap();
    let stats = queue.stats();
    assert_eq!((stats.waiting, stats.active, stats.completed), (2, 0, 1));
    assert_eq!(queue.get(&done.id).unwrap().result, Some(json!(1)));

    // The interrupted job runs again ahead of the lower-priority one
    assert_eq!(queue.claim_next(1).await.unwrap().id(), interrupted.id);
    assert_eq!(queue.claim_next(1).await.unwrap().id(), waiting.id);
}

#[tokio::test]
async fn test_clean_and_remove() {
    let (queues, store, clock) = queues(0);
    let queue = queues.queue("email-processing").unwrap();

    let job = queue.enqueue(campaign(), JobOptions::new()).await.unwrap();
    let claim = queue.claim_next(1).await.unwrap();
    queue.complete(&claim.id(), claim.token, json!(null)).await.unwrap();

    clock.advance(60_000);
    let cleaned = queue
        .clean(Duration::from_secs(30), JobState::Completed, 100)
        .await;
    assert_eq!(cleaned, vec![job.id]);
    assert!(store.is_empty());

    let job = queue.enqueue(campaign(), JobOptions::new()).await.unwrap();
    queue.log(&job.id, "manual note").await.unwrap();
    assert_eq!(queue.logs(&job.id).unwrap(), vec!["manual note"]);
    queue.remove(&job.id).await.unwrap();
    assert!(queue.get(&job.id).is_none());
    assert!(matches!(
        queue.remove(&job.id).await,
        Err(QueueError::JobNotFound(_))
    ));
}

#[tokio::test]
async fn test_wait_for_job_wakes_on_enqueue() {
    let (queues, _, _) = queues(0);
    let queue = queues.queue("email-processing").unwrap();

    let waiter = {
        let queue = queue.clone();
        tokio::spawn(async move {
            queue.wait_for_job(Duration::from_secs(30)).await;
            queue.claim_next(1).await.map(|claim| claim.id())
        })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    let job = queue.enqueue(campaign(), JobOptions::new()).await.unwrap();

    let claimed = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .expect("waiter should wake")
        .unwrap();
    assert_eq!(claimed, Some(job.id));
}
