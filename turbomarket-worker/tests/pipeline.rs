#![allow(clippy::unwrap_used)]

use std::{sync::Arc, time::Duration};

use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::{sync::broadcast, task::JoinHandle};
use turbomarket_analytics::{EventSink, MemoryRecorder};
use turbomarket_common::Signal;
use turbomarket_content::{ContentComposer, ContentGenerator, ScriptedGenerator};
use turbomarket_gateway::ScriptedGateway;
use turbomarket_queue::{
    Job, JobId, JobOptions, JobQueue, JobQueues, JobState, JobSubmission, ManualClock,
    MemoryJobStore, QueueConfig, QueueError,
};
use turbomarket_worker::{Collaborators, Dispatcher, DispatcherConfig};

const QUEUE: &str = "email-processing";

const EMAIL: &str = r#"{
    "subject": "Launch day",
    "preheader": "It's here",
    "content": {
        "hook": "Big news",
        "body": "<p>TurboMarket is live.</p>",
        "cta": "Try it",
        "footer": "TurboMarket Inc."
    }
}"#;

struct Harness {
    queues: JobQueues,
    queue: JobQueue,
    clock: Arc<ManualClock>,
    recorder: Arc<MemoryRecorder>,
    dispatcher: Arc<Dispatcher>,
    shutdown: broadcast::Sender<Signal>,
    serving: JoinHandle<()>,
    draining: JoinHandle<()>,
}

impl Harness {
    fn start(generator: Arc<dyn ContentGenerator>, gateway: Arc<ScriptedGateway>) -> Self {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let queues = JobQueues::with_clock(
            Arc::new(MemoryJobStore::new()),
            QueueConfig::default(),
            clock.clone(),
        );

        let (shutdown, _) = broadcast::channel(4);
        let recorder = Arc::new(MemoryRecorder::default());
        let (events, draining) = EventSink::spawn(recorder.clone(), 256, shutdown.subscribe());

        let config = DispatcherConfig {
            concurrency: 2,
            poll_interval_ms: 10,
            ..DispatcherConfig::default()
        };

        let dispatcher = Arc::new(Dispatcher::new(
            config,
            queues.clone(),
            Collaborators {
                composer: ContentComposer::new(generator),
                gateway,
                events,
            },
        ));

        let serving = tokio::spawn({
            let dispatcher = Arc::clone(&dispatcher);
            let rx = shutdown.subscribe();
            async move {
                dispatcher.serve(rx).await.unwrap();
            }
        });

        Self {
            queue: queues.queue(QUEUE).unwrap(),
            queues,
            clock,
            recorder,
            dispatcher,
            shutdown,
            serving,
            draining,
        }
    }

    async fn submit(&self, kind: &str, payload: serde_json::Value, options: JobOptions) -> JobId {
        let mut submission = JobSubmission::new(kind, payload);
        submission.options = options;
        self.queues.submit(QUEUE, submission).await.unwrap().id
    }

    /// Wait for a job to settle, fast-forwarding through retry backoff
    async fn settled(&self, id: JobId) -> Job {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                if let Some(job) = self.queue.get(&id).filter(|job| job.state.is_terminal()) {
                    return job;
                }
                self.clock.advance(60_000);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap()
    }

    async fn stop(self) -> Arc<MemoryRecorder> {
        self.shutdown.send(Signal::Shutdown).unwrap();
        self.serving.await.unwrap();
        self.draining.await.unwrap();
        assert!(!self.dispatcher.is_running());
        self.recorder
    }
}

fn template_payload() -> serde_json::Value {
    json!({
        "from": {"email": "news@turbomarket.io"},
        "template_name": "spring-sale",
        "template_data": {"discount": "20%"},
        "user_id": "u1",
        "recipients": [
            {"id": "r1", "email": "ada@example.com", "name": "Ada"},
            {"id": "r2", "email": "bounce@example.com"},
            {"id": "r3", "email": "grace@example.com", "custom_data": {"discount": "30%"}}
        ]
    })
}

#[tokio::test]
async fn test_launch_generation_completes_with_metadata() {
    let generator = Arc::new(
        ScriptedGenerator::new()
            .then_text(EMAIL)
            .then_image("https://img.example/hero.png"),
    );
    let harness = Harness::start(generator, Arc::new(ScriptedGateway::new()));

    let id = harness
        .submit(
            "generate-content",
            json!({"email_type": "launch", "audience_type": "new", "goal": "drive_clicks", "user_id": "u1"}),
            JobOptions::new().priority(1),
        )
        .await;

    let job = harness.settled(id).await;
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.priority, 1);
    assert_eq!(job.progress.as_percent(), 100);

    let result = job.result.unwrap();
    assert_eq!(result["metadata"]["email_type"], "launch");
    assert_eq!(result["hero_image_url"], "https://img.example/hero.png");
    assert!(result.get("delivery_job_id").is_none());

    let recorder = harness.stop().await;
    let started = recorder.named("email_generation_started");
    assert_eq!(started.len(), 1);
    assert_eq!(started[0].user_id, "u1");
    assert_eq!(started[0].session_id, id.to_string());

    let completed = recorder.named("email_generation_completed");
    let properties: serde_json::Value = serde_json::from_str(&completed[0].properties).unwrap();
    assert_eq!(properties["hasImage"], true);
}

#[tokio::test]
async fn test_send_single_succeeds_on_third_attempt() {
    let gateway = Arc::new(
        ScriptedGateway::new()
            .then_transport_error("connection reset")
            .then_transport_error("503"),
    );
    let harness = Harness::start(Arc::new(ScriptedGenerator::new()), gateway.clone());

    let id = harness
        .submit(
            "send-single",
            json!({
                "from": {"email": "news@turbomarket.io"},
                "to": [{"email": "ada@example.com"}],
                "subject": "Hello",
                "html": "<p>Hello</p>"
            }),
            JobOptions::new().max_attempts(3),
        )
        .await;

    let job = harness.settled(id).await;
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.attempt, 3);
    assert!(job.error.is_none());
    assert!(job.result.unwrap()["message_id"].is_string());
    assert_eq!(job.logs.len(), 2);
    assert_eq!(gateway.sent().len(), 1);

    let recorder = harness.stop().await;
    let statuses: Vec<String> = recorder
        .named("email_sent")
        .iter()
        .map(|row| {
            let properties: serde_json::Value = serde_json::from_str(&row.properties).unwrap();
            properties["status"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(statuses, vec!["failed", "failed", "success"]);
}

#[tokio::test]
async fn test_send_single_rejection_completes_with_failed_outcome() {
    let gateway = Arc::new(ScriptedGateway::new().reject_address("ada@example.com"));
    let harness = Harness::start(Arc::new(ScriptedGenerator::new()), gateway.clone());

    let id = harness
        .submit(
            "send-single",
            json!({
                "from": {"email": "news@turbomarket.io"},
                "to": [{"email": "ada@example.com"}],
                "subject": "Hello",
                "text": "Hello"
            }),
            JobOptions::new().max_attempts(3),
        )
        .await;

    let job = harness.settled(id).await;
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.attempt, 1);
    assert!(job.error.is_none());

    let result = job.result.unwrap();
    assert_eq!(result["status"], "failed");
    assert!(result["error"].as_str().unwrap().contains("ada@example.com"));
    assert!(result.get("message_id").is_none());
    assert!(gateway.sent().is_empty());

    let recorder = harness.stop().await;
    let sent = recorder.named("email_sent");
    assert_eq!(sent.len(), 1);
    let properties: serde_json::Value = serde_json::from_str(&sent[0].properties).unwrap();
    assert_eq!(properties["status"], "failed");
    assert_eq!(properties["recipient_email"], "ada@example.com");
}

#[tokio::test]
async fn test_template_send_reports_every_recipient() {
    let gateway = Arc::new(ScriptedGateway::new().reject_address("bounce@example.com"));
    let harness = Harness::start(Arc::new(ScriptedGenerator::new()), gateway.clone());

    let id = harness
        .submit("send-template", template_payload(), JobOptions::new())
        .await;

    let job = harness.settled(id).await;
    assert_eq!(job.state, JobState::Completed);

    let result = job.result.unwrap();
    assert_eq!(result["sent"], 2);
    assert_eq!(result["failed"], 1);
    assert_eq!(result["results"].as_array().unwrap().len(), 3);
    assert_eq!(result["results"][1]["recipient_id"], "r2");
    assert_eq!(result["results"][1]["status"], "failed");

    let (template, destinations) = gateway.bulk_calls().remove(0);
    assert_eq!(template.template_name, "spring-sale");
    assert_eq!(destinations[0].template_data["discount"], "20%");
    assert_eq!(destinations[2].template_data["discount"], "30%");

    let recorder = harness.stop().await;
    let rows = recorder.named("bulk_email_sent");
    let properties: serde_json::Value = serde_json::from_str(&rows[0].properties).unwrap();
    assert_eq!(
        properties,
        json!({"template_name": "spring-sale", "recipient_count": 3, "success_count": 2, "failed_count": 1})
    );
}

#[tokio::test]
async fn test_generation_chains_bulk_delivery() {
    let generator = Arc::new(ScriptedGenerator::new().then_text(EMAIL));
    let gateway = Arc::new(ScriptedGateway::new());
    let harness = Harness::start(generator, gateway.clone());

    let id = harness
        .submit(
            "generate-content",
            json!({
                "email_type": "winback",
                "audience_type": "lapsed",
                "goal": "convert",
                "user_id": "u1",
                "delivery": {
                    "from": {"email": "news@turbomarket.io", "name": "TurboMarket"},
                    "recipients": [
                        {"id": "r1", "email": "ada@example.com"},
                        {"id": "r2", "email": "grace@example.com"}
                    ]
                }
            }),
            JobOptions::new(),
        )
        .await;

    let job = harness.settled(id).await;
    assert_eq!(job.state, JobState::Completed);

    let delivery_id: JobId = job.result.unwrap()["delivery_job_id"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();

    let delivery = harness.settled(delivery_id).await;
    assert_eq!(delivery.state, JobState::Completed);
    assert_eq!(delivery.priority, 2);

    let summary = delivery.result.unwrap();
    assert_eq!((summary["sent"].as_u64(), summary["failed"].as_u64()), (Some(2), Some(0)));

    let sent = gateway.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].subject, "Launch day");
    assert_eq!(sent[0].tags["campaign_type"], "winback");
    assert_eq!(sent[1].tags["recipient_id"], "r2");
    assert!(sent[0].html.as_deref().unwrap().contains("<p>TurboMarket is live.</p>"));

    let recorder = harness.stop().await;
    assert_eq!(recorder.named("email_sent").len(), 2);
}

#[tokio::test]
async fn test_bulk_transport_failure_retries_whole_batch() {
    let generator = Arc::new(ScriptedGenerator::new().then_text(EMAIL));
    // The first recipient goes out, then the provider drops the connection
    let gateway = Arc::new(
        ScriptedGateway::new()
            .then_success()
            .then_transport_error("connection reset"),
    );
    let harness = Harness::start(generator, gateway.clone());

    let id = harness
        .submit(
            "generate-content",
            json!({"email_type": "promo", "audience_type": "all", "goal": "convert", "user_id": "u1"}),
            JobOptions::new(),
        )
        .await;
    let content = harness.settled(id).await.result.unwrap();

    let bulk_id = harness
        .submit(
            "send-bulk",
            json!({
                "content": content,
                "from": {"email": "news@turbomarket.io"},
                "recipients": [
                    {"id": "r1", "email": "ada@example.com"},
                    {"id": "r2", "email": "grace@example.com"}
                ],
                "idempotency_key": "campaign-7"
            }),
            JobOptions::new(),
        )
        .await;

    let job = harness.settled(bulk_id).await;
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.attempt, 2);
    assert_eq!(job.result.unwrap()["sent"], 2);

    // The retry starts the batch over, so r1 receives the message twice
    let sent = gateway.sent();
    let to: Vec<&str> = sent.iter().map(|envelope| envelope.to[0].email.as_str()).collect();
    assert_eq!(to, vec!["ada@example.com", "ada@example.com", "grace@example.com"]);
    assert!(sent.iter().all(|envelope| envelope.idempotency_key.as_deref() == Some("campaign-7")));

    harness.stop().await;
}

#[tokio::test]
async fn test_malformed_content_fails_without_retry() {
    let generator = Arc::new(ScriptedGenerator::new().then_text("Sure, here's a great email!"));
    let harness = Harness::start(generator, Arc::new(ScriptedGateway::new()));

    let id = harness
        .submit(
            "generate-content",
            json!({"email_type": "promo", "audience_type": "all", "goal": "convert", "user_id": "u1"}),
            JobOptions::new().max_attempts(3),
        )
        .await;

    let job = harness.settled(id).await;
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.attempt, 1);
    assert!(job.result.is_none());

    let error = job.error.unwrap();
    assert!(!error.retryable);
    assert_eq!(error.details.as_deref(), Some("Sure, here's a great email!"));

    harness.stop().await;
}

#[tokio::test]
async fn test_unknown_kind_never_reaches_the_queue() {
    let harness = Harness::start(Arc::new(ScriptedGenerator::new()), Arc::new(ScriptedGateway::new()));

    let err = harness
        .queues
        .submit(QUEUE, JobSubmission::new("send-fax", json!({})))
        .await
        .unwrap_err();

    assert!(matches!(err, QueueError::UnsupportedJobKind(kind) if kind == "send-fax"));
    assert_eq!(harness.queue.stats().pending(), 0);

    harness.stop().await;
}

#[tokio::test]
async fn test_running_flag_tracks_serve() {
    let harness = Harness::start(Arc::new(ScriptedGenerator::new()), Arc::new(ScriptedGateway::new()));
    let flag = harness.dispatcher.running_flag();

    tokio::time::timeout(Duration::from_secs(5), async {
        while !flag.load(std::sync::atomic::Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    assert!(harness.queue.health(harness.dispatcher.is_running()).is_healthy);
    harness.stop().await;
    assert!(!flag.load(std::sync::atomic::Ordering::SeqCst));
}

#[tokio::test]
async fn test_work_on_any_served_queue_wakes_the_dispatcher() {
    let queues = JobQueues::new(Arc::new(MemoryJobStore::new()), QueueConfig::default());
    let (shutdown, _) = broadcast::channel(4);
    let (events, draining) = EventSink::spawn(
        Arc::new(MemoryRecorder::default()),
        16,
        shutdown.subscribe(),
    );

    let config = DispatcherConfig {
        queues: vec!["generation".to_string(), "delivery".to_string()],
        delivery_queue: "delivery".to_string(),
        poll_interval_ms: 60_000,
        ..DispatcherConfig::default()
    };
    let dispatcher = Arc::new(Dispatcher::new(
        config,
        queues.clone(),
        Collaborators {
            composer: ContentComposer::new(Arc::new(ScriptedGenerator::new())),
            gateway: Arc::new(ScriptedGateway::new()),
            events,
        },
    ));

    let serving = tokio::spawn({
        let dispatcher = Arc::clone(&dispatcher);
        let rx = shutdown.subscribe();
        async move { dispatcher.serve(rx).await.unwrap() }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let submission = JobSubmission::new(
        "send-single",
        json!({
            "from": {"email": "news@turbomarket.io"},
            "to": [{"email": "ada@example.com"}],
            "subject": "Hello",
            "text": "Hello"
        }),
    );
    let id = queues.submit("delivery", submission).await.unwrap().id;
    let delivery = queues.queue("delivery").unwrap();

    // Well inside the poll interval
    tokio::time::timeout(Duration::from_secs(5), async {
        while !delivery
            .get(&id)
            .is_some_and(|job| job.state == JobState::Completed)
        {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    shutdown.send(Signal::Shutdown).unwrap();
    serving.await.unwrap();
    draining.await.unwrap();
}
