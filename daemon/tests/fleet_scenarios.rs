mod common;

use async_trait::async_trait;
use common::harness;
use festa_daemon::core::storage::SledStorage;
use festa_common::api::Paging;
use festa_daemon::{
    core::{audit::AuditSink, storage::DeadLetterProvider},
    jobs::{
        handlers::{register_builtin, HandlerDeps},
        task::{QueueClass, TaskError, TaskOptions},
        worker::replay_dead_letter,
        Enqueuer, FleetConfig, JobFleet, MemoryBroker, QueueBroker, RegistryBuilder,
    },
    providers::{LogMailer, MemoryObjectStore, SendError, SmsGateway},
};
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};

// Fails transiently a configured number of times, then succeeds.
// Unroutable numbers (+0...) fail permanently like a real gateway.
struct FlakySmsGateway {
    calls: AtomicU32,
    transient_failures: u32,
}

#[async_trait]
impl SmsGateway for FlakySmsGateway {
    async fn send(&self, to: &str, _text: &str) -> Result<String, SendError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

        if to.starts_with("+0") {
            return Err(SendError::Permanent {
                code: "unroutable".to_string(),
                message: format!("no route to {}", to),
            });
        }
        if call <= self.transient_failures {
            return Err(SendError::Transient("gateway hiccup".to_string()));
        }
        Ok(format!("provider-{}", call))
    }
}

struct Fleet {
    h: common::Harness,
    broker: Arc<MemoryBroker>,
    enqueuer: Enqueuer,
    fleet: JobFleet,
    sms: Arc<FlakySmsGateway>,
}

async fn fleet_with(transient_failures: u32, extra: impl FnOnce(&mut RegistryBuilder)) -> Fleet {
    let h = harness().await;
    let broker = Arc::new(MemoryBroker::new());
    let sms = Arc::new(FlakySmsGateway {
        calls: AtomicU32::new(0),
        transient_failures,
    });

    let mut registry = RegistryBuilder::new();
    register_builtin(
        &mut registry,
        &HandlerDeps {
            storage: h.storage.clone(),
            ledger: h.ledger.clone(),
            sync: h.sync.clone(),
            mailer: Arc::new(LogMailer),
            sms: sms.clone(),
            objects: Arc::new(MemoryObjectStore::new()),
            audit: AuditSink::log_only(),
        },
    );
    extra(&mut registry);
    let dispatcher = registry.build();

    let queue_broker: Arc<dyn QueueBroker> = broker.clone();
    let enqueuer = Enqueuer::new(queue_broker.clone(), dispatcher.clone());
    let fleet = JobFleet::start(
        queue_broker,
        dispatcher,
        h.storage.clone(),
        FleetConfig {
            critical_workers: 1,
            default_workers: 2,
            low_workers: 1,
        },
    );

    Fleet {
        h,
        broker,
        enqueuer,
        fleet,
        sms,
    }
}

async fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

async fn wait_for_dead_letters(
    storage: &Arc<SledStorage>,
    count: usize,
    deadline: Duration,
) -> bool {
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        let entries = storage.list_dead_letters(Paging::default()).await.unwrap();
        if entries.len() == count {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
async fn sms_task_retries_then_succeeds() {
    let f = fleet_with(2, |_| {}).await;

    f.enqueuer
        .enqueue(
            "sms.send",
            serde_json::json!({"to": "+33600000001", "text": "doors open 18h"}),
            TaskOptions::default(),
        )
        .await
        .unwrap();

    // Two transient failures, backoff 1s then 2s, third attempt lands
    let delivered = wait_until(Duration::from_secs(10), || {
        f.sms.calls.load(Ordering::SeqCst) == 3
    })
    .await;
    assert!(delivered, "expected three gateway invocations");

    // Settled: no retry scheduled, no dead letter
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(f.sms.calls.load(Ordering::SeqCst), 3);
    assert!(f
        .h
        .storage
        .list_dead_letters(Paging::default())
        .await
        .unwrap()
        .is_empty());

    f.fleet.stop().await;
}

#[tokio::test]
async fn unroutable_sms_fails_permanently_without_retry() {
    let f = fleet_with(0, |_| {}).await;

    f.enqueuer
        .enqueue(
            "sms.send",
            serde_json::json!({"to": "+0000", "text": "hi"}),
            TaskOptions::default(),
        )
        .await
        .unwrap();

    let attempted = wait_until(Duration::from_secs(5), || {
        f.sms.calls.load(Ordering::SeqCst) == 1
    })
    .await;
    assert!(attempted);

    // One invocation, task done: no retries, no dead letter
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(f.sms.calls.load(Ordering::SeqCst), 1);
    assert!(f
        .h
        .storage
        .list_dead_letters(Paging::default())
        .await
        .unwrap()
        .is_empty());
    assert_eq!(f.broker.queue_len(QueueClass::Default).await.unwrap(), 0);

    f.fleet.stop().await;
}

#[tokio::test]
async fn exhausted_retries_archive_to_dead_letter() {
    let calls = Arc::new(AtomicU32::new(0));
    let handler_calls = calls.clone();

    let f = fleet_with(0, move |registry| {
        registry.register(
            "test.fail",
            QueueClass::Default,
            1,
            Duration::from_secs(5),
            move |_ctx, _payload| {
                let calls = handler_calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(TaskError::transient(anyhow::anyhow!("boom")))
                }
            },
        );
    })
    .await;

    f.enqueuer
        .enqueue("test.fail", serde_json::json!({"n": 1}), TaskOptions::default())
        .await
        .unwrap();

    // Initial attempt plus one retry, then the archive
    let archived = wait_for_dead_letters(&f.h.storage, 1, Duration::from_secs(10)).await;
    assert!(archived, "expected a dead letter");
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let entries = f.h.storage.list_dead_letters(Paging::default()).await.unwrap();
    let entry = &entries[0];
    assert_eq!(entry.kind, "test.fail");
    assert_eq!(entry.retry_count, 2);
    assert!(entry.last_error.contains("boom"));
    assert_eq!(entry.payload_value()["n"], 1);

    // Manual replay puts it back on the queue with a fresh budget
    let replayed = replay_dead_letter(&f.h.storage, &f.enqueuer, &entry.task_id)
        .await
        .unwrap();
    assert!(replayed.is_some());
    assert!(f
        .h
        .storage
        .list_dead_letters(Paging::default())
        .await
        .unwrap()
        .is_empty());

    f.fleet.stop().await;
}

#[tokio::test]
async fn panicking_handler_is_caught_and_archived() {
    let f = fleet_with(0, |registry| {
        registry.register(
            "test.panic",
            QueueClass::Default,
            0,
            Duration::from_secs(5),
            |_ctx, _payload| async {
                panic!("handler exploded");
            },
        );
    })
    .await;

    f.enqueuer
        .enqueue("test.panic", serde_json::Value::Null, TaskOptions::default())
        .await
        .unwrap();

    let archived = wait_for_dead_letters(&f.h.storage, 1, Duration::from_secs(5)).await;
    assert!(archived);

    let entries = f.h.storage.list_dead_letters(Paging::default()).await.unwrap();
    assert!(entries[0].last_error.contains("panic"));
    assert!(entries[0].last_error.contains("handler exploded"));

    f.fleet.stop().await;
}

#[tokio::test]
async fn timed_out_handler_is_retried() {
    let attempts = Arc::new(AtomicU32::new(0));
    let handler_attempts = attempts.clone();

    let f = fleet_with(0, move |registry| {
        registry.register(
            "test.slow",
            QueueClass::Default,
            1,
            Duration::from_millis(100),
            move |_ctx, _payload| {
                let attempts = handler_attempts.clone();
                async move {
                    let attempt = attempts.fetch_add(1, Ordering::SeqCst);
                    if attempt == 0 {
                        // First attempt blows through the timeout
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                    Ok(())
                }
            },
        );
    })
    .await;

    f.enqueuer
        .enqueue("test.slow", serde_json::Value::Null, TaskOptions::default())
        .await
        .unwrap();

    let retried = wait_until(Duration::from_secs(10), || {
        attempts.load(Ordering::SeqCst) == 2
    })
    .await;
    assert!(retried, "expected a second attempt after the timeout");

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(f
        .h
        .storage
        .list_dead_letters(Paging::default())
        .await
        .unwrap()
        .is_empty());

    f.fleet.stop().await;
}

#[tokio::test]
async fn enqueue_idempotency_key_deduplicates() {
    let f = fleet_with(10, |_| {}).await;

    let options = || TaskOptions {
        idempotency_key: Some("sms-once".to_string()),
        ..Default::default()
    };

    f.enqueuer
        .enqueue("sms.send", serde_json::json!({"to": "+33600000001", "text": "a"}), options())
        .await
        .unwrap();
    let duplicate = f
        .enqueuer
        .enqueue("sms.send", serde_json::json!({"to": "+33600000001", "text": "a"}), options())
        .await;
    assert!(duplicate.is_err());

    f.fleet.stop().await;
}

#[tokio::test]
async fn graceful_shutdown_finishes_active_task() {
    let started = Arc::new(AtomicBool::new(false));
    let finished = Arc::new(AtomicBool::new(false));
    let handler_started = started.clone();
    let handler_finished = finished.clone();

    let f = fleet_with(0, move |registry| {
        registry.register(
            "test.linger",
            QueueClass::Default,
            0,
            Duration::from_secs(5),
            move |_ctx, _payload| {
                let started = handler_started.clone();
                let finished = handler_finished.clone();
                async move {
                    started.store(true, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    finished.store(true, Ordering::SeqCst);
                    Ok(())
                }
            },
        );
    })
    .await;

    f.enqueuer
        .enqueue("test.linger", serde_json::Value::Null, TaskOptions::default())
        .await
        .unwrap();

    let running = wait_until(Duration::from_secs(5), || started.load(Ordering::SeqCst)).await;
    assert!(running);

    // Stop while the task is mid-flight: it must complete first
    f.fleet.stop().await;
    assert!(finished.load(Ordering::SeqCst));
}
