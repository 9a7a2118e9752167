use super::*;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use tokio::sync::Notify;

struct CountingScout {
    name: String,
    calls: Arc<AtomicUsize>,
    fail_first_n: u32,
    notify: Arc<Notify>,
}

#[async_trait]
impl Scout for CountingScout {
    fn name(&self) -> &str {
        &self.name
    }

    fn schedule(&self) -> ScoutSchedule {
        ScoutSchedule {
            interval: Duration::from_millis(20),
            run_on_startup: true,
        }
    }

    async fn execute(&self) -> anyhow::Result<Option<ScoutFinding>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) as u32;
        self.notify.notify_one();
        if n < self.fail_first_n {
            anyhow::bail!("simulated failure");
        }
        Ok(Some(ScoutFinding {
            scout: self.name.clone(),
            urgency: Urgency::Low,
            summary: "ok".into(),
        }))
    }
}

struct RecordingSink {
    audits: Arc<AtomicUsize>,
    digests: Arc<AtomicUsize>,
    escalations: Arc<AtomicU32>,
}

#[async_trait]
impl ScoutSink for RecordingSink {
    async fn audit(&self, _finding: &ScoutFinding) {
        self.audits.fetch_add(1, Ordering::SeqCst);
    }

    async fn digest(&self, _finding: &ScoutFinding, _high_priority: bool) {
        self.digests.fetch_add(1, Ordering::SeqCst);
    }

    async fn escalate(&self, _finding: &ScoutFinding) {
        self.escalations.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn backoff_doubles_and_caps() {
    assert_eq!(backoff_delay(1), Duration::from_secs(15));
    assert_eq!(backoff_delay(2), Duration::from_secs(30));
    assert_eq!(backoff_delay(3), Duration::from_secs(60));
    assert_eq!(backoff_delay(10), Duration::from_secs(MAX_BACKOFF_SECS));
}

#[test]
fn jitter_stays_within_ten_percent_above_interval() {
    let interval = Duration::from_secs(100);
    for _ in 0..50 {
        let delayed = jitter(interval);
        assert!(delayed >= interval);
        assert!(delayed <= interval + Duration::from_secs(10));
    }
}

#[tokio::test]
async fn low_urgency_goes_to_audit_only() {
    let audits = Arc::new(AtomicUsize::new(0));
    let digests = Arc::new(AtomicUsize::new(0));
    let escalations = Arc::new(AtomicU32::new(0));
    let sink: Arc<dyn ScoutSink> = Arc::new(RecordingSink {
        audits: audits.clone(),
        digests: digests.clone(),
        escalations: escalations.clone(),
    });

    route(
        &sink,
        &ScoutFinding {
            scout: "probe".into(),
            urgency: Urgency::Low,
            summary: "fine".into(),
        },
    )
    .await;

    assert_eq!(audits.load(Ordering::SeqCst), 1);
    assert_eq!(digests.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn high_urgency_with_escalate_calls_escalation() {
    let audits = Arc::new(AtomicUsize::new(0));
    let digests = Arc::new(AtomicUsize::new(0));
    let escalations = Arc::new(AtomicU32::new(0));
    let sink: Arc<dyn ScoutSink> = Arc::new(RecordingSink {
        audits: audits.clone(),
        digests: digests.clone(),
        escalations: escalations.clone(),
    });

    route(
        &sink,
        &ScoutFinding {
            scout: "probe".into(),
            urgency: Urgency::High { escalate: true },
            summary: "urgent".into(),
        },
    )
    .await;

    assert_eq!(digests.load(Ordering::SeqCst), 1);
    assert_eq!(escalations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn overlap_tick_is_skipped_while_previous_run_in_flight() {
    let calls = Arc::new(AtomicUsize::new(0));
    let notify = Arc::new(Notify::new());
    let scout = Arc::new(CountingScout {
        name: "slow".into(),
        calls: calls.clone(),
        fail_first_n: 0,
        notify: notify.clone(),
    });
    let state = Arc::new(ScoutState {
        running: Arc::new(Mutex::new(true)),
        consecutive_failures: Arc::new(Mutex::new(0)),
    });
    let audits = Arc::new(AtomicUsize::new(0));
    let sink: Arc<dyn ScoutSink> = Arc::new(RecordingSink {
        audits: audits.clone(),
        digests: Arc::new(AtomicUsize::new(0)),
        escalations: Arc::new(AtomicU32::new(0)),
    });

    run_tick(scout, state, sink).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn failure_increments_counter_and_success_resets_it() {
    let calls = Arc::new(AtomicUsize::new(0));
    let notify = Arc::new(Notify::new());
    let scout = Arc::new(CountingScout {
        name: "flaky".into(),
        calls: calls.clone(),
        fail_first_n: 2,
        notify,
    });
    let state = Arc::new(ScoutState {
        running: Arc::new(Mutex::new(false)),
        consecutive_failures: Arc::new(Mutex::new(0)),
    });
    let sink: Arc<dyn ScoutSink> = Arc::new(RecordingSink {
        audits: Arc::new(AtomicUsize::new(0)),
        digests: Arc::new(AtomicUsize::new(0)),
        escalations: Arc::new(AtomicU32::new(0)),
    });

    run_tick(scout.clone(), state.clone(), sink.clone()).await;
    assert_eq!(*state.consecutive_failures.lock().await, 1);

    run_tick(scout.clone(), state.clone(), sink.clone()).await;
    assert_eq!(*state.consecutive_failures.lock().await, 2);

    run_tick(scout, state.clone(), sink).await;
    assert_eq!(*state.consecutive_failures.lock().await, 0);
}
