//! Background scouts: periodic probes that run alongside an agent's turns
//! and route their findings by urgency.
//!
//! Grounded on `cron::service::CronService`: the `Arc<Mutex<bool>>` running
//! flag, `tokio::spawn`'d polling loop, and `TaskTracker`-based task
//! lifecycle are reused. Unlike the teacher's durable per-job JSON store,
//! scout state is process-lifetime only (consecutive failure count,
//! last-run instant, overlap guard) since scouts are not persisted cron
//! jobs.

use crate::utils::task_tracker::TaskTracker;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

const MAX_BACKOFF_SECS: u64 = 300;
const BASE_BACKOFF_SECS: u64 = 15;

/// How urgent a scout's finding is, determining where it's routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Urgency {
    Low,
    Medium,
    High { escalate: bool },
}

#[derive(Debug, Clone)]
pub struct ScoutFinding {
    pub scout: String,
    pub urgency: Urgency,
    pub summary: String,
}

/// One scheduled interval, with an optional immediate first run.
#[derive(Debug, Clone, Copy)]
pub struct ScoutSchedule {
    pub interval: Duration,
    pub run_on_startup: bool,
}

/// A background probe. Implementors should be cheap to construct and hold
/// only the state needed to run one tick.
#[async_trait]
pub trait Scout: Send + Sync {
    fn name(&self) -> &str;
    fn schedule(&self) -> ScoutSchedule;
    async fn execute(&self) -> anyhow::Result<Option<ScoutFinding>>;
}

struct ScoutState {
    running: Arc<Mutex<bool>>,
    consecutive_failures: Arc<Mutex<u32>>,
}

/// Routes scout findings to their destinations: an audit sink for `low`,
/// a digest ring for `medium`/`high`, and an escalation callback for
/// `high { escalate: true }`.
#[async_trait]
pub trait ScoutSink: Send + Sync {
    async fn audit(&self, finding: &ScoutFinding);
    async fn digest(&self, finding: &ScoutFinding, high_priority: bool);
    async fn escalate(&self, finding: &ScoutFinding);
}

/// Owns the set of registered scouts and their running tasks.
pub struct ScoutScheduler {
    tasks: Arc<TaskTracker>,
    states: Mutex<HashMap<String, Arc<ScoutState>>>,
    sink: Arc<dyn ScoutSink>,
}

impl ScoutScheduler {
    pub fn new(sink: Arc<dyn ScoutSink>) -> Self {
        Self {
            tasks: Arc::new(TaskTracker::new()),
            states: Mutex::new(HashMap::new()),
            sink,
        }
    }

    /// Register and start a scout. Replaces any existing scout of the same name.
    pub async fn register(&self, scout: Arc<dyn Scout>) {
        let name = scout.name().to_string();
        let state = Arc::new(ScoutState {
            running: Arc::new(Mutex::new(false)),
            consecutive_failures: Arc::new(Mutex::new(0)),
        });
        self.states
            .lock()
            .await
            .insert(name.clone(), state.clone());

        let sink = self.sink.clone();
        let schedule = scout.schedule();
        self.tasks
            .spawn_auto_cleanup(format!("scout:{name}"), async move {
                if !schedule.run_on_startup {
                    tokio::time::sleep(jitter(schedule.interval)).await;
                }
                loop {
                    run_tick(scout.clone(), state.clone(), sink.clone()).await;
                    let delay = next_delay(schedule, state.clone()).await;
                    tokio::time::sleep(delay).await;
                }
            })
            .await;
        info!("scout '{}' registered", name);
    }

    pub async fn deregister(&self, name: &str) {
        self.states.lock().await.remove(name);
        // The running task is left to its own loop; in practice callers
        // stop the whole scheduler via `shutdown` rather than individual
        // scouts, since there is no per-task cancel in `TaskTracker`.
    }

    pub async fn shutdown(&self) {
        self.tasks.cancel_all().await;
    }
}

async fn next_delay(schedule: ScoutSchedule, state: Arc<ScoutState>) -> Duration {
    let failures = *state.consecutive_failures.lock().await;
    if failures == 0 {
        jitter(schedule.interval)
    } else {
        backoff_delay(failures)
    }
}

fn backoff_delay(consecutive_failures: u32) -> Duration {
    let secs = BASE_BACKOFF_SECS.saturating_mul(1u64 << consecutive_failures.saturating_sub(1).min(63));
    Duration::from_secs(secs.min(MAX_BACKOFF_SECS))
}

/// Jitter up to 10% of the interval, applied on startup and every recurrence.
fn jitter(interval: Duration) -> Duration {
    let jitter_ms = (interval.as_millis() as f64 * 0.10) as u64;
    if jitter_ms == 0 {
        return interval;
    }
    let extra = fastrand::u64(0..=jitter_ms);
    interval + Duration::from_millis(extra)
}

async fn run_tick(scout: Arc<dyn Scout>, state: Arc<ScoutState>, sink: Arc<dyn ScoutSink>) {
    {
        let mut running = state.running.lock().await;
        if *running {
            warn!("scout '{}' tick skipped: previous run still in flight", scout.name());
            return;
        }
        *running = true;
    }

    let start = Instant::now();
    let result = scout.execute().await;
    *state.running.lock().await = false;

    match result {
        Ok(found) => {
            *state.consecutive_failures.lock().await = 0;
            if let Some(finding) = found {
                route(&sink, &finding).await;
            }
        }
        Err(err) => {
            let mut failures = state.consecutive_failures.lock().await;
            *failures += 1;
            error!(
                "scout '{}' failed after {:?} (consecutive failures: {}): {}",
                scout.name(),
                start.elapsed(),
                *failures,
                err
            );
        }
    }
}

async fn route(sink: &Arc<dyn ScoutSink>, finding: &ScoutFinding) {
    match finding.urgency {
        Urgency::Low => sink.audit(finding).await,
        Urgency::Medium => sink.digest(finding, false).await,
        Urgency::High { escalate } => {
            sink.digest(finding, true).await;
            if escalate {
                sink.escalate(finding).await;
            }
        }
    }
}

#[cfg(test)]
mod tests;
