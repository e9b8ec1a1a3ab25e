//! Deduplicated background task dispatch.
//!
//! Tasks are identified by (task name, dedup key). At most one instance per
//! identity is queued at a time and instances of the same identity run one
//! after another. A task that fails puts its identity into exponential backoff
//! so a permanently failing case does not hot-loop.

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const DEFAULT_BASE_BACKOFF: Duration = Duration::from_secs(30);
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(3600);

type TaskKey = (String, String);

/// What happened to a submission.
#[derive(Debug)]
pub enum Submission {
    Queued(JoinHandle<()>),
    /// An instance with the same identity is already waiting to run.
    Duplicate,
    /// The identity failed recently; retry after the given delay.
    BackingOff(Duration),
}

impl Submission {
    pub fn is_queued(&self) -> bool {
        matches!(self, Self::Queued(_))
    }
}

#[derive(Default)]
struct Slot {
    queued: bool,
    running: bool,
    /// Serializes instances of the same identity.
    gate: Arc<tokio::sync::Mutex<()>>,
}

struct Backoff {
    failures: u32,
    retry_at: Instant,
}

struct Inner {
    slots: Mutex<HashMap<TaskKey, Slot>>,
    backoff: Mutex<HashMap<TaskKey, Backoff>>,
    permits: Arc<Semaphore>,
    base_delay: Duration,
    max_delay: Duration,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Marks the slot idle when the task finishes or is dropped.
struct RunningGuard {
    inner: Arc<Inner>,
    key: TaskKey,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        let mut slots = lock(&self.inner.slots);
        if let Some(slot) = slots.get_mut(&self.key) {
            slot.running = false;
            if !slot.queued {
                slots.remove(&self.key);
            }
        }
    }
}

/// In-process task dispatcher.
#[derive(Clone)]
pub struct TaskDispatcher {
    inner: Arc<Inner>,
}

impl TaskDispatcher {
    pub fn new(concurrency: usize) -> Self {
        Self::with_backoff(concurrency, DEFAULT_BASE_BACKOFF, DEFAULT_MAX_BACKOFF)
    }

    pub fn with_backoff(concurrency: usize, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                slots: Mutex::new(HashMap::new()),
                backoff: Mutex::new(HashMap::new()),
                permits: Arc::new(Semaphore::new(concurrency.max(1))),
                base_delay,
                max_delay,
            }),
        }
    }

    /// Submit a task unless an instance with the same identity is already queued.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit<F, Fut, E>(&self, name: &str, key: impl Display, task: F) -> Submission
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let key: TaskKey = (name.to_string(), key.to_string());

        if let Some(remaining) = self.backoff_remaining(&key) {
            debug!(task = %key.0, key = %key.1, "Task backing off for {:?}", remaining);
            return Submission::BackingOff(remaining);
        }

        let gate = {
            let mut slots = lock(&self.inner.slots);
            let slot = slots.entry(key.clone()).or_default();
            if slot.queued {
                return Submission::Duplicate;
            }
            slot.queued = true;
            slot.gate.clone()
        };

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            let _turn = gate.lock_owned().await;
            let Ok(_permit) = inner.permits.clone().acquire_owned().await else {
                return;
            };

            {
                let mut slots = lock(&inner.slots);
                if let Some(slot) = slots.get_mut(&key) {
                    slot.queued = false;
                    slot.running = true;
                }
            }
            let _running = RunningGuard {
                inner: inner.clone(),
                key: key.clone(),
            };

            match task().await {
                Ok(()) => {
                    lock(&inner.backoff).remove(&key);
                }
                Err(e) => {
                    let delay = record_failure(&inner, &key);
                    warn!(
                        task = %key.0,
                        key = %key.1,
                        "Task failed, retrying no sooner than {:?}: {}",
                        delay,
                        e
                    );
                }
            }
        });

        Submission::Queued(handle)
    }

    fn backoff_remaining(&self, key: &TaskKey) -> Option<Duration> {
        let backoff = lock(&self.inner.backoff);
        backoff
            .get(key)
            .and_then(|b| b.retry_at.checked_duration_since(Instant::now()))
            .filter(|d| !d.is_zero())
    }

    /// Consecutive failures recorded for an identity.
    pub fn failures(&self, name: &str, key: impl Display) -> u32 {
        lock(&self.inner.backoff)
            .get(&(name.to_string(), key.to_string()))
            .map(|b| b.failures)
            .unwrap_or(0)
    }

    /// Whether an instance is queued or running.
    pub fn is_active(&self, name: &str, key: impl Display) -> bool {
        lock(&self.inner.slots)
            .get(&(name.to_string(), key.to_string()))
            .map(|s| s.queued || s.running)
            .unwrap_or(false)
    }
}

fn record_failure(inner: &Inner, key: &TaskKey) -> Duration {
    let mut backoff = lock(&inner.backoff);
    let entry = backoff.entry(key.clone()).or_insert(Backoff {
        failures: 0,
        retry_at: Instant::now(),
    });
    entry.failures = entry.failures.saturating_add(1);
    let delay = backoff_delay(inner.base_delay, inner.max_delay, entry.failures);
    entry.retry_at = Instant::now() + delay;
    delay
}

/// `base * 2^(failures - 1)`, capped at `max`.
fn backoff_delay(base: Duration, max: Duration, failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << exponent).min(max)
}
