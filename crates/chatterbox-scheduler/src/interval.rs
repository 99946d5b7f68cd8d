//! Keyed fixed-period jobs on the tokio runtime.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chatterbox_core::error::{BotError, Result};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// What a job runs on every fire.
pub type Callback = Arc<dyn Fn() + Send + Sync>;

/// Longest allowed period, in seconds.
pub const MAX_PERIOD_SECS: u64 = i32::MAX as u64;

/// Job identifier for a trigger row, e.g. `repeat:1`.
pub fn job_key(kind: &str, id: i64) -> String {
    format!("{kind}:{id}")
}

struct Job {
    period: Duration,
    cancelled: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Fixed-period jobs keyed by string. The first fire is one period after
/// scheduling.
#[derive(Clone, Default)]
pub struct IntervalScheduler {
    jobs: Arc<Mutex<HashMap<String, Job>>>,
}

impl IntervalScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<String, Job>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start a job firing every `period_secs`. The key must be free.
    pub fn schedule_job(&self, key: &str, period_secs: u64, callback: Callback) -> Result<()> {
        if period_secs == 0 || period_secs > MAX_PERIOD_SECS {
            return Err(BotError::Validation(format!(
                "interval must be between 1 and {MAX_PERIOD_SECS} seconds, got {period_secs}"
            )));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| BotError::Config(format!("interval jobs need a tokio runtime: {e}")))?;

        let mut jobs = self.jobs();
        if jobs.get(key).is_some_and(|job| !job.handle.is_finished()) {
            return Err(BotError::Consistency(format!("job '{key}' is already scheduled")));
        }

        let period = Duration::from_secs(period_secs);
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if flag.load(Ordering::SeqCst) {
                    break;
                }
                callback();
            }
        });

        tracing::debug!("⏰ Job scheduled: {key} every {period_secs}s");
        jobs.insert(
            key.to_string(),
            Job {
                period,
                cancelled,
                handle,
            },
        );
        Ok(())
    }

    /// Stop a job. Returns false if no such job existed.
    pub fn cancel_job(&self, key: &str) -> bool {
        match self.jobs().remove(key) {
            Some(job) => {
                job.cancelled.store(true, Ordering::SeqCst);
                job.handle.abort();
                tracing::debug!("⏰ Job cancelled: {key}");
                true
            }
            None => false,
        }
    }

    pub fn is_scheduled(&self, key: &str) -> bool {
        self.jobs().contains_key(key)
    }

    pub fn period(&self, key: &str) -> Option<Duration> {
        self.jobs().get(key).map(|job| job.period)
    }

    /// Scheduled keys, sorted.
    pub fn job_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.jobs().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn job_count(&self) -> usize {
        self.jobs().len()
    }
}

/// Index of trigger jobs currently armed, shared by every trigger instance.
#[derive(Clone, Default)]
pub struct ActiveJobs {
    keys: Arc<Mutex<HashSet<String>>>,
}

impl ActiveJobs {
    fn keys_guard(&self) -> MutexGuard<'_, HashSet<String>> {
        self.keys.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns false if the key was already present.
    pub fn insert(&self, key: &str) -> bool {
        self.keys_guard().insert(key.to_string())
    }

    pub fn remove(&self, key: &str) -> bool {
        self.keys_guard().remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys_guard().contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys_guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.keys_guard().iter().cloned().collect();
        keys.sort();
        keys
    }
}
