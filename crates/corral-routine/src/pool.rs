use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::breaker::{BreakerState, Routine};

/// Process-wide registry of supervised periodic tasks, one [`Routine`] per
/// key.
#[derive(Default)]
pub struct Pool {
    routines: Mutex<HashMap<String, Arc<Routine>>>,
    running: Arc<Mutex<HashSet<String>>>,
}

static GLOBAL: OnceLock<Pool> = OnceLock::new();

impl Pool {
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared process-wide pool.
    pub fn global() -> &'static Pool {
        GLOBAL.get_or_init(Pool::new)
    }

    /// Fetch or create the breaker for `key`.
    ///
    /// `threshold` and `reset_timeout` only apply when the breaker is first
    /// created; later callers share the existing one.
    pub fn routine(&self, key: &str, threshold: u32, reset_timeout: Duration) -> Arc<Routine> {
        let mut routines = self.routines.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            routines
                .entry(key.to_owned())
                .or_insert_with(|| Arc::new(Routine::new(threshold, reset_timeout))),
        )
    }

    /// Start a supervised loop for `key`, if one is not already running.
    ///
    /// Every `interval` the loop invokes `op` with a child of `token`, unless
    /// the key's breaker is open, in which case the tick is suppressed (the
    /// interval still elapses).  Operation errors are logged and advance the
    /// breaker; only cancelling `token` ends the loop.  A second call with a
    /// key that is still running is a no-op.
    pub fn start_loop<F, Fut>(
        &self,
        token: CancellationToken,
        key: &str,
        threshold: u32,
        reset_timeout: Duration,
        interval: Duration,
        op: F,
    ) where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        {
            let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
            if !running.insert(key.to_owned()) {
                debug!(key, "loop already running; ignoring start request");
                return;
            }
        }

        let routine = self.routine(key, threshold, reset_timeout);
        let running = Arc::clone(&self.running);
        let key = key.to_owned();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(key = %key, interval_ms = interval.as_millis() as u64, "loop started");
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if !routine.allowed() {
                            debug!(key = %key, "circuit open; tick suppressed");
                            continue;
                        }
                        match op(token.child_token()).await {
                            Ok(()) => routine.record_success(),
                            Err(e) => {
                                warn!(key = %key, error = %e, "supervised operation failed");
                                routine.record_failure();
                            }
                        }
                    }
                }
            }
            running
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&key);
            info!(key = %key, "loop stopped");
        });
    }

    /// Whether a loop for `key` is currently running.
    pub fn is_running(&self, key: &str) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(key)
    }

    /// Breaker state for `key`, if a routine exists.
    pub fn breaker_state(&self, key: &str) -> Option<BreakerState> {
        self.routines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .map(|r| r.state())
    }

    /// Snapshot of every known key and its breaker state.
    pub fn snapshot(&self) -> Vec<(String, BreakerState)> {
        self.routines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(k, r)| (k.clone(), r.state()))
            .collect()
    }
}
