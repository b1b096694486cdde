use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Where the breaker currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Operations run normally.
    Closed,
    /// Operations are suppressed until the reset timeout elapses.
    Open,
    /// One probe operation is allowed; its outcome decides the next state.
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// A single circuit breaker plus its retry helper.
///
/// State transitions:
/// - `Closed -> Open` after `threshold` consecutive failures.
/// - `Open -> HalfOpen` once `reset_timeout` has elapsed since opening.
/// - `HalfOpen -> Closed` on one success; `HalfOpen -> Open` on one failure
///   (the reset timer restarts).
#[derive(Debug)]
pub struct Routine {
    threshold: u32,
    reset_timeout: Duration,
    inner: Mutex<Inner>,
}

impl Routine {
    pub fn new(threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            threshold,
            reset_timeout,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    /// Whether an operation may run right now.
    ///
    /// An open breaker whose reset timeout has elapsed transitions to
    /// half-open here, admitting the probe.
    pub fn allowed(&self) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.reset_timeout {
                    inner.state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful operation.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.state = BreakerState::Closed;
    }

    /// Record a failed operation.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
            }
            BreakerState::Open => {}
        }
    }

    /// Trip the breaker immediately.
    pub fn force_open(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.state = BreakerState::Open;
        inner.opened_at = Some(Instant::now());
    }

    /// Current state, without admitting a probe.
    pub fn state(&self) -> BreakerState {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).state
    }

    /// Run `op` up to `max_attempts` times with `backoff` between attempts,
    /// recording each outcome in the breaker.  Returns the first success or
    /// the last error.
    pub async fn execute_with_retry<T, F, Fut>(
        &self,
        token: &CancellationToken,
        backoff: Duration,
        max_attempts: u32,
        op: F,
    ) -> anyhow::Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let mut last_err = anyhow::anyhow!("operation was never attempted");
        for attempt in 1..=max_attempts {
            if token.is_cancelled() {
                return Err(anyhow::anyhow!("cancelled"));
            }
            if !self.allowed() {
                return Err(anyhow::anyhow!("circuit breaker is open"));
            }
            match op().await {
                Ok(value) => {
                    self.record_success();
                    return Ok(value);
                }
                Err(e) => {
                    warn!(attempt, max_attempts, error = %e, "attempt failed");
                    self.record_failure();
                    last_err = e;
                    if attempt < max_attempts {
                        tokio::select! {
                            _ = token.cancelled() => return Err(anyhow::anyhow!("cancelled")),
                            _ = tokio::time::sleep(backoff) => {}
                        }
                    }
                }
            }
        }
        debug!(max_attempts, "all attempts exhausted");
        Err(last_err)
    }
}
