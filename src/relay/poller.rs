//! Blocking-mode result polling.
//!
//! A run is fetched at a fixed interval until it completes, fails, or the
//! deadline passes. The deadline is checked after each fetch, so a slow last
//! fetch may overrun it slightly; it bounds the number of iterations, not
//! network latency.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use super::error::{RelayError, RelayResult};
use super::types::{RunState, RunStatus};

/// Deadline and fixed interval for one poll loop. No backoff, no jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub deadline: Duration,
    pub interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(60),
            interval: Duration::from_secs(2),
        }
    }
}

impl PollPolicy {
    /// Upper bound on status fetches for one run: ⌈deadline / interval⌉ + 1.
    pub fn max_fetches(&self) -> u64 {
        let interval = self.interval.as_nanos().max(1);
        let ticks = self.deadline.as_nanos().div_ceil(interval);
        u64::try_from(ticks).unwrap_or(u64::MAX).saturating_add(1)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollState {
    Waiting,
    Completed(serde_json::Value),
    Failed,
    TimedOut,
}

impl PollState {
    /// Next state after observing `status` at `elapsed` since polling began.
    pub fn next(status: &RunStatus, elapsed: Duration, policy: &PollPolicy) -> PollState {
        match status.status {
            Some(RunState::Completed) => PollState::Completed(status.result.clone()),
            Some(RunState::Failed) => PollState::Failed,
            _ if elapsed >= policy.deadline => PollState::TimedOut,
            _ => PollState::Waiting,
        }
    }
}

/// Time source for the poll loop.
pub trait Clock {
    /// Time since the clock was started.
    fn elapsed(&self) -> Duration;

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

/// Wall clock backed by the tokio timer; sleeping yields to other tasks.
pub struct TokioClock {
    started: tokio::time::Instant,
}

impl TokioClock {
    pub fn start() -> Self {
        Self {
            started: tokio::time::Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}

/// Drive one run to a terminal state and return its result payload.
pub async fn poll_run<C, F, Fut>(
    clock: &C,
    policy: &PollPolicy,
    mut fetch: F,
) -> RelayResult<serde_json::Value>
where
    C: Clock,
    F: FnMut() -> Fut,
    Fut: Future<Output = RelayResult<RunStatus>>,
{
    let mut fetches: u64 = 0;

    loop {
        let status = fetch().await?;
        fetches += 1;

        match PollState::next(&status, clock.elapsed(), policy) {
            PollState::Completed(result) => {
                debug!(fetches, "Run completed");
                return Ok(result);
            }
            PollState::Failed => {
                warn!(fetches, "Run failed upstream");
                return Err(RelayError::TaskFailed);
            }
            PollState::TimedOut => {
                warn!(
                    fetches,
                    deadline_secs = policy.deadline.as_secs_f64(),
                    "Gave up polling run"
                );
                return Err(RelayError::PollTimeout);
            }
            PollState::Waiting => clock.sleep(policy.interval).await,
        }
    }
}
