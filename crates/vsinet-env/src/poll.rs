//! Polling loops with an explicit interval, backoff and optional deadline.
//!
//! The external systems we wait on (container runtime, firmware daemons)
//! have no event notification, so waiting means asking again later.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Outcome of a poll that did not produce a value.
#[derive(Debug, Error)]
pub enum PollError<E> {
    /// The deadline elapsed before the probe reported completion.
    #[error("deadline of {deadline:?} elapsed after {attempts} attempts")]
    Deadline { deadline: Duration, attempts: u32 },

    /// The probe failed in a way that makes further polling pointless.
    #[error(transparent)]
    Probe(E),
}

/// How to repeat a probe until it reports completion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollPolicy {
    /// Delay before the second probe.
    pub interval: Duration,
    /// Upper bound for the delay once backoff kicks in.
    pub max_interval: Duration,
    /// Multiplier applied to the delay after each probe (1.0 = fixed).
    pub backoff: f64,
    /// Give up after this long; `None` waits forever.
    pub deadline: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::unbounded(Duration::from_secs(1))
    }
}

impl PollPolicy {
    /// Fixed interval, no deadline.
    pub fn unbounded(interval: Duration) -> Self {
        Self {
            interval,
            max_interval: interval,
            backoff: 1.0,
            deadline: None,
        }
    }

    /// Fixed interval with a deadline.
    pub fn fixed(interval: Duration, deadline: Duration) -> Self {
        Self::unbounded(interval).with_deadline(deadline)
    }

    /// Grow the delay by `factor` after each probe, capped at `max_interval`.
    pub fn with_backoff(mut self, factor: f64, max_interval: Duration) -> Self {
        self.backoff = if factor.is_finite() { factor.max(1.0) } else { 1.0 };
        self.max_interval = max_interval.max(self.interval);
        self
    }

    /// Give up after `deadline`.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Delay that follows `current`. Overflow saturates at `max_interval`.
    pub fn next_delay(&self, current: Duration) -> Duration {
        Duration::try_from_secs_f64(current.as_secs_f64() * self.backoff)
            .unwrap_or(self.max_interval)
            .min(self.max_interval)
    }

    /// Run `probe` until it yields `Some`.
    ///
    /// `Ok(None)` means "not yet"; `Err` aborts the poll immediately.
    pub async fn run<T, E, F, Fut>(&self, what: &str, mut probe: F) -> Result<T, PollError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        let start = Instant::now();
        let mut delay = self.interval;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            match probe().await {
                Ok(Some(value)) => {
                    tracing::debug!(
                        what,
                        attempts,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Poll completed"
                    );
                    return Ok(value);
                }
                Ok(None) => {}
                Err(e) => return Err(PollError::Probe(e)),
            }

            if let Some(deadline) = self.deadline {
                if start.elapsed() + delay > deadline {
                    tracing::warn!(
                        what,
                        attempts,
                        deadline_ms = deadline.as_millis() as u64,
                        "Poll deadline reached"
                    );
                    return Err(PollError::Deadline { deadline, attempts });
                }
            }

            tracing::trace!(
                what,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                "Not ready, polling again"
            );
            tokio::time::sleep(delay).await;
            delay = self.next_delay(delay);
        }
    }
}
