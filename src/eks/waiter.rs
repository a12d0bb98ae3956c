//! Poll-until-terminal waiter with a deadline and capped backoff.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::error::{Result, UpdaterError};

/// Result of one status poll.
#[derive(Debug)]
pub enum Poll<T> {
    /// Terminal success state reached.
    Ready(T),
    /// Still transitioning; carries the observed status for logging.
    Pending(String),
    /// Terminal failure state reached; carries the observed status.
    Failed(String),
}

impl<T> Poll<T> {
    /// Replace the ready value, keeping pending and failed states.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Poll<U> {
        match self {
            Self::Ready(value) => Poll::Ready(f(value)),
            Self::Pending(status) => Poll::Pending(status),
            Self::Failed(status) => Poll::Failed(status),
        }
    }
}

/// How long and how often to poll.
#[derive(Debug, Clone, PartialEq)]
pub struct WaitPolicy {
    /// Overall deadline for reaching a terminal state.
    pub timeout: Duration,
    /// Delay before the second poll.
    pub initial_interval: Duration,
    /// Upper bound for the delay between polls.
    pub max_interval: Duration,
    /// Growth factor applied to the delay after each pending poll.
    pub backoff_multiplier: f64,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20 * 60),
            initial_interval: Duration::from_secs(30),
            max_interval: Duration::from_secs(120),
            backoff_multiplier: 1.5,
        }
    }
}

impl WaitPolicy {
    /// Default polling cadence with the given deadline.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Default::default()
        }
    }

    /// Override the first poll delay, keeping the cap at least as large.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self.max_interval = self.max_interval.max(interval);
        self
    }

    fn next_interval(&self, current: Duration) -> Duration {
        Duration::try_from_secs_f64(current.as_secs_f64() * self.backoff_multiplier.max(1.0))
            .unwrap_or(self.max_interval)
            .min(self.max_interval)
    }

    /// Deadline for a wait starting at `started`.
    ///
    /// Timeouts too large for the clock fall back to roughly thirty years.
    fn deadline_from(&self, started: Instant) -> Instant {
        started
            .checked_add(self.timeout)
            .unwrap_or_else(|| started + FAR_FUTURE)
    }

    fn timeout_error(&self, resource: &str, status: &str) -> UpdaterError {
        UpdaterError::UpdateTimeout {
            operation: format!("{resource} update"),
            details: format!(
                "still {} after {} minutes",
                status,
                self.timeout.as_secs() / 60
            ),
        }
    }
}

const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Poll until `poll` reports a terminal state or the deadline passes.
///
/// `resource` names the component in log lines and errors. Errors returned by
/// `poll` itself abort the wait immediately. A single poll that has not
/// answered by the deadline ends the wait with a timeout.
pub async fn wait_until_terminal<T, F, Fut>(
    policy: &WaitPolicy,
    resource: &str,
    mut poll: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Poll<T>>>,
{
    let started = Instant::now();
    let deadline = policy.deadline_from(started);
    let mut interval = policy.initial_interval;
    let mut attempt = 0u32;
    let mut last_status = String::from("unanswered");

    loop {
        attempt += 1;

        let polled = match tokio::time::timeout_at(deadline, poll()).await {
            Ok(polled) => polled?,
            Err(_) => {
                debug!(resource = %resource, attempt, "Status poll did not answer before the deadline");
                return Err(policy.timeout_error(resource, &last_status));
            }
        };

        match polled {
            Poll::Ready(value) => {
                debug!(
                    resource = %resource,
                    attempt,
                    elapsed_secs = started.elapsed().as_secs(),
                    "Terminal state reached"
                );
                return Ok(value);
            }
            Poll::Failed(status) => {
                return Err(UpdaterError::UpdateFailed {
                    resource: resource.to_string(),
                    status,
                });
            }
            Poll::Pending(status) => {
                let now = Instant::now();
                if now >= deadline {
                    return Err(policy.timeout_error(resource, &status));
                }

                let delay = interval.min(deadline - now);
                debug!(
                    resource = %resource,
                    status = %status,
                    attempt,
                    next_poll_secs = delay.as_secs(),
                    "Waiting for terminal state"
                );
                tokio::time::sleep(delay).await;
                interval = policy.next_interval(interval);
                last_status = status;
            }
        }
    }
}
