//! Status polling until a job reaches a terminal state.

use crate::error::{ReflectError, Result};
use crate::job::{JobApi, JobHandle, JobStatus};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Message used when a job fails without an `error` field.
pub const GENERIC_FAILURE: &str = "Job failed";

/// Polling limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    /// Sleep between status checks, whatever their outcome.
    pub interval: Duration,
    /// Give up once this much time has passed. `None` polls forever.
    pub timeout: Option<Duration>,
    /// Give up after this many status checks. `None` means no cap.
    pub max_attempts: Option<u32>,
    /// Give up after this many failed status checks in a row.
    pub max_consecutive_errors: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1000),
            timeout: Some(Duration::from_secs(600)),
            max_attempts: None,
            max_consecutive_errors: 5,
        }
    }
}

impl PollConfig {
    /// Sets the polling interval.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets the overall deadline.
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Caps the number of status checks.
    pub fn max_attempts(mut self, max: Option<u32>) -> Self {
        self.max_attempts = max;
        self
    }

    /// Sets the consecutive error threshold (at least 1).
    pub fn max_consecutive_errors(mut self, max: u32) -> Self {
        self.max_consecutive_errors = max.max(1);
        self
    }
}

/// Snapshot passed to the progress callback after each status check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollProgress {
    /// Status checks made so far, starting at 1.
    pub attempt: u32,
    /// Last status seen, `None` if the check failed.
    pub status: Option<JobStatus>,
    /// Failed checks in a row, including this one.
    pub consecutive_errors: u32,
}

impl PollProgress {
    /// Number of dots (0..=3) for a rotating "working..." indicator.
    pub fn dots(&self) -> usize {
        (self.attempt % 4) as usize
    }
}

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cloneable handle for abandoning a poll.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    state: Arc<CancelState>,
}

impl CancelToken {
    /// Creates a token that has not fired.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires the token. Every clone observes it.
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
        self.state.notify.notify_waiters();
    }

    /// Returns true once [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Re-arms a fired token.
    pub fn reset(&self) {
        self.state.cancelled.store(false, Ordering::SeqCst);
    }

    /// Resolves when the token fires.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.state.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Polls `handle` until it completes, fails, or a client-side limit is hit.
///
/// Returns the full status body of the COMPLETED response. Transient status
/// check failures are logged and retried on the next tick until
/// `max_consecutive_errors` of them happen in a row.
pub async fn poll_until_terminal<A, F>(
    api: &A,
    handle: &JobHandle,
    config: &PollConfig,
    cancel: &CancelToken,
    mut on_progress: F,
) -> Result<Value>
where
    A: JobApi + ?Sized,
    F: FnMut(&PollProgress),
{
    let start = Instant::now();
    let mut attempt: u32 = 0;
    let mut consecutive_errors: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(ReflectError::Cancelled);
        }

        let deadline_passed = config.timeout.is_some_and(|t| start.elapsed() >= t);
        let attempts_exhausted = config.max_attempts.is_some_and(|max| attempt >= max);
        if deadline_passed || attempts_exhausted {
            return Err(ReflectError::Timeout {
                attempts: attempt,
                elapsed: start.elapsed(),
            });
        }

        attempt += 1;

        let status = match api.status(handle).await {
            Ok(report) => {
                consecutive_errors = 0;
                match report.status {
                    JobStatus::Completed => {
                        tracing::info!(
                            job_id = %handle,
                            attempt,
                            elapsed_ms = start.elapsed().as_millis() as u64,
                            "job completed"
                        );
                        return Ok(report.raw);
                    }
                    JobStatus::Failed => {
                        let message = report.error.unwrap_or_else(|| GENERIC_FAILURE.to_string());
                        tracing::info!(job_id = %handle, attempt, error = %message, "job failed");
                        return Err(ReflectError::JobFailed(message));
                    }
                    pending => {
                        tracing::debug!(
                            job_id = %handle,
                            attempt,
                            status = %pending,
                            elapsed_ms = start.elapsed().as_millis() as u64,
                            "job not finished"
                        );
                        Some(pending)
                    }
                }
            }
            Err(e) if e.is_transient() => {
                consecutive_errors += 1;
                tracing::warn!(
                    job_id = %handle,
                    attempt,
                    consecutive_errors,
                    "status check failed: {e}"
                );
                if consecutive_errors >= config.max_consecutive_errors {
                    return Err(ReflectError::TooManyPollErrors {
                        count: consecutive_errors,
                        last: e.to_string(),
                    });
                }
                None
            }
            Err(e) => return Err(e),
        };

        on_progress(&PollProgress {
            attempt,
            status,
            consecutive_errors,
        });

        tokio::select! {
            _ = tokio::time::sleep(config.interval) => {}
            _ = cancel.cancelled() => return Err(ReflectError::Cancelled),
        }
    }
}
