//! Job Waiter
//!
//! Awaits completion of asynchronous mutations. Polling follows a
//! [`backoff::ExponentialBackoff`] schedule (a fixed cadence when the
//! multiplier is 1.0), the whole wait is bounded by a timeout, and a shared
//! [`CancellationToken`] aborts it early.

use crate::config::JobPollConfig;
use crate::domain::ports::{JobHandle, JobMonitor, JobStatus};
use crate::error::{Error, Result};
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Waits for jobs issued through a [`JobMonitor`]
#[derive(Debug, Clone)]
pub struct JobWaiter {
    interval: Duration,
    max_interval: Duration,
    multiplier: f64,
    timeout: Duration,
    cancel: CancellationToken,
}

impl JobWaiter {
    /// Create a waiter with explicit timings
    pub fn new(
        interval: Duration,
        max_interval: Duration,
        multiplier: f64,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            interval,
            max_interval: max_interval.max(interval),
            multiplier: multiplier.max(1.0),
            timeout,
            cancel,
        }
    }

    /// Create a waiter from configuration
    pub fn from_config(config: &JobPollConfig, cancel: CancellationToken) -> Self {
        Self::new(
            Duration::from_secs(config.interval_secs),
            Duration::from_secs(config.max_interval_secs),
            config.multiplier,
            Duration::from_secs(config.timeout_secs),
            cancel,
        )
    }

    /// Token that aborts in-flight waits
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Wait until the job succeeds.
    ///
    /// Returns `JobFailed` when the provider reports failure, `JobTimeout`
    /// or `JobCancelled` when the wait is abandoned, and the transport error
    /// itself when a poll cannot be completed.
    pub async fn wait<M>(&self, monitor: &M, handle: &JobHandle) -> Result<()>
    where
        M: JobMonitor + ?Sized,
    {
        if handle.is_immediate() {
            return Ok(());
        }

        let started = Instant::now();
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::JobCancelled {
                job: handle.to_string(),
            }),
            result = tokio::time::timeout(self.timeout, self.poll_until_done(monitor, handle)) => {
                match result {
                    Ok(outcome) => outcome,
                    Err(_) => Err(Error::JobTimeout {
                        job: handle.to_string(),
                        elapsed: started.elapsed(),
                    }),
                }
            }
        }
    }

    async fn poll_until_done<M>(&self, monitor: &M, handle: &JobHandle) -> Result<()>
    where
        M: JobMonitor + ?Sized,
    {
        let mut schedule = self.schedule();
        let mut polls = 0u32;

        loop {
            polls += 1;
            match monitor.poll_job(handle).await? {
                JobStatus::Success => {
                    debug!(job = %handle, polls, "Job completed");
                    return Ok(());
                }
                JobStatus::Failure(message) => {
                    return Err(Error::JobFailed {
                        job: handle.to_string(),
                        message,
                    });
                }
                JobStatus::Pending => {
                    let delay = schedule.next_backoff().unwrap_or(self.max_interval);
                    debug!(job = %handle, polls, ?delay, "Job pending");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn schedule(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.interval,
            initial_interval: self.interval,
            randomization_factor: 0.0,
            multiplier: self.multiplier,
            max_interval: self.max_interval,
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Monitor replaying a fixed script, then repeating its fallback
    struct ScriptedMonitor {
        script: Mutex<VecDeque<Result<JobStatus>>>,
        fallback: JobStatus,
        polls: Mutex<u32>,
    }

    impl ScriptedMonitor {
        fn new(script: Vec<Result<JobStatus>>, fallback: JobStatus) -> Self {
            Self {
                script: Mutex::new(script.into()),
                fallback,
                polls: Mutex::new(0),
            }
        }

        fn polls(&self) -> u32 {
            *self.polls.lock()
        }
    }

    #[async_trait]
    impl JobMonitor for ScriptedMonitor {
        async fn poll_job(&self, _handle: &JobHandle) -> Result<JobStatus> {
            *self.polls.lock() += 1;
            let next = self.script.lock().pop_front();
            next.unwrap_or_else(|| Ok(self.fallback.clone()))
        }
    }

    fn waiter(timeout_ms: u64) -> JobWaiter {
        JobWaiter::new(
            Duration::from_millis(2),
            Duration::from_millis(5),
            1.5,
            Duration::from_millis(timeout_ms),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_immediate_handle_is_not_polled() {
        let monitor = ScriptedMonitor::new(vec![], JobStatus::Pending);
        waiter(50)
            .wait(&monitor, &JobHandle::completed("lun-patch"))
            .await
            .unwrap();
        assert_eq!(monitor.polls(), 0);
    }

    #[tokio::test]
    async fn test_polls_until_success() {
        let monitor = ScriptedMonitor::new(
            vec![Ok(JobStatus::Pending), Ok(JobStatus::Pending)],
            JobStatus::Success,
        );
        waiter(1_000)
            .wait(&monitor, &JobHandle::cluster("job-1"))
            .await
            .unwrap();
        assert_eq!(monitor.polls(), 3);
    }

    #[tokio::test]
    async fn test_failure_carries_provider_message() {
        let monitor = ScriptedMonitor::new(
            vec![
                Ok(JobStatus::Pending),
                Ok(JobStatus::Failure("not enough space in aggregate".into())),
            ],
            JobStatus::Success,
        );
        let err = waiter(1_000)
            .wait(&monitor, &JobHandle::cluster("job-2"))
            .await
            .unwrap_err();
        assert_matches!(err, Error::JobFailed { ref message, .. } if message == "not enough space in aggregate");
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let monitor = ScriptedMonitor::new(vec![], JobStatus::Pending);
        let err = waiter(30)
            .wait(&monitor, &JobHandle::cluster("job-3"))
            .await
            .unwrap_err();
        assert_matches!(err, Error::JobTimeout { .. });
        assert!(monitor.polls() >= 2);
    }

    #[tokio::test]
    async fn test_cancelled_wait() {
        let monitor = ScriptedMonitor::new(vec![], JobStatus::Pending);
        let waiter = waiter(10_000);
        waiter.cancel_token().cancel();
        let err = waiter
            .wait(&monitor, &JobHandle::file_system("fs-1:1200"))
            .await
            .unwrap_err();
        assert_matches!(err, Error::JobCancelled { .. });
    }

    #[tokio::test]
    async fn test_transport_error_aborts_wait() {
        let monitor = ScriptedMonitor::new(
            vec![
                Ok(JobStatus::Pending),
                Err(Error::api_status("/api/cluster/jobs/job-4", 502, "bad gateway")),
            ],
            JobStatus::Success,
        );
        let err = waiter(1_000)
            .wait(&monitor, &JobHandle::cluster("job-4"))
            .await
            .unwrap_err();
        assert_matches!(err, Error::ApiStatus { status: 502, .. });
        assert_eq!(monitor.polls(), 2);
    }
}
