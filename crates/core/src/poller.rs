//! Fixed-interval polling of a remote generation job.
//!
//! [`wait_for_job`] queries the job status until it is ready, failed,
//! or the wait budget is spent. Each individual status query goes
//! through the [`RetryPolicy`] so network blips do not end the wait;
//! the wait budget itself is independent of the retry schedule.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::StageError;
use crate::job::{JobStatus, RemoteJob};
use crate::retry::RetryPolicy;

/// Anything that can report the status of a remote job.
#[async_trait]
pub trait JobStatusSource: Send + Sync {
    async fn job_status(&self, job_id: &str) -> Result<JobStatus, StageError>;
}

/// Polling cadence and wait budget.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Fixed delay between status queries.
    pub interval: Duration,
    /// Maximum total time to wait for a terminal status.
    pub max_wait: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            max_wait: Duration::from_secs(600),
        }
    }
}

/// Poll `job` until it reaches a terminal state.
///
/// Returns the result URI when the job becomes ready. Fails with
/// [`StageError::GenerationFailed`] as soon as the service reports a
/// failure, with [`StageError::GenerationTimeout`] once `max_wait` has
/// elapsed, or with the status query's own error if the retry policy
/// gives up on it.
pub async fn wait_for_job<S>(
    source: &S,
    job: &mut RemoteJob,
    config: &PollConfig,
    retry: &RetryPolicy,
) -> Result<String, StageError>
where
    S: JobStatusSource + ?Sized,
{
    let started = Instant::now();
    // A wait budget too large to represent has no deadline.
    let deadline = started.checked_add(config.max_wait);
    let mut polls = 0u32;

    loop {
        polls += 1;
        let job_id = job.job_id.as_str();
        let status = retry
            .run("job_status", || source.job_status(job_id))
            .await?;

        job.observe(&status);
        match status {
            JobStatus::Ready { result_uri } => {
                tracing::info!(
                    job_id = %job.job_id,
                    polls,
                    elapsed_secs = started.elapsed().as_secs(),
                    "Generation job ready",
                );
                return Ok(result_uri);
            }
            JobStatus::Failed { reason } => {
                tracing::error!(job_id = %job.job_id, polls, reason = %reason, "Generation job failed");
                return Err(StageError::GenerationFailed {
                    job_id: job.job_id.clone(),
                    reason,
                });
            }
            JobStatus::Unrecognized(raw) => {
                tracing::warn!(
                    job_id = %job.job_id,
                    status = %raw,
                    "Unrecognized job status, continuing to poll",
                );
            }
            JobStatus::Queued | JobStatus::Running => {}
        }

        let now = Instant::now();
        if deadline.is_some_and(|deadline| now >= deadline) {
            job.time_out();
            let waited_secs = now.duration_since(started).as_secs();
            tracing::error!(job_id = %job.job_id, polls, waited_secs, "Generation job timed out");
            return Err(StageError::GenerationTimeout {
                job_id: job.job_id.clone(),
                waited_secs,
            });
        }

        tracing::debug!(job_id = %job.job_id, polls, state = ?job.state, "Generation job not finished yet");
        let pause = match deadline {
            Some(deadline) => config.interval.min(deadline - now),
            None => config.interval,
        };
        tokio::time::sleep(pause).await;
    }
}
