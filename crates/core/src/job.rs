//! Remote generation job model.
//!
//! A [`RemoteJob`] is created when a generation request is accepted and
//! only moves forward through [`RemoteJob::observe`], which applies one
//! polled [`JobStatus`]. Terminal states never change again.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a remote generation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Submitted,
    Processing,
    Ready,
    Failed,
    TimedOut,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ready | Self::Failed | Self::TimedOut)
    }
}

/// One status observation returned by the remote service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    /// Accepted but not started (queued).
    Queued,
    /// Work in progress.
    Running,
    /// Finished; the result can be fetched from `result_uri`.
    Ready { result_uri: String },
    /// The service gave up on the job.
    Failed { reason: String },
    /// A status value this client does not know. Treated as in progress.
    Unrecognized(String),
}

/// A job submitted to the music-generation service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteJob {
    pub job_id: String,
    pub state: JobState,
    /// Present only when `state == Ready`.
    pub result_uri: Option<String>,
    /// Failure reason reported by the service, when `state == Failed`.
    pub failure_reason: Option<String>,
}

impl RemoteJob {
    pub fn submitted(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            state: JobState::Submitted,
            result_uri: None,
            failure_reason: None,
        }
    }

    /// Apply a polled status. Returns the resulting state.
    ///
    /// Observations arriving after a terminal state are ignored.
    pub fn observe(&mut self, status: &JobStatus) -> JobState {
        if self.state.is_terminal() {
            return self.state;
        }

        match status {
            JobStatus::Queued => {}
            JobStatus::Running | JobStatus::Unrecognized(_) => {
                self.state = JobState::Processing;
            }
            JobStatus::Ready { result_uri } => {
                self.state = JobState::Ready;
                self.result_uri = Some(result_uri.clone());
            }
            JobStatus::Failed { reason } => {
                self.state = JobState::Failed;
                self.failure_reason = Some(reason.clone());
            }
        }
        self.state
    }

    /// Mark the job as abandoned because the wait budget ran out.
    pub fn time_out(&mut self) {
        if !self.state.is_terminal() {
            self.state = JobState::TimedOut;
        }
    }
}
