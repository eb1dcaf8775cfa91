//! Stage-level error taxonomy.
//!
//! Every stage adapter converts its client-specific error into a
//! [`StageError`] before the orchestrator sees it. The variant decides
//! whether the retry policy may try again and how the failure is
//! reported in the run summary.

use crate::retry::{Classify, ErrorClass};

#[derive(Debug, thiserror::Error)]
pub enum StageError {
    /// Network timeout, rate limit, 5xx, or a remote job that is not ready.
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Bad credentials, malformed request, or any other non-retryable failure.
    #[error("Permanent failure: {0}")]
    Permanent(String),

    #[error("Generation job {job_id} failed: {reason}")]
    GenerationFailed { job_id: String, reason: String },

    #[error("Generation job {job_id} did not finish within {waited_secs}s")]
    GenerationTimeout { job_id: String, waited_secs: u64 },

    #[error("Video mux failed: {0}")]
    Mux(String),

    #[error("Failed to persist metadata record: {0}")]
    Persistence(String),
}

impl StageError {
    /// Convert a client error, keeping its retry classification.
    pub fn from_client<E: Classify + std::fmt::Display>(err: E) -> Self {
        match err.class() {
            ErrorClass::Transient => Self::Transient(err.to_string()),
            ErrorClass::Permanent => Self::Permanent(err.to_string()),
        }
    }

    /// Short machine-readable label used in logs and run summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transient(_) => "transient",
            Self::Permanent(_) => "permanent",
            Self::GenerationFailed { .. } => "generation_failed",
            Self::GenerationTimeout { .. } => "generation_timeout",
            Self::Mux(_) => "mux",
            Self::Persistence(_) => "persistence",
        }
    }
}

impl Classify for StageError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Transient(_) => ErrorClass::Transient,
            Self::Permanent(_)
            | Self::GenerationFailed { .. }
            | Self::GenerationTimeout { .. }
            | Self::Mux(_)
            | Self::Persistence(_) => ErrorClass::Permanent,
        }
    }
}
