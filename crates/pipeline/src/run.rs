//! One pipeline execution and its state machine.
//!
//! ```text
//! created -> generating_music -> fetching_audio -> generating_metadata
//!         -> generating_thumbnail -> muxing_video -> uploading
//!         -> persisting -> done
//! ```
//!
//! `failed` is reachable from every non-terminal state. Entering a stage
//! appends a `pending` [`StageResult`]; leaving it settles that entry as
//! `succeeded` or `failed`. Earlier entries are never touched again.

use std::path::PathBuf;

use lofi_core::error::StageError;
use lofi_core::metadata::MetadataSource;
use lofi_core::types::Timestamp;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Created,
    GeneratingMusic,
    FetchingAudio,
    GeneratingMetadata,
    GeneratingThumbnail,
    MuxingVideo,
    Uploading,
    Persisting,
    Done,
    Failed,
}

impl RunState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::GeneratingMusic => "generating_music",
            Self::FetchingAudio => "fetching_audio",
            Self::GeneratingMetadata => "generating_metadata",
            Self::GeneratingThumbnail => "generating_thumbnail",
            Self::MuxingVideo => "muxing_video",
            Self::Uploading => "uploading",
            Self::Persisting => "persisting",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// The state that follows this one on success.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Created => Some(Self::GeneratingMusic),
            Self::GeneratingMusic => Some(Self::FetchingAudio),
            Self::FetchingAudio => Some(Self::GeneratingMetadata),
            Self::GeneratingMetadata => Some(Self::GeneratingThumbnail),
            Self::GeneratingThumbnail => Some(Self::MuxingVideo),
            Self::MuxingVideo => Some(Self::Uploading),
            Self::Uploading => Some(Self::Persisting),
            Self::Persisting => Some(Self::Done),
            Self::Done | Self::Failed => None,
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Succeeded,
    Failed,
}

/// What a finished stage produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutput {
    File(PathBuf),
    Url(String),
    Metadata { title: String, source: MetadataSource },
    Upload {
        video_id: String,
        video_url: String,
        /// False when the video is live but the custom thumbnail was not attached.
        thumbnail_set: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageResult {
    pub stage: RunState,
    pub status: StageStatus,
    pub output: Option<StageOutput>,
    pub error: Option<String>,
}

/// Where and why a run failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFailure {
    pub stage: RunState,
    pub kind: &'static str,
    pub message: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("Invalid run transition from {from} to {to}")]
pub struct TransitionError {
    pub from: RunState,
    pub to: RunState,
}

impl From<TransitionError> for StageError {
    fn from(err: TransitionError) -> Self {
        StageError::Permanent(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct Run {
    pub run_id: String,
    pub started_at: Timestamp,
    pub completed_at: Option<Timestamp>,
    state: RunState,
    stage_results: Vec<StageResult>,
    failure: Option<RunFailure>,
}

impl Run {
    pub fn new(run_id: impl Into<String>, started_at: Timestamp) -> Self {
        Self {
            run_id: run_id.into(),
            started_at,
            completed_at: None,
            state: RunState::Created,
            stage_results: Vec::new(),
            failure: None,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn stage_results(&self) -> &[StageResult] {
        &self.stage_results
    }

    pub fn failure(&self) -> Option<&RunFailure> {
        self.failure.as_ref()
    }

    pub fn succeeded(&self) -> bool {
        self.state == RunState::Done
    }

    /// Enter `next`, which must directly follow the current state.
    pub fn advance(&mut self, next: RunState) -> Result<(), TransitionError> {
        let allowed = self.state.next() == Some(next) && next != RunState::Done;
        if !allowed || self.has_pending() {
            return Err(TransitionError {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        self.stage_results.push(StageResult {
            stage: next,
            status: StageStatus::Pending,
            output: None,
            error: None,
        });
        Ok(())
    }

    /// Settle the current stage as succeeded.
    pub fn succeed(&mut self, output: StageOutput) {
        if let Some(result) = self.pending_mut() {
            result.status = StageStatus::Succeeded;
            result.output = Some(output);
        }
    }

    /// Settle the persisting stage and finish the run.
    pub fn finish(&mut self, completed_at: Timestamp) -> Result<(), TransitionError> {
        if self.state != RunState::Persisting || self.has_pending() {
            return Err(TransitionError {
                from: self.state,
                to: RunState::Done,
            });
        }
        self.state = RunState::Done;
        self.completed_at = Some(completed_at);
        Ok(())
    }

    /// Fail the run in its current stage. A no-op once terminal.
    pub fn fail(&mut self, error: &StageError, completed_at: Timestamp) {
        if self.state.is_terminal() {
            return;
        }
        let message = error.to_string();
        if let Some(result) = self.pending_mut() {
            result.status = StageStatus::Failed;
            result.error = Some(message.clone());
        }
        self.failure = Some(RunFailure {
            stage: self.state,
            kind: error.kind(),
            message,
        });
        self.state = RunState::Failed;
        self.completed_at = Some(completed_at);
    }

    fn has_pending(&self) -> bool {
        self.stage_results
            .last()
            .is_some_and(|r| r.status == StageStatus::Pending)
    }

    fn pending_mut(&mut self) -> Option<&mut StageResult> {
        self.stage_results
            .last_mut()
            .filter(|r| r.status == StageStatus::Pending)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::Utc;

    use super::*;

    const ORDER: [RunState; 7] = [
        RunState::GeneratingMusic,
        RunState::FetchingAudio,
        RunState::GeneratingMetadata,
        RunState::GeneratingThumbnail,
        RunState::MuxingVideo,
        RunState::Uploading,
        RunState::Persisting,
    ];

    #[test]
    fn happy_path_walks_every_state() {
        let mut run = Run::new("20261016_093000", Utc::now());
        for stage in ORDER {
            run.advance(stage).unwrap();
            assert_eq!(run.stage_results().last().map(|r| r.status), Some(StageStatus::Pending));
            run.succeed(StageOutput::Url(stage.as_str().into()));
        }
        run.finish(Utc::now()).unwrap();

        assert!(run.succeeded());
        assert_eq!(run.stage_results().len(), ORDER.len());
        assert!(run
            .stage_results()
            .iter()
            .all(|r| r.status == StageStatus::Succeeded));
        assert!(run.completed_at.is_some());
    }

    #[test]
    fn stages_cannot_be_skipped_or_left_pending() {
        let mut run = Run::new("r", Utc::now());
        assert_matches!(
            run.advance(RunState::FetchingAudio),
            Err(TransitionError { from: RunState::Created, .. })
        );

        run.advance(RunState::GeneratingMusic).unwrap();
        assert!(run.advance(RunState::FetchingAudio).is_err());
        assert!(run.finish(Utc::now()).is_err());
    }

    #[test]
    fn failure_records_stage_and_freezes_results() {
        let mut run = Run::new("r", Utc::now());
        run.advance(RunState::GeneratingMusic).unwrap();
        run.succeed(StageOutput::Url("https://cdn/a.mp3".into()));
        run.advance(RunState::FetchingAudio).unwrap();

        run.fail(&StageError::Transient("connection reset".into()), Utc::now());

        assert_eq!(run.state(), RunState::Failed);
        let failure = run.failure().unwrap();
        assert_eq!(failure.stage, RunState::FetchingAudio);
        assert_eq!(failure.kind, "transient");
        assert_eq!(run.stage_results()[0].status, StageStatus::Succeeded);
        assert_eq!(run.stage_results()[1].status, StageStatus::Failed);

        let before = run.stage_results().to_vec();
        run.fail(&StageError::Permanent("again".into()), Utc::now());
        assert!(run.advance(RunState::GeneratingMetadata).is_err());
        assert_eq!(run.stage_results(), before.as_slice());
        assert_eq!(run.failure().unwrap().kind, "transient");
    }

    #[test]
    fn terminal_states_have_no_successor() {
        assert_eq!(RunState::Done.next(), None);
        assert_eq!(RunState::Failed.next(), None);
        assert!(RunState::Failed.is_terminal());
        assert!(!RunState::Persisting.is_terminal());
    }
}
