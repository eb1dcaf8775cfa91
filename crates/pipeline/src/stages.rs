//! Stage adapter interfaces.
//!
//! Each adapter is a single request/response operation that reports
//! failures as [`StageError`]. Retrying is the orchestrator's job, so
//! every operation must be safe to call again after a failure.

use std::path::Path;

use async_trait::async_trait;
use lofi_core::error::StageError;
use lofi_core::poller::JobStatusSource;
use lofi_youtube::{UploadRequest, UploadedVideo};

/// Music generation: submit a prompt, poll the job, fetch the audio.
#[async_trait]
pub trait MusicGenerator: JobStatusSource {
    /// Queue a generation job and return its id.
    async fn submit(&self, prompt: &str) -> Result<String, StageError>;

    /// Download the finished track at `result_uri` to `dest`.
    async fn fetch(&self, result_uri: &str, dest: &Path) -> Result<(), StageError>;
}

/// Raw metadata completion text for a music prompt. Parsing and the
/// templated fallback happen in the orchestrator.
#[async_trait]
pub trait MetadataGenerator: Send + Sync {
    async fn complete(&self, music_prompt: &str) -> Result<String, StageError>;
}

/// Writes a 1280x720 image for `prompt` to `dest`.
#[async_trait]
pub trait ThumbnailGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, dest: &Path) -> Result<(), StageError>;
}

#[async_trait]
pub trait VideoMuxer: Send + Sync {
    async fn mux(&self, audio: &Path, image: &Path, output: &Path) -> Result<(), StageError>;
}

#[async_trait]
pub trait VideoUploader: Send + Sync {
    /// Establish upload credentials ahead of the first run.
    async fn authorize(&self) -> Result<(), StageError> {
        Ok(())
    }

    async fn upload(&self, request: &UploadRequest<'_>) -> Result<UploadedVideo, StageError>;
}

/// The five adapters a run goes through, in order.
pub struct Stages {
    pub music: Box<dyn MusicGenerator>,
    pub metadata: Box<dyn MetadataGenerator>,
    pub thumbnail: Box<dyn ThumbnailGenerator>,
    pub muxer: Box<dyn VideoMuxer>,
    pub uploader: Box<dyn VideoUploader>,
}
