//! Stage adapters over the real service clients.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use lofi_core::error::StageError;
use lofi_core::ffmpeg::{FfmpegError, StillImageMuxer};
use lofi_core::job::JobStatus;
use lofi_core::poller::JobStatusSource;
use lofi_openai::OpenAiApi;
use lofi_suno::{MusicRequest, SunoApi};
use lofi_youtube::{UploadRequest, UploadedVideo, YouTubeUploader};

use crate::stages::{MetadataGenerator, MusicGenerator, ThumbnailGenerator, VideoMuxer, VideoUploader};

// ---------------------------------------------------------------------------
// Music
// ---------------------------------------------------------------------------

pub struct SunoMusic {
    api: SunoApi,
    duration_secs: u32,
}

impl SunoMusic {
    pub fn new(api: SunoApi, duration_secs: u32) -> Self {
        Self { api, duration_secs }
    }
}

#[async_trait]
impl JobStatusSource for SunoMusic {
    async fn job_status(&self, job_id: &str) -> Result<JobStatus, StageError> {
        self.api.job_status(job_id).await.map_err(StageError::from_client)
    }
}

#[async_trait]
impl MusicGenerator for SunoMusic {
    async fn submit(&self, prompt: &str) -> Result<String, StageError> {
        let request = MusicRequest::lofi(prompt, self.duration_secs);
        self.api.submit(&request).await.map_err(StageError::from_client)
    }

    async fn fetch(&self, result_uri: &str, dest: &Path) -> Result<(), StageError> {
        self.api
            .download_audio(result_uri, dest)
            .await
            .map(|_| ())
            .map_err(StageError::from_client)
    }
}

// ---------------------------------------------------------------------------
// Metadata and thumbnail
// ---------------------------------------------------------------------------

/// Serves both the metadata and the thumbnail stage from one client.
#[derive(Clone)]
pub struct OpenAiStages {
    api: Arc<OpenAiApi>,
}

impl OpenAiStages {
    pub fn new(api: OpenAiApi) -> Self {
        Self { api: Arc::new(api) }
    }
}

#[async_trait]
impl MetadataGenerator for OpenAiStages {
    async fn complete(&self, music_prompt: &str) -> Result<String, StageError> {
        self.api
            .metadata_completion(music_prompt)
            .await
            .map_err(StageError::from_client)
    }
}

#[async_trait]
impl ThumbnailGenerator for OpenAiStages {
    async fn generate(&self, prompt: &str, dest: &Path) -> Result<(), StageError> {
        self.api
            .generate_thumbnail(prompt, dest)
            .await
            .map_err(StageError::from_client)
    }
}

// ---------------------------------------------------------------------------
// Mux
// ---------------------------------------------------------------------------

pub struct FfmpegMuxer {
    muxer: StillImageMuxer,
}

impl FfmpegMuxer {
    pub fn new(muxer: StillImageMuxer) -> Self {
        Self { muxer }
    }
}

#[async_trait]
impl VideoMuxer for FfmpegMuxer {
    async fn mux(&self, audio: &Path, image: &Path, output: &Path) -> Result<(), StageError> {
        self.muxer
            .mux(audio, image, output)
            .await
            .map_err(|e: FfmpegError| StageError::Mux(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Upload
// ---------------------------------------------------------------------------

pub struct YouTubeStage {
    uploader: YouTubeUploader,
}

impl YouTubeStage {
    pub fn new(uploader: YouTubeUploader) -> Self {
        Self { uploader }
    }
}

#[async_trait]
impl VideoUploader for YouTubeStage {
    async fn authorize(&self) -> Result<(), StageError> {
        self.uploader.authorize().await.map_err(StageError::from_client)
    }

    async fn upload(&self, request: &UploadRequest<'_>) -> Result<UploadedVideo, StageError> {
        self.uploader
            .upload(request)
            .await
            .map_err(StageError::from_client)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use lofi_suno::SunoError;

    use super::*;

    #[test]
    fn client_errors_keep_their_classification() {
        let throttled = SunoError::ApiError {
            status: 429,
            body: "slow down".into(),
        };
        assert_matches!(StageError::from_client(throttled), StageError::Transient(m) if m.contains("429"));

        let unauthorized = SunoError::ApiError {
            status: 401,
            body: "bad key".into(),
        };
        assert_matches!(StageError::from_client(unauthorized), StageError::Permanent(_));
    }

    #[tokio::test]
    async fn missing_mux_input_is_a_mux_error() {
        let dir = tempfile::tempdir().unwrap();
        let muxer = FfmpegMuxer::new(StillImageMuxer::new("/nonexistent/ffmpeg", "/nonexistent/ffprobe"));
        let err = muxer
            .mux(
                &dir.path().join("lofi.mp3"),
                &dir.path().join("thumb.png"),
                &dir.path().join("video.mp4"),
            )
            .await
            .unwrap_err();
        assert_matches!(err, StageError::Mux(_));
    }
}
