//! Pipeline assembly and the interruptible batch loop.

use lofi_core::error::StageError;
use lofi_core::ffmpeg::StillImageMuxer;
use lofi_core::naming::OutputDirs;
use lofi_core::wake_lock::WakeLock;
use lofi_openai::OpenAiApi;
use lofi_pipeline::adapters::{FfmpegMuxer, OpenAiStages, SunoMusic, YouTubeStage};
use lofi_pipeline::{BatchOptions, BatchSummary, Pipeline, PipelineSettings, Stages};
use lofi_suno::SunoApi;
use lofi_youtube::{OAuthClient, OAuthConfig, YouTubeUploader};
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;

/// Exit status reported when the batch is interrupted.
pub const EXIT_INTERRUPTED: u8 = 130;

/// How a batch ended.
#[derive(Debug)]
pub enum Outcome {
    Finished(BatchSummary),
    /// Upload credentials could not be established; no run was started.
    Unauthorized(StageError),
    Interrupted,
}

impl Outcome {
    /// 0 when every run completed, 1 when any run failed, the batch was
    /// aborted or never started, 130 on interrupt.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Finished(summary) if summary.all_succeeded() => 0,
            Self::Finished(_) | Self::Unauthorized(_) => 1,
            Self::Interrupted => EXIT_INTERRUPTED,
        }
    }
}

/// Wire the service clients into the five pipeline stages.
pub fn build_stages(config: &WorkerConfig) -> anyhow::Result<Stages> {
    let suno = match &config.comet_base_url {
        Some(url) => SunoApi::with_base_url(config.comet_api_key.clone(), url.clone()),
        None => SunoApi::new(config.comet_api_key.clone()),
    };

    let mut openai = OpenAiApi::new(config.openai_api_key.clone());
    if let Some(url) = &config.openai_base_url {
        openai = openai.with_base_url(url.clone());
    }
    if config.openai_chat_model.is_some() || config.openai_image_model.is_some() {
        openai = openai.with_models(
            config
                .openai_chat_model
                .clone()
                .unwrap_or_else(|| lofi_openai::DEFAULT_CHAT_MODEL.into()),
            config
                .openai_image_model
                .clone()
                .unwrap_or_else(|| lofi_openai::DEFAULT_IMAGE_MODEL.into()),
        );
    }
    let openai = OpenAiStages::new(openai);

    let oauth = OAuthConfig::new(
        config.youtube_client_id.clone(),
        config.youtube_client_secret.clone(),
        config.youtube_token_cache.clone(),
    )
    .with_refresh_token(config.youtube_refresh_token.clone());
    let uploader = YouTubeUploader::new(OAuthClient::new(oauth), config.retry_policy())?;

    Ok(Stages {
        music: Box::new(SunoMusic::new(suno, config.music_duration_secs)),
        metadata: Box::new(openai.clone()),
        thumbnail: Box::new(openai),
        muxer: Box::new(FfmpegMuxer::new(StillImageMuxer::new(
            &config.ffmpeg_path,
            &config.ffprobe_path,
        ))),
        uploader: Box::new(YouTubeStage::new(uploader)),
    })
}

/// Build the pipeline and create its output directories.
pub async fn build_pipeline(config: &WorkerConfig) -> anyhow::Result<Pipeline> {
    let output = OutputDirs::under(&config.output_dir);
    output.create_all().await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to create output directories under {}: {e}",
            config.output_dir.display()
        )
    })?;

    let mut settings = PipelineSettings::new(output);
    settings.retry = config.retry_policy();
    settings.poll = config.poll_config();

    let wake_lock = WakeLock::detect("lofi-worker");
    Ok(Pipeline::new(build_stages(config)?, settings, wake_lock))
}

/// Authorize uploads, then run the batch until it finishes or `cancel`
/// fires.
///
/// No run starts unless authorization succeeds. On cancellation the
/// in-flight run future is dropped, which releases a held wake-lock
/// before this returns.
pub async fn run_batch_until_cancelled(
    pipeline: &mut Pipeline,
    options: &BatchOptions,
    cancel: &CancellationToken,
) -> Outcome {
    let work = async {
        if let Err(e) = pipeline.authorize().await {
            tracing::error!(error = %e, "YouTube authorization failed, no runs started");
            return Outcome::Unauthorized(e);
        }
        Outcome::Finished(pipeline.run_batch(options).await)
    };

    tokio::select! {
        biased;
        () = cancel.cancelled() => {
            tracing::warn!("Interrupted, abandoning the current run");
            Outcome::Interrupted
        }
        outcome = work => outcome,
    }
}

/// Cancel `token` on Ctrl-C or SIGTERM.
pub async fn cancel_on_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C)");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM");
        }
    }
    token.cancel();
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use lofi_core::job::JobStatus;
    use lofi_core::poller::JobStatusSource;
    use lofi_pipeline::stages::{
        MetadataGenerator, MusicGenerator, ThumbnailGenerator, VideoMuxer, VideoUploader,
    };
    use lofi_pipeline::PromptSource;
    use lofi_youtube::{UploadRequest, UploadedVideo};

    use super::*;

    /// Counts paid generation calls; everything after submit is unreachable
    /// in these tests.
    struct CountingMusic(Arc<AtomicU32>);

    #[async_trait]
    impl JobStatusSource for CountingMusic {
        async fn job_status(&self, _job_id: &str) -> Result<JobStatus, StageError> {
            Ok(JobStatus::Failed {
                reason: "not expected".into(),
            })
        }
    }

    #[async_trait]
    impl MusicGenerator for CountingMusic {
        async fn submit(&self, _prompt: &str) -> Result<String, StageError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok("job-1".into())
        }

        async fn fetch(&self, _result_uri: &str, _dest: &Path) -> Result<(), StageError> {
            Err(StageError::Permanent("not expected".into()))
        }
    }

    struct Unused;

    #[async_trait]
    impl MetadataGenerator for Unused {
        async fn complete(&self, _music_prompt: &str) -> Result<String, StageError> {
            Err(StageError::Permanent("not expected".into()))
        }
    }

    #[async_trait]
    impl ThumbnailGenerator for Unused {
        async fn generate(&self, _prompt: &str, _dest: &Path) -> Result<(), StageError> {
            Err(StageError::Permanent("not expected".into()))
        }
    }

    #[async_trait]
    impl VideoMuxer for Unused {
        async fn mux(&self, _audio: &Path, _image: &Path, _output: &Path) -> Result<(), StageError> {
            Err(StageError::Permanent("not expected".into()))
        }
    }

    /// An uploader whose stored grant has been revoked.
    struct RevokedUploader;

    #[async_trait]
    impl VideoUploader for RevokedUploader {
        async fn authorize(&self) -> Result<(), StageError> {
            Err(StageError::Permanent("token rejected (400): invalid_grant".into()))
        }

        async fn upload(&self, _request: &UploadRequest<'_>) -> Result<UploadedVideo, StageError> {
            Err(StageError::Permanent("not expected".into()))
        }
    }

    fn config(output_dir: &std::path::Path) -> WorkerConfig {
        WorkerConfig::from_lookup(|var| {
            Some(match var {
                "COMET_API_KEY" => "sk-comet".into(),
                "OPENAI_API_KEY" => "sk-openai".into(),
                "YOUTUBE_CLIENT_ID" => "client".into(),
                "YOUTUBE_CLIENT_SECRET" => "secret".into(),
                "LOFI_OUTPUT_DIR" => output_dir.display().to_string(),
                "COMET_BASE_URL" => "http://127.0.0.1:9".into(),
                "OPENAI_CHAT_MODEL" => "gpt-4o-mini".into(),
                _ => return None,
            })
        })
        .unwrap()
    }

    #[test]
    fn exit_codes_follow_batch_outcome() {
        let all_good = BatchSummary {
            attempted: 2,
            succeeded: 2,
            ..Default::default()
        };
        assert_eq!(Outcome::Finished(all_good).exit_code(), 0);

        let one_failed = BatchSummary {
            attempted: 2,
            succeeded: 1,
            failed: 1,
            failed_run_ids: vec!["20261016_093000".into()],
            ..Default::default()
        };
        assert_eq!(Outcome::Finished(one_failed).exit_code(), 1);

        let aborted = BatchSummary {
            attempted: 3,
            failed: 3,
            aborted: true,
            ..Default::default()
        };
        assert_eq!(Outcome::Finished(aborted).exit_code(), 1);
        assert_eq!(
            Outcome::Unauthorized(StageError::Permanent("invalid_grant".into())).exit_code(),
            1
        );
        assert_eq!(Outcome::Interrupted.exit_code(), EXIT_INTERRUPTED);
    }

    #[tokio::test]
    async fn failed_authorization_starts_no_generation() {
        let dir = tempfile::tempdir().unwrap();
        let output = OutputDirs::under(dir.path());
        output.create_all().await.unwrap();
        let submits = Arc::new(AtomicU32::new(0));
        let stages = Stages {
            music: Box::new(CountingMusic(submits.clone())),
            metadata: Box::new(Unused),
            thumbnail: Box::new(Unused),
            muxer: Box::new(Unused),
            uploader: Box::new(RevokedUploader),
        };
        let mut settings = PipelineSettings::new(output);
        settings.retry = lofi_core::retry::RetryPolicy::new(3, Duration::from_millis(1));
        let mut pipeline = Pipeline::new(stages, settings, WakeLock::disabled("test"));
        let options = BatchOptions {
            count: 3,
            delay: Duration::ZERO,
            max_consecutive_failures: 0,
            prompt: PromptSource::Fixed("lofi".into()),
        };

        let outcome =
            run_batch_until_cancelled(&mut pipeline, &options, &CancellationToken::new()).await;

        assert_eq!(outcome.exit_code(), 1);
        assert_matches!(outcome, Outcome::Unauthorized(StageError::Permanent(_)));
        assert_eq!(submits.load(Ordering::SeqCst), 0);
        assert_eq!(std::fs::read_dir(dir.path().join("metadata")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn build_pipeline_creates_output_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = build_pipeline(&config(dir.path())).await.unwrap();

        for sub in ["audio", "thumbnails", "metadata"] {
            assert!(dir.path().join(sub).is_dir(), "{sub} not created");
        }
        assert!(!pipeline.wake_lock().is_held());
    }

    #[tokio::test]
    async fn cancelled_token_interrupts_before_any_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = build_pipeline(&config(dir.path())).await.unwrap();
        let options = BatchOptions {
            count: 3,
            delay: Duration::from_secs(60),
            max_consecutive_failures: 3,
            prompt: PromptSource::Fixed("lofi".into()),
        };

        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = run_batch_until_cancelled(&mut pipeline, &options, &cancel).await;

        assert_matches!(outcome, Outcome::Interrupted);
        assert!(!pipeline.wake_lock().is_held());
        assert_eq!(std::fs::read_dir(dir.path().join("metadata")).unwrap().count(), 0);
    }
}
