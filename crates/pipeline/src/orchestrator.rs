//! Sequences the stages of a run and repeats runs in a batch.
//!
//! A run holds the wake-lock from creation until it enters `persisting`
//! or `failed`. The lock is held through a guard, so it is also
//! released when the run future is dropped (Ctrl-C) or a stage panics.
//! Every stage call goes through the shared [`RetryPolicy`]; the music
//! job is additionally polled through [`wait_for_job`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{Local, SecondsFormat, Utc};
use lofi_core::error::StageError;
use lofi_core::job::RemoteJob;
use lofi_core::metadata::{MetadataRecord, MetadataSource, VideoMetadata};
use lofi_core::naming::{OutputDirs, RunIdGenerator};
use lofi_core::poller::{wait_for_job, PollConfig};
use lofi_core::retry::RetryPolicy;
use lofi_core::types::PRIVACY_PRIVATE;
use lofi_core::wake_lock::WakeLock;
use lofi_youtube::{UploadRequest, UploadedVideo};
use tracing::Instrument;

use crate::run::{Run, RunState, StageOutput};
use crate::stages::Stages;
use crate::store::MetadataStore;

/// Knobs shared by every run.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub output: OutputDirs,
    pub retry: RetryPolicy,
    pub poll: PollConfig,
    pub privacy_status: String,
}

impl PipelineSettings {
    pub fn new(output: OutputDirs) -> Self {
        Self {
            output,
            retry: RetryPolicy::default(),
            poll: PollConfig::default(),
            privacy_status: PRIVACY_PRIVATE.to_string(),
        }
    }
}

/// Where each run's music prompt comes from.
#[derive(Debug, Clone)]
pub enum PromptSource {
    Fixed(String),
    Randomized,
}

impl PromptSource {
    pub fn next_prompt(&self) -> String {
        match self {
            Self::Fixed(prompt) => prompt.clone(),
            Self::Randomized => lofi_suno::create_lofi_prompt(),
        }
    }
}

/// Outcome of [`Pipeline::run_once`].
#[derive(Debug)]
pub struct RunReport {
    pub run: Run,
    /// Set only when the run reached `done`.
    pub record_path: Option<PathBuf>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.run.succeeded()
    }
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub count: u32,
    /// Pause between the end of one run and the start of the next.
    pub delay: Duration,
    /// Abort the batch after this many failed runs in a row. `0` never aborts.
    pub max_consecutive_failures: u32,
    pub prompt: PromptSource,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub attempted: u32,
    pub succeeded: u32,
    pub failed: u32,
    /// The consecutive-failure limit stopped the batch early.
    pub aborted: bool,
    pub failed_run_ids: Vec<String>,
}

impl BatchSummary {
    pub fn all_succeeded(&self) -> bool {
        self.attempted > 0 && self.failed == 0 && !self.aborted
    }
}

/// Files and results accumulated while the stages run.
struct Artifacts {
    audio: PathBuf,
    video: PathBuf,
    thumbnail: PathBuf,
    metadata: VideoMetadata,
    uploaded: UploadedVideo,
    upload_timestamp: String,
}

pub struct Pipeline {
    stages: Stages,
    settings: PipelineSettings,
    store: MetadataStore,
    wake_lock: WakeLock,
    run_ids: RunIdGenerator,
}

impl Pipeline {
    pub fn new(stages: Stages, settings: PipelineSettings, wake_lock: WakeLock) -> Self {
        let store = MetadataStore::new(settings.output.metadata.clone());
        Self {
            stages,
            settings,
            store,
            wake_lock,
            run_ids: RunIdGenerator::new(),
        }
    }

    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    pub fn wake_lock(&self) -> &WakeLock {
        &self.wake_lock
    }

    /// Make sure uploads are authorized before any run spends on generation.
    ///
    /// Transient failures go through the retry policy; anything else is
    /// returned so the caller can stop before the first run.
    pub async fn authorize(&self) -> Result<(), StageError> {
        let uploader = &self.stages.uploader;
        self.settings
            .retry
            .run("upload.authorize", || uploader.authorize())
            .await?;
        tracing::info!("Upload credentials ready");
        Ok(())
    }

    /// Execute one run to `done` or `failed`. Never returns an error:
    /// failures are recorded on the returned [`Run`] and logged.
    pub async fn run_once(&mut self, prompt: &str) -> RunReport {
        let store = &self.store;
        let run_id = self.run_ids.next(Local::now(), |id| store.exists(id));
        let span = tracing::info_span!("run", run_id = %run_id);
        self.run_once_inner(run_id, prompt).instrument(span).await
    }

    async fn run_once_inner(&mut self, run_id: String, prompt: &str) -> RunReport {
        let mut run = Run::new(run_id, Utc::now());
        tracing::info!(prompt, "Run started");

        let outcome = {
            let _awake = self.wake_lock.hold();
            execute_stages(&self.stages, &self.settings, &mut run, prompt).await
        };

        let artifacts = match outcome {
            Ok(artifacts) => artifacts,
            Err(e) => {
                fail_run(&mut run, &e);
                return RunReport {
                    run,
                    record_path: None,
                };
            }
        };

        let record_path = match self.persist(&mut run, prompt, artifacts).await {
            Ok(path) => path,
            Err(e) => {
                fail_run(&mut run, &e);
                return RunReport {
                    run,
                    record_path: None,
                };
            }
        };

        tracing::info!(record = %record_path.display(), "Run completed");
        RunReport {
            run,
            record_path: Some(record_path),
        }
    }

    async fn persist(&self, run: &mut Run, prompt: &str, artifacts: Artifacts) -> Result<PathBuf, StageError> {
        run.advance(RunState::Persisting)?;
        let record = build_record(&run.run_id, prompt, &self.settings.privacy_status, artifacts);
        let path = self
            .store
            .persist(&record)
            .await
            .map_err(|e| StageError::Persistence(e.to_string()))?;
        run.succeed(StageOutput::File(path.clone()));
        run.finish(Utc::now())?;
        Ok(path)
    }

    /// Run `options.count` runs strictly one after another.
    ///
    /// A failed run does not stop the batch; `max_consecutive_failures`
    /// failures in a row do. The delay elapses between runs regardless
    /// of how the previous run ended, and not after the last one.
    pub async fn run_batch(&mut self, options: &BatchOptions) -> BatchSummary {
        let mut summary = BatchSummary::default();
        let mut consecutive_failures = 0u32;

        tracing::info!(
            count = options.count,
            delay_secs = options.delay.as_secs(),
            "Starting batch",
        );

        for index in 1..=options.count {
            if index > 1 && !options.delay.is_zero() {
                tracing::info!(delay_secs = options.delay.as_secs(), "Waiting before next run");
                tokio::time::sleep(options.delay).await;
            }

            tracing::info!(run = index, of = options.count, "Starting run");
            let prompt = options.prompt.next_prompt();
            let report = self.run_once(&prompt).await;
            summary.attempted += 1;

            if report.succeeded() {
                summary.succeeded += 1;
                consecutive_failures = 0;
            } else {
                summary.failed += 1;
                summary.failed_run_ids.push(report.run.run_id.clone());
                consecutive_failures += 1;

                let limit = options.max_consecutive_failures;
                if limit > 0 && consecutive_failures >= limit && index < options.count {
                    tracing::error!(
                        consecutive_failures,
                        remaining = options.count - index,
                        "Too many consecutive failures, aborting batch",
                    );
                    summary.aborted = true;
                    break;
                }
            }
        }

        tracing::info!(
            attempted = summary.attempted,
            succeeded = summary.succeeded,
            failed = summary.failed,
            aborted = summary.aborted,
            "Batch finished",
        );
        summary
    }
}

fn fail_run(run: &mut Run, error: &StageError) {
    let stage = run.state();
    run.fail(error, Utc::now());
    tracing::error!(
        stage = %stage,
        error_kind = error.kind(),
        error = %error,
        "Run failed",
    );
}

async fn execute_stages(
    stages: &Stages,
    settings: &PipelineSettings,
    run: &mut Run,
    prompt: &str,
) -> Result<Artifacts, StageError> {
    let retry = &settings.retry;
    let dirs = &settings.output;
    let run_id = run.run_id.clone();

    run.advance(RunState::GeneratingMusic)?;
    let job_id = retry.run("music.submit", || stages.music.submit(prompt)).await?;
    let mut job = RemoteJob::submitted(job_id.clone());
    let result_uri = wait_for_job(&*stages.music, &mut job, &settings.poll, retry).await?;
    tracing::info!(%job_id, "Music ready");
    run.succeed(StageOutput::Url(result_uri.clone()));

    run.advance(RunState::FetchingAudio)?;
    let audio = dirs.audio_path(&run_id);
    retry
        .run("music.fetch", || stages.music.fetch(&result_uri, &audio))
        .await?;
    run.succeed(StageOutput::File(audio.clone()));

    run.advance(RunState::GeneratingMetadata)?;
    let completion = retry
        .run("metadata.generate", || stages.metadata.complete(prompt))
        .await?;
    let (metadata, source) = VideoMetadata::from_completion(&completion, prompt);
    if source == MetadataSource::Template {
        tracing::warn!("Using templated metadata");
    }
    tracing::info!(title = %metadata.title, tags = metadata.tags.len(), "Metadata ready");
    run.succeed(StageOutput::Metadata {
        title: metadata.title.clone(),
        source,
    });

    run.advance(RunState::GeneratingThumbnail)?;
    let thumbnail = dirs.thumbnail_path(&run_id);
    let thumbnail_prompt = metadata.enhanced_thumbnail_prompt();
    retry
        .run("thumbnail.generate", || {
            stages.thumbnail.generate(&thumbnail_prompt, &thumbnail)
        })
        .await?;
    run.succeed(StageOutput::File(thumbnail.clone()));

    run.advance(RunState::MuxingVideo)?;
    let video = dirs.video_path(&run_id);
    retry
        .run("video.mux", || stages.muxer.mux(&audio, &thumbnail, &video))
        .await?;
    run.succeed(StageOutput::File(video.clone()));

    run.advance(RunState::Uploading)?;
    let request = UploadRequest {
        video: &video,
        thumbnail: &thumbnail,
        title: &metadata.title,
        description: &metadata.description,
        tags: &metadata.tags,
        privacy_status: &settings.privacy_status,
    };
    let uploaded = retry
        .run("video.upload", || stages.uploader.upload(&request))
        .await?;
    let upload_timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    if !uploaded.thumbnail_set {
        tracing::warn!(video_id = %uploaded.video_id, "Video uploaded without its custom thumbnail");
    }
    run.succeed(StageOutput::Upload {
        video_id: uploaded.video_id.clone(),
        video_url: uploaded.video_url.clone(),
        thumbnail_set: uploaded.thumbnail_set,
    });

    Ok(Artifacts {
        audio,
        video,
        thumbnail,
        metadata,
        uploaded,
        upload_timestamp,
    })
}

fn build_record(run_id: &str, prompt: &str, privacy_status: &str, artifacts: Artifacts) -> MetadataRecord {
    let path = |p: &Path| p.to_string_lossy().into_owned();
    MetadataRecord {
        timestamp_id: run_id.to_string(),
        music_prompt: prompt.to_string(),
        audio_path: path(&artifacts.audio),
        video_path: path(&artifacts.video),
        thumbnail_path: path(&artifacts.thumbnail),
        title: artifacts.metadata.title,
        description: artifacts.metadata.description,
        tags: artifacts.metadata.tags,
        thumbnail_prompt: artifacts.metadata.thumbnail_prompt,
        video_id: artifacts.uploaded.video_id,
        video_url: artifacts.uploaded.video_url,
        upload_timestamp: artifacts.upload_timestamp,
        privacy_status: privacy_status.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_success_requires_every_run() {
        let clean = BatchSummary {
            attempted: 3,
            succeeded: 3,
            ..Default::default()
        };
        assert!(clean.all_succeeded());

        let partial = BatchSummary {
            attempted: 3,
            succeeded: 2,
            failed: 1,
            ..Default::default()
        };
        assert!(!partial.all_succeeded());
        assert!(!BatchSummary::default().all_succeeded());
    }

    #[test]
    fn fixed_prompt_is_reused() {
        let source = PromptSource::Fixed("rainy night piano".into());
        assert_eq!(source.next_prompt(), "rainy night piano");
        assert_eq!(source.next_prompt(), "rainy night piano");
    }

    #[test]
    fn default_settings_upload_privately() {
        let settings = PipelineSettings::new(OutputDirs::under(Path::new("out")));
        assert_eq!(settings.privacy_status, "private");
        assert_eq!(settings.retry.max_attempts, 3);
    }
}
