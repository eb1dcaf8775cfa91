//! Run identifiers and artifact naming.
//!
//! Every artifact of a run shares the run id as its join key:
//! `lofi_<id>.mp3` and `video_<id>.mp4` in the audio directory,
//! `thumb_<id>.png` in the thumbnail directory and `metadata_<id>.json`
//! in the metadata directory.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone};

/// `strftime` pattern of the timestamp part of a run id.
pub const RUN_ID_FORMAT: &str = "%Y%m%d_%H%M%S";

pub fn audio_filename(run_id: &str) -> String {
    format!("lofi_{run_id}.mp3")
}

pub fn video_filename(run_id: &str) -> String {
    format!("video_{run_id}.mp4")
}

pub fn thumbnail_filename(run_id: &str) -> String {
    format!("thumb_{run_id}.png")
}

pub fn metadata_filename(run_id: &str) -> String {
    format!("metadata_{run_id}.json")
}

/// The three output directories of the pipeline.
#[derive(Debug, Clone)]
pub struct OutputDirs {
    pub audio: PathBuf,
    pub thumbnails: PathBuf,
    pub metadata: PathBuf,
}

impl OutputDirs {
    /// `audio/`, `thumbnails/` and `metadata/` under `base`.
    pub fn under(base: &Path) -> Self {
        Self {
            audio: base.join("audio"),
            thumbnails: base.join("thumbnails"),
            metadata: base.join("metadata"),
        }
    }

    pub async fn create_all(&self) -> std::io::Result<()> {
        for dir in [&self.audio, &self.thumbnails, &self.metadata] {
            tokio::fs::create_dir_all(dir).await?;
        }
        Ok(())
    }

    pub fn audio_path(&self, run_id: &str) -> PathBuf {
        self.audio.join(audio_filename(run_id))
    }

    pub fn video_path(&self, run_id: &str) -> PathBuf {
        self.audio.join(video_filename(run_id))
    }

    pub fn thumbnail_path(&self, run_id: &str) -> PathBuf {
        self.thumbnails.join(thumbnail_filename(run_id))
    }

    pub fn metadata_path(&self, run_id: &str) -> PathBuf {
        self.metadata.join(metadata_filename(run_id))
    }
}

/// Issues timestamp-derived run ids that never repeat.
///
/// A timestamp already issued by this generator, or one whose metadata
/// file already exists, gets a `_N` suffix.
#[derive(Debug, Default)]
pub struct RunIdGenerator {
    issued: HashSet<String>,
}

impl RunIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next id for a run starting at `now`. `taken` reports ids that are
    /// already in use on disk.
    pub fn next<Tz>(&mut self, now: DateTime<Tz>, taken: impl Fn(&str) -> bool) -> String
    where
        Tz: TimeZone,
        Tz::Offset: std::fmt::Display,
    {
        let base = now.format(RUN_ID_FORMAT).to_string();
        let mut candidate = base.clone();
        let mut suffix = 0u32;

        while self.issued.contains(&candidate) || taken(&candidate) {
            suffix += 1;
            candidate = format!("{base}_{suffix}");
        }

        if suffix > 0 {
            tracing::warn!(run_id = %candidate, "Run id collided with an existing run, suffixed");
        }
        self.issued.insert(candidate.clone());
        candidate
    }
}
