//! FFmpeg/FFprobe command utilities.
//!
//! [`StillImageMuxer`] turns an audio track and a still image into an
//! H.264/AAC video that lasts exactly as long as the audio.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Error type for FFmpeg/FFprobe operations.
#[derive(Debug, thiserror::Error)]
pub enum FfmpegError {
    #[error("ffprobe/ffmpeg binary not found: {0}")]
    NotFound(std::io::Error),

    #[error("ffprobe/ffmpeg execution failed (exit code {exit_code:?}): {stderr}")]
    ExecutionFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("failed to parse ffprobe output: {0}")]
    ParseError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("input file not found: {0}")]
    InputNotFound(String),

    #[error("muxed output is incomplete: {0}")]
    IncompleteOutput(String),
}

// ---------------------------------------------------------------------------
// ffprobe JSON output structures
// ---------------------------------------------------------------------------

/// Top-level ffprobe JSON output (`-print_format json -show_format -show_streams`).
#[derive(Debug, Deserialize)]
pub struct FfprobeOutput {
    pub streams: Vec<FfprobeStream>,
    pub format: FfprobeFormat,
}

#[derive(Debug, Deserialize)]
pub struct FfprobeStream {
    pub index: i32,
    pub codec_name: Option<String>,
    pub codec_type: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub duration: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FfprobeFormat {
    pub duration: Option<String>,
    pub format_name: Option<String>,
}

impl FfprobeOutput {
    pub fn has_stream(&self, codec_type: &str) -> bool {
        self.streams
            .iter()
            .any(|s| s.codec_type.as_deref() == Some(codec_type))
    }

    /// Container duration in seconds, or `0.0` when unknown.
    pub fn duration_secs(&self) -> f64 {
        self.format
            .duration
            .as_deref()
            .and_then(|d| d.parse::<f64>().ok())
            .unwrap_or(0.0)
    }
}

// ---------------------------------------------------------------------------
// Command builder
// ---------------------------------------------------------------------------

/// Build the ffmpeg arguments that loop `image` over `audio`.
///
/// `-shortest` stops the looped image at the end of the audio track.
pub fn still_image_args(image: &Path, audio: &Path, output: &Path) -> Vec<String> {
    let mut args: Vec<String> = ["-loop", "1", "-i"].iter().map(|s| s.to_string()).collect();
    args.push(image.to_string_lossy().into_owned());
    args.push("-i".into());
    args.push(audio.to_string_lossy().into_owned());
    args.extend(
        [
            "-c:v",
            "libx264",
            "-tune",
            "stillimage",
            "-c:a",
            "aac",
            "-b:a",
            "192k",
            "-pix_fmt",
            "yuv420p",
            "-shortest",
            "-y",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    args.push(output.to_string_lossy().into_owned());
    args
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Runs ffmpeg (and, when available, ffprobe) for still-image videos.
#[derive(Debug, Clone)]
pub struct StillImageMuxer {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl Default for StillImageMuxer {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

impl StillImageMuxer {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    /// Mux `audio` and `image` into `output`.
    ///
    /// Fails if either input is missing, ffmpeg exits non-zero, or the
    /// probed output lacks a video or audio stream. A missing ffprobe
    /// only skips the verification.
    pub async fn mux(&self, audio: &Path, image: &Path, output: &Path) -> Result<(), FfmpegError> {
        for input in [audio, image] {
            let is_file = tokio::fs::metadata(input)
                .await
                .map(|m| m.is_file() && m.len() > 0)
                .unwrap_or(false);
            if !is_file {
                return Err(FfmpegError::InputNotFound(
                    input.to_string_lossy().to_string(),
                ));
            }
        }

        tracing::info!(
            audio = %audio.display(),
            image = %image.display(),
            output = %output.display(),
            "Muxing still-image video",
        );

        let result = tokio::process::Command::new(&self.ffmpeg)
            .args(still_image_args(image, audio, output))
            .output()
            .await
            .map_err(FfmpegError::NotFound)?;

        if !result.status.success() {
            return Err(FfmpegError::ExecutionFailed {
                exit_code: result.status.code(),
                stderr: tail(&String::from_utf8_lossy(&result.stderr), 2000),
            });
        }

        match self.probe(output).await {
            Ok(probe) => {
                if !probe.has_stream("video") || !probe.has_stream("audio") {
                    return Err(FfmpegError::IncompleteOutput(format!(
                        "{} is missing a video or audio stream",
                        output.display()
                    )));
                }
                tracing::info!(
                    output = %output.display(),
                    duration_secs = probe.duration_secs(),
                    "Video created",
                );
            }
            Err(FfmpegError::NotFound(e)) => {
                tracing::warn!(error = %e, "ffprobe not available, skipping output verification");
            }
            Err(e) => return Err(e),
        }

        Ok(())
    }

    /// Run `ffprobe` on a media file and return the parsed JSON output.
    pub async fn probe(&self, path: &Path) -> Result<FfprobeOutput, FfmpegError> {
        if !path.exists() {
            return Err(FfmpegError::InputNotFound(
                path.to_string_lossy().to_string(),
            ));
        }

        let output = tokio::process::Command::new(&self.ffprobe)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path)
            .output()
            .await
            .map_err(FfmpegError::NotFound)?;

        if !output.status.success() {
            return Err(FfmpegError::ExecutionFailed {
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        serde_json::from_str::<FfprobeOutput>(&stdout)
            .map_err(|e| FfmpegError::ParseError(format!("{e}: {stdout}")))
    }
}

/// Keep the last `max_chars` characters; ffmpeg puts the actual error last.
fn tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.trim().to_string();
    }
    text.chars().skip(count - max_chars).collect::<String>().trim().to_string()
}
