//! Worker configuration loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use lofi_core::poller::PollConfig;
use lofi_core::retry::RetryPolicy;

/// Prefix of the placeholder values shipped in `.env.example`.
const PLACEHOLDER_PREFIX: &str = "your_";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing or placeholder configuration: {}", .0.join(", "))]
    Missing(Vec<String>),

    #[error("Invalid value {value:?} for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub comet_api_key: String,
    pub openai_api_key: String,
    pub youtube_client_id: String,
    pub youtube_client_secret: String,
    /// Empty means: use the cached token or run interactive consent.
    pub youtube_refresh_token: Option<String>,
    pub youtube_token_cache: PathBuf,
    pub output_dir: PathBuf,
    pub comet_base_url: Option<String>,
    pub openai_base_url: Option<String>,
    pub openai_chat_model: Option<String>,
    pub openai_image_model: Option<String>,
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    pub retry_max_attempts: u32,
    pub retry_base_delay_secs: u64,
    pub poll_interval_secs: u64,
    pub poll_max_wait_secs: u64,
    pub music_duration_secs: u32,
}

impl WorkerConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                 | Default        |
    /// |-------------------------|----------------|
    /// | `COMET_API_KEY`         | required       |
    /// | `OPENAI_API_KEY`        | required       |
    /// | `YOUTUBE_CLIENT_ID`     | required       |
    /// | `YOUTUBE_CLIENT_SECRET` | required       |
    /// | `YOUTUBE_REFRESH_TOKEN` | unset          |
    /// | `YOUTUBE_TOKEN_CACHE`   | `token.json`   |
    /// | `LOFI_OUTPUT_DIR`       | `.`            |
    /// | `COMET_BASE_URL`        | CometAPI       |
    /// | `OPENAI_BASE_URL`       | OpenAI         |
    /// | `OPENAI_CHAT_MODEL`     | client default |
    /// | `OPENAI_IMAGE_MODEL`    | client default |
    /// | `FFMPEG_PATH`           | `ffmpeg`       |
    /// | `FFPROBE_PATH`          | `ffprobe`      |
    /// | `RETRY_MAX_ATTEMPTS`    | `3`            |
    /// | `RETRY_BASE_DELAY_SECS` | `5`            |
    /// | `POLL_INTERVAL_SECS`    | `10`           |
    /// | `POLL_MAX_WAIT_SECS`    | `600`          |
    /// | `MUSIC_DURATION_SECS`   | `120`          |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through `lookup`, which returns the raw value of
    /// a variable or `None` when it is unset.
    ///
    /// Every missing required variable is reported in a single error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let optional = |var: &str| {
            lookup(var)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut missing = Vec::new();
        let mut required = |var: &str| match optional(var) {
            Some(value) if !value.starts_with(PLACEHOLDER_PREFIX) => value,
            _ => {
                missing.push(var.to_string());
                String::new()
            }
        };

        let comet_api_key = required("COMET_API_KEY");
        let openai_api_key = required("OPENAI_API_KEY");
        let youtube_client_id = required("YOUTUBE_CLIENT_ID");
        let youtube_client_secret = required("YOUTUBE_CLIENT_SECRET");

        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }

        Ok(Self {
            comet_api_key,
            openai_api_key,
            youtube_client_id,
            youtube_client_secret,
            youtube_refresh_token: optional("YOUTUBE_REFRESH_TOKEN")
                .filter(|v| !v.starts_with(PLACEHOLDER_PREFIX)),
            youtube_token_cache: optional("YOUTUBE_TOKEN_CACHE")
                .unwrap_or_else(|| "token.json".into())
                .into(),
            output_dir: optional("LOFI_OUTPUT_DIR").unwrap_or_else(|| ".".into()).into(),
            comet_base_url: optional("COMET_BASE_URL"),
            openai_base_url: optional("OPENAI_BASE_URL"),
            openai_chat_model: optional("OPENAI_CHAT_MODEL"),
            openai_image_model: optional("OPENAI_IMAGE_MODEL"),
            ffmpeg_path: optional("FFMPEG_PATH").unwrap_or_else(|| "ffmpeg".into()).into(),
            ffprobe_path: optional("FFPROBE_PATH").unwrap_or_else(|| "ffprobe".into()).into(),
            retry_max_attempts: parse_or("RETRY_MAX_ATTEMPTS", optional("RETRY_MAX_ATTEMPTS"), 3)?,
            retry_base_delay_secs: parse_or("RETRY_BASE_DELAY_SECS", optional("RETRY_BASE_DELAY_SECS"), 5)?,
            poll_interval_secs: parse_or("POLL_INTERVAL_SECS", optional("POLL_INTERVAL_SECS"), 10)?,
            poll_max_wait_secs: parse_or("POLL_MAX_WAIT_SECS", optional("POLL_MAX_WAIT_SECS"), 600)?,
            music_duration_secs: parse_or("MUSIC_DURATION_SECS", optional("MUSIC_DURATION_SECS"), 120)?,
        }
        .validated()?)
    }

    fn validated(self) -> Result<Self, ConfigError> {
        if self.retry_max_attempts == 0 {
            return Err(ConfigError::Invalid {
                var: "RETRY_MAX_ATTEMPTS",
                value: "0".into(),
                reason: "at least one attempt is required".into(),
            });
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                var: "POLL_INTERVAL_SECS",
                value: "0".into(),
                reason: "interval must be positive".into(),
            });
        }
        Ok(self)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_max_attempts,
            Duration::from_secs(self.retry_base_delay_secs),
        )
    }

    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            interval: Duration::from_secs(self.poll_interval_secs),
            max_wait: Duration::from_secs(self.poll_max_wait_secs),
        }
    }
}

fn parse_or<T>(var: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
            value,
        }),
    }
}
