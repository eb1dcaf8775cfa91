//! REST API client for the CometAPI Suno music endpoints.
//!
//! Music generation is asynchronous on the remote side: `POST
//! /suno/submit/music` queues a task and returns its id, `GET
//! /suno/fetch/{id}` reports progress until an audio URL is available.

use std::path::Path;

use lofi_core::job::JobStatus;
use lofi_core::retry::{classify_http_status, classify_request_error, Classify, ErrorClass};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

pub const DEFAULT_BASE_URL: &str = "https://api.cometapi.com";

/// Suno model used for submissions.
const MODEL_VERSION: &str = "chirp-v4";

/// HTTP client for the CometAPI Suno endpoints.
pub struct SunoApi {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

/// Parameters of one music-generation submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MusicRequest {
    #[serde(rename = "gpt_description_prompt")]
    pub prompt: String,
    pub tags: String,
    pub make_instrumental: bool,
    /// Requested length. The service treats this as a hint only.
    #[serde(rename = "duration")]
    pub duration_secs: u32,
    #[serde(rename = "mv")]
    pub model: String,
}

impl MusicRequest {
    /// Instrumental lo-fi track for `prompt`.
    pub fn lofi(prompt: impl Into<String>, duration_secs: u32) -> Self {
        Self {
            prompt: prompt.into(),
            tags: "lofi, study music, chill beats".to_string(),
            make_instrumental: true,
            duration_secs,
            model: MODEL_VERSION.to_string(),
        }
    }
}

/// Errors from the Suno REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum SunoError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// CometAPI returned a non-2xx status code.
    #[error("Suno API error ({status}): {body}")]
    ApiError { status: u16, body: String },

    /// A 2xx envelope whose `code` is not `success`.
    #[error("Suno API rejected the request: {0}")]
    Rejected(String),

    #[error("Malformed Suno API response: {0}")]
    MalformedResponse(String),

    #[error("I/O error while saving audio: {0}")]
    Io(#[from] std::io::Error),
}

impl Classify for SunoError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Request(e) => classify_request_error(e),
            Self::ApiError { status, .. } => classify_http_status(*status),
            Self::Rejected(_) | Self::MalformedResponse(_) | Self::Io(_) => ErrorClass::Permanent,
        }
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Common `{code, message, data}` envelope of every CometAPI response.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

impl<T> Envelope<T> {
    fn into_data(self) -> Result<T, SunoError> {
        if let Some(code) = self.code.as_deref() {
            if !code.eq_ignore_ascii_case("success") {
                return Err(SunoError::Rejected(format!(
                    "{code}: {}",
                    self.message.unwrap_or_default()
                )));
            }
        }
        self.data
            .ok_or_else(|| SunoError::MalformedResponse("missing `data` field".to_string()))
    }
}

#[derive(Debug, Deserialize)]
pub struct TaskInfo {
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub fail_reason: Option<String>,
    #[serde(default)]
    pub data: Vec<Clip>,
}

#[derive(Debug, Deserialize)]
pub struct Clip {
    #[serde(default)]
    pub audio_url: Option<String>,
}

/// Map a fetched task onto the service-independent [`JobStatus`].
pub fn task_status(task: &TaskInfo) -> JobStatus {
    let raw = task.status.as_deref().unwrap_or_default();
    match raw.to_ascii_uppercase().as_str() {
        "NOT_START" | "SUBMITTED" | "QUEUED" | "PENDING" => JobStatus::Queued,
        "IN_PROGRESS" | "RUNNING" | "PROCESSING" => JobStatus::Running,
        "SUCCESS" | "COMPLETE" => {
            let audio_url = task
                .data
                .iter()
                .filter_map(|clip| clip.audio_url.as_deref())
                .find(|url| !url.is_empty());
            match audio_url {
                Some(url) => JobStatus::Ready {
                    result_uri: url.to_string(),
                },
                None => JobStatus::Failed {
                    reason: "task finished without an audio URL".to_string(),
                },
            }
        }
        "FAILURE" | "FAILED" | "ERROR" => JobStatus::Failed {
            reason: task
                .fail_reason
                .clone()
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| "no reason given".to_string()),
        },
        _ => JobStatus::Unrecognized(raw.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

impl SunoApi {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(api_key: String, base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    /// Queue a generation task. Returns the remote task id.
    pub async fn submit(&self, request: &MusicRequest) -> Result<String, SunoError> {
        tracing::info!(prompt = %request.prompt, "Submitting music generation");

        let response = self
            .client
            .post(format!("{}/suno/submit/music", self.base_url))
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?;

        let envelope: Envelope<String> = Self::parse_response(response).await?;
        let task_id = envelope.into_data()?;
        if task_id.is_empty() {
            return Err(SunoError::MalformedResponse("empty task id".to_string()));
        }

        tracing::info!(job_id = %task_id, "Music generation queued");
        Ok(task_id)
    }

    /// Fetch the current state of a task.
    pub async fn fetch_task(&self, task_id: &str) -> Result<TaskInfo, SunoError> {
        let response = self
            .client
            .get(format!("{}/suno/fetch/{}", self.base_url, task_id))
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        let envelope: Envelope<TaskInfo> = Self::parse_response(response).await?;
        envelope.into_data()
    }

    pub async fn job_status(&self, task_id: &str) -> Result<JobStatus, SunoError> {
        let task = self.fetch_task(task_id).await?;
        Ok(task_status(&task))
    }

    /// Stream the finished audio at `audio_url` into `dest`.
    ///
    /// The body is written to a `.part` file that is renamed into place
    /// only once complete, so an interrupted download never leaves a
    /// truncated track under the final name. Returns the byte count.
    pub async fn download_audio(&self, audio_url: &str, dest: &Path) -> Result<u64, SunoError> {
        tracing::info!(url = audio_url, dest = %dest.display(), "Downloading audio");

        let response = self.client.get(audio_url).send().await?;
        let response = Self::ensure_success(response).await?;

        let partial = dest.with_extension("mp3.part");
        let saved = match Self::write_body(response, &partial).await {
            Ok(0) => Err(SunoError::MalformedResponse(format!(
                "empty audio body from {audio_url}"
            ))),
            Ok(written) => tokio::fs::rename(&partial, dest)
                .await
                .map(|()| written)
                .map_err(SunoError::from),
            Err(e) => Err(e),
        };

        match saved {
            Ok(written) => {
                tracing::info!(dest = %dest.display(), bytes = written, "Audio downloaded");
                Ok(written)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                Err(e)
            }
        }
    }

    // ---- private helpers ----

    async fn write_body(mut response: reqwest::Response, path: &Path) -> Result<u64, SunoError> {
        let mut file = tokio::fs::File::create(path).await?;
        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }

    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, SunoError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(SunoError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, SunoError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}
