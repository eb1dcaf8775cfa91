//! Resumable video upload and custom-thumbnail attachment.
//!
//! The video is sent through a resumable session in fixed-size chunks.
//! A failed chunk is retried under its own [`RetryPolicy`]; before the
//! retry the session is asked how many bytes it already holds
//! (`Content-Range: bytes */<total>`), so the transfer continues from
//! the confirmed offset rather than from the beginning.

use std::io::SeekFrom;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use lofi_core::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::auth::OAuthClient;
use crate::error::YouTubeError;

pub const DEFAULT_UPLOAD_BASE_URL: &str = "https://www.googleapis.com";

/// Must be a multiple of 256 KiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 8 * 1024 * 1024;

/// YouTube category "Music".
pub const MUSIC_CATEGORY_ID: &str = "10";

pub fn video_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={video_id}")
}

/// Everything needed to publish one video.
#[derive(Debug, Clone, Copy)]
pub struct UploadRequest<'a> {
    pub video: &'a Path,
    pub thumbnail: &'a Path,
    pub title: &'a str,
    pub description: &'a str,
    pub tags: &'a [String],
    pub privacy_status: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedVideo {
    pub video_id: String,
    pub video_url: String,
    /// `false` when the video went up but the thumbnail was refused.
    pub thumbnail_set: bool,
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Snippet<'a> {
    title: &'a str,
    description: &'a str,
    tags: &'a [String],
    category_id: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Status<'a> {
    privacy_status: &'a str,
    self_declared_made_for_kids: bool,
}

#[derive(Debug, Serialize)]
struct VideoResource<'a> {
    snippet: Snippet<'a>,
    status: Status<'a>,
}

impl<'a> VideoResource<'a> {
    fn from_request(request: &UploadRequest<'a>) -> Self {
        Self {
            snippet: Snippet {
                title: request.title,
                description: request.description,
                tags: request.tags,
                category_id: MUSIC_CATEGORY_ID,
            },
            status: Status {
                privacy_status: request.privacy_status,
                self_declared_made_for_kids: false,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct InsertedVideo {
    id: String,
}

/// Result of sending bytes to an upload session.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ChunkOutcome {
    /// The session holds bytes `[0, next_offset)`.
    Incomplete { next_offset: u64 },
    Complete { video_id: String },
}

/// Next byte offset from a `Range: bytes=0-<last>` header.
pub fn next_offset_from_range(range: Option<&str>) -> Result<u64, YouTubeError> {
    let Some(range) = range else {
        return Ok(0);
    };
    range
        .trim()
        .strip_prefix("bytes=")
        .and_then(|r| r.split_once('-'))
        .and_then(|(_, last)| last.parse::<u64>().ok())
        .map(|last| last + 1)
        .ok_or_else(|| YouTubeError::MalformedResponse(format!("unexpected Range header: {range}")))
}

// ---------------------------------------------------------------------------
// Uploader
// ---------------------------------------------------------------------------

pub struct YouTubeUploader {
    http: reqwest::Client,
    auth: OAuthClient,
    chunk_retry: RetryPolicy,
    base_url: String,
    chunk_size: u64,
}

impl YouTubeUploader {
    pub fn new(auth: OAuthClient, chunk_retry: RetryPolicy) -> Result<Self, YouTubeError> {
        // 308 is the resumable protocol's "resume incomplete", not a redirect.
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            http,
            auth,
            chunk_retry,
            base_url: DEFAULT_UPLOAD_BASE_URL.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Obtain an upload token now, running consent if nothing is cached.
    ///
    /// Called once before any run so that a missing or revoked grant
    /// surfaces before generation work is paid for.
    pub async fn authorize(&self) -> Result<(), YouTubeError> {
        self.auth.access_token().await.map(|_| ())
    }

    /// Upload the video, then attach the thumbnail.
    ///
    /// A thumbnail the platform refuses (unverified channel, say) is
    /// logged and reported through [`UploadedVideo::thumbnail_set`]; it
    /// does not fail an upload that already produced a video.
    pub async fn upload(&self, request: &UploadRequest<'_>) -> Result<UploadedVideo, YouTubeError> {
        let total = tokio::fs::metadata(request.video).await?.len();
        let token = self.auth.access_token().await?;

        tracing::info!(title = request.title, bytes = total, "Uploading video");
        let session = self.start_session(&token, request, total).await?;
        let video_id = self.send_chunks(&token, &session, request.video, total).await?;
        let video_url = video_url(&video_id);
        tracing::info!(%video_id, %video_url, "Video uploaded");

        let thumbnail_set = match self
            .chunk_retry
            .run("set_thumbnail", || self.set_thumbnail(&token, &video_id, request.thumbnail))
            .await
        {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(%video_id, error = %e, "Thumbnail could not be attached");
                false
            }
        };

        Ok(UploadedVideo {
            video_id,
            video_url,
            thumbnail_set,
        })
    }

    /// Open a resumable session and return its URL.
    async fn start_session(
        &self,
        token: &str,
        request: &UploadRequest<'_>,
        total: u64,
    ) -> Result<String, YouTubeError> {
        let response = self
            .http
            .post(format!(
                "{}/upload/youtube/v3/videos?uploadType=resumable&part=snippet,status",
                self.base_url
            ))
            .bearer_auth(token)
            .header("X-Upload-Content-Type", "video/mp4")
            .header("X-Upload-Content-Length", total)
            .json(&VideoResource::from_request(request))
            .send()
            .await?;

        let response = Self::ensure_success(response).await?;
        response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| YouTubeError::MalformedResponse("resumable session without Location".into()))
    }

    async fn send_chunks(
        &self,
        token: &str,
        session: &str,
        video: &Path,
        total: u64,
    ) -> Result<String, YouTubeError> {
        let mut offset = 0u64;
        loop {
            let needs_resync = AtomicBool::new(false);
            let outcome = self
                .chunk_retry
                .run("upload_chunk", || {
                    let needs_resync = &needs_resync;
                    async move {
                        let start = if needs_resync.swap(false, Ordering::SeqCst) {
                            match self.query_offset(token, session, total).await {
                                Ok(ChunkOutcome::Incomplete { next_offset }) => next_offset,
                                Ok(done @ ChunkOutcome::Complete { .. }) => return Ok(done),
                                Err(e) => {
                                    needs_resync.store(true, Ordering::SeqCst);
                                    return Err(e);
                                }
                            }
                        } else {
                            offset
                        };
                        let result = self.put_chunk(token, session, video, start, total).await;
                        if result.is_err() {
                            needs_resync.store(true, Ordering::SeqCst);
                        }
                        result
                    }
                })
                .await?;

            match outcome {
                ChunkOutcome::Complete { video_id } => return Ok(video_id),
                ChunkOutcome::Incomplete { next_offset } => {
                    let percent = if total == 0 { 100 } else { next_offset * 100 / total };
                    tracing::info!(sent = next_offset, total, percent, "Upload progress");
                    offset = next_offset;
                }
            }
        }
    }

    async fn put_chunk(
        &self,
        token: &str,
        session: &str,
        video: &Path,
        start: u64,
        total: u64,
    ) -> Result<ChunkOutcome, YouTubeError> {
        let mut file = tokio::fs::File::open(video).await?;
        file.seek(SeekFrom::Start(start)).await?;
        let mut chunk = Vec::with_capacity(self.chunk_size.min(total.saturating_sub(start)) as usize);
        file.take(self.chunk_size).read_to_end(&mut chunk).await?;

        let range = if chunk.is_empty() {
            format!("bytes */{total}")
        } else {
            format!("bytes {start}-{}/{total}", start + chunk.len() as u64 - 1)
        };

        let response = self
            .http
            .put(session)
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_RANGE, range)
            .header(reqwest::header::CONTENT_TYPE, "video/mp4")
            .body(chunk)
            .send()
            .await?;

        Self::chunk_outcome(response).await
    }

    /// Ask the session how many bytes it has persisted.
    async fn query_offset(&self, token: &str, session: &str, total: u64) -> Result<ChunkOutcome, YouTubeError> {
        let response = self
            .http
            .put(session)
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_RANGE, format!("bytes */{total}"))
            .header(reqwest::header::CONTENT_LENGTH, 0)
            .send()
            .await?;

        let outcome = Self::chunk_outcome(response).await?;
        tracing::info!(?outcome, "Resynchronized upload offset");
        Ok(outcome)
    }

    async fn chunk_outcome(response: reqwest::Response) -> Result<ChunkOutcome, YouTubeError> {
        if response.status().as_u16() == 308 {
            let range = response
                .headers()
                .get(reqwest::header::RANGE)
                .and_then(|v| v.to_str().ok());
            return Ok(ChunkOutcome::Incomplete {
                next_offset: next_offset_from_range(range)?,
            });
        }
        let response = Self::ensure_success(response).await?;
        let inserted: InsertedVideo = response.json().await?;
        Ok(ChunkOutcome::Complete {
            video_id: inserted.id,
        })
    }

    pub async fn set_thumbnail(&self, token: &str, video_id: &str, thumbnail: &Path) -> Result<(), YouTubeError> {
        let bytes = tokio::fs::read(thumbnail).await?;
        let response = self
            .http
            .post(format!("{}/upload/youtube/v3/thumbnails/set", self.base_url))
            .query(&[("videoId", video_id)])
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, "image/png")
            .body(bytes)
            .send()
            .await?;

        Self::ensure_success(response).await?;
        tracing::info!(%video_id, "Thumbnail attached");
        Ok(())
    }

    // ---- private helpers ----

    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, YouTubeError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(YouTubeError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}
