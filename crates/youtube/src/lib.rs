//! YouTube Data API v3 client: OAuth2 credentials and resumable uploads.

pub mod auth;
pub mod error;
pub mod upload;

pub use auth::{OAuthClient, OAuthConfig, StoredToken};
pub use error::YouTubeError;
pub use upload::{video_url, UploadRequest, UploadedVideo, YouTubeUploader};
