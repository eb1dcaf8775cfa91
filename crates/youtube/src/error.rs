use lofi_core::retry::{classify_http_status, classify_request_error, Classify, ErrorClass};

/// Errors from the YouTube OAuth and upload layers.
#[derive(Debug, thiserror::Error)]
pub enum YouTubeError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The API returned an unexpected status code.
    #[error("YouTube API error ({status}): {body}")]
    ApiError { status: u16, body: String },

    /// The token endpoint refused the grant (revoked or invalid credentials).
    #[error("OAuth token request rejected ({status}): {body}")]
    TokenRejected { status: u16, body: String },

    /// The interactive consent flow did not produce an authorization code.
    #[error("OAuth consent flow failed: {0}")]
    Consent(String),

    #[error("Malformed YouTube API response: {0}")]
    MalformedResponse(String),

    #[error("Token cache error: {0}")]
    TokenCache(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Classify for YouTubeError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Request(e) => classify_request_error(e),
            Self::ApiError { status, .. } => classify_http_status(*status),
            Self::TokenRejected { status, .. } if *status >= 500 => ErrorClass::Transient,
            Self::TokenRejected { .. }
            | Self::Consent(_)
            | Self::MalformedResponse(_)
            | Self::TokenCache(_)
            | Self::Io(_) => ErrorClass::Permanent,
        }
    }
}
