//! OAuth2 credentials for the YouTube upload scope.
//!
//! Resolution order for an access token:
//!
//! 1. the in-memory token, or the token cache file, while it is not
//!    about to expire;
//! 2. a refresh with the cached refresh token, falling back to the
//!    configured one;
//! 3. an installed-app consent flow on a loopback redirect, which needs
//!    a person at a browser.
//!
//! Every newly obtained token is written back to the cache file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use lofi_core::types::Timestamp;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

use crate::error::YouTubeError;

pub const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/auth";
pub const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const UPLOAD_SCOPE: &str = "https://www.googleapis.com/auth/youtube.upload";

/// A token expiring within this margin is treated as expired.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// How long the consent flow waits for the browser redirect.
const CONSENT_TIMEOUT: Duration = Duration::from_secs(300);

/// OAuth client parameters.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Pre-provisioned refresh token. `None` means the cache or the
    /// consent flow must supply one.
    pub refresh_token: Option<String>,
    pub token_cache: PathBuf,
    pub auth_url: String,
    pub token_url: String,
}

impl OAuthConfig {
    pub fn new(client_id: String, client_secret: String, token_cache: PathBuf) -> Self {
        Self {
            client_id,
            client_secret,
            refresh_token: None,
            token_cache,
            auth_url: AUTH_URL.to_string(),
            token_url: TOKEN_URL.to_string(),
        }
    }

    /// Empty strings count as absent.
    pub fn with_refresh_token(mut self, refresh_token: Option<String>) -> Self {
        self.refresh_token = refresh_token.filter(|t| !t.trim().is_empty());
        self
    }
}

/// Token as persisted in the cache file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredToken {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<Timestamp>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl StoredToken {
    /// Usable at `now` without a refresh.
    pub fn is_fresh_at(&self, now: Timestamp) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at - chrono::Duration::seconds(EXPIRY_MARGIN_SECS) > now,
            None => false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

impl TokenResponse {
    /// Refresh responses omit the refresh token; keep the one used.
    fn into_stored(self, now: Timestamp, previous_refresh: Option<&str>) -> StoredToken {
        StoredToken {
            access_token: self.access_token,
            refresh_token: self
                .refresh_token
                .or_else(|| previous_refresh.map(str::to_string)),
            expires_at: self
                .expires_in
                .map(|secs| now + chrono::Duration::seconds(secs)),
            scope: self.scope,
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Hands out access tokens, refreshing or re-authorizing as needed.
pub struct OAuthClient {
    http: reqwest::Client,
    config: OAuthConfig,
    current: tokio::sync::Mutex<Option<StoredToken>>,
}

impl OAuthClient {
    pub fn new(config: OAuthConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            current: tokio::sync::Mutex::new(None),
        }
    }

    /// A bearer token for the upload scope.
    pub async fn access_token(&self) -> Result<String, YouTubeError> {
        let mut current = self.current.lock().await;
        if current.is_none() {
            *current = load_cache(&self.config.token_cache).await;
        }

        if let Some(token) = current.as_ref().filter(|t| t.is_fresh_at(Utc::now())) {
            return Ok(token.access_token.clone());
        }

        let refresh_token = current
            .as_ref()
            .and_then(|t| t.refresh_token.clone())
            .or_else(|| self.config.refresh_token.clone());

        let token = match refresh_token {
            Some(refresh_token) => {
                tracing::info!("Refreshing YouTube access token");
                self.refresh(&refresh_token).await?
            }
            None => {
                tracing::info!("No YouTube refresh token available, starting consent flow");
                self.consent_flow().await?
            }
        };

        save_cache(&self.config.token_cache, &token).await?;
        let access_token = token.access_token.clone();
        *current = Some(token);
        Ok(access_token)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<StoredToken, YouTubeError> {
        let response = self
            .post_token(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .await?;
        Ok(response.into_stored(Utc::now(), Some(refresh_token)))
    }

    async fn consent_flow(&self) -> Result<StoredToken, YouTubeError> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let redirect_uri = format!("http://127.0.0.1:{}", listener.local_addr()?.port());
        let state = uuid::Uuid::new_v4().to_string();
        let url = authorization_url(&self.config, &redirect_uri, &state)?;

        println!("\nYouTube authorization required");
        println!("Open this URL in a browser and approve the upload permission:");
        println!("  {url}");
        println!("Waiting up to {}s for the redirect...\n", CONSENT_TIMEOUT.as_secs());
        tracing::info!(%redirect_uri, "Waiting for OAuth consent");

        let code = tokio::time::timeout(CONSENT_TIMEOUT, receive_callback(&listener, &state))
            .await
            .map_err(|_| YouTubeError::Consent("timed out waiting for the browser redirect".into()))??;

        let response = self
            .post_token(&[
                ("code", code.as_str()),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("redirect_uri", redirect_uri.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .await?;

        tracing::info!("OAuth consent completed");
        Ok(response.into_stored(Utc::now(), None))
    }

    async fn post_token(&self, form: &[(&str, &str)]) -> Result<TokenResponse, YouTubeError> {
        let response = self
            .http
            .post(&self.config.token_url)
            .form(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(YouTubeError::TokenRejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json::<TokenResponse>().await?)
    }
}

// ---------------------------------------------------------------------------
// Consent flow helpers
// ---------------------------------------------------------------------------

pub fn authorization_url(
    config: &OAuthConfig,
    redirect_uri: &str,
    state: &str,
) -> Result<Url, YouTubeError> {
    Url::parse_with_params(
        &config.auth_url,
        &[
            ("client_id", config.client_id.as_str()),
            ("redirect_uri", redirect_uri),
            ("response_type", "code"),
            ("scope", UPLOAD_SCOPE),
            ("access_type", "offline"),
            ("prompt", "consent"),
            ("state", state),
        ],
    )
    .map_err(|e| YouTubeError::Consent(format!("invalid authorization URL: {e}")))
}

/// Extract the authorization code from the redirect's request line.
///
/// `Ok(None)` means the request is unrelated (a favicon request, say) and
/// the listener should keep waiting.
pub fn parse_callback(request_line: &str, expected_state: &str) -> Result<Option<String>, YouTubeError> {
    let target = request_line
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| YouTubeError::Consent(format!("malformed request line: {request_line:?}")))?;
    let url = Url::parse(&format!("http://127.0.0.1{target}"))
        .map_err(|e| YouTubeError::Consent(format!("malformed redirect target: {e}")))?;
    let params: HashMap<String, String> = url.query_pairs().into_owned().collect();

    if let Some(error) = params.get("error") {
        return Err(YouTubeError::Consent(format!("authorization denied: {error}")));
    }
    let Some(code) = params.get("code") else {
        return Ok(None);
    };
    if params.get("state").map(String::as_str) != Some(expected_state) {
        return Err(YouTubeError::Consent("state parameter mismatch".into()));
    }
    Ok(Some(code.clone()))
}

/// Accept connections on `listener` until the OAuth redirect arrives.
pub async fn receive_callback(listener: &TcpListener, expected_state: &str) -> Result<String, YouTubeError> {
    loop {
        let (mut stream, _) = listener.accept().await?;
        let (read_half, mut write_half) = stream.split();

        let mut request_line = String::new();
        BufReader::new(read_half).read_line(&mut request_line).await?;

        let (status, body, outcome) = match parse_callback(&request_line, expected_state) {
            Ok(Some(code)) => ("200 OK", "Authorization complete. You can close this tab.", Some(Ok(code))),
            Ok(None) => ("404 Not Found", "Not found", None),
            Err(e) => ("400 Bad Request", "Authorization failed. Check the terminal.", Some(Err(e))),
        };
        let reply = format!(
            "HTTP/1.1 {status}\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        if let Err(e) = write_half.write_all(reply.as_bytes()).await {
            tracing::debug!(error = %e, "Failed to answer OAuth redirect");
        }

        if let Some(outcome) = outcome {
            return outcome;
        }
    }
}

// ---------------------------------------------------------------------------
// Token cache
// ---------------------------------------------------------------------------

/// Read the token cache. A missing or unreadable cache yields `None`.
pub async fn load_cache(path: &Path) -> Option<StoredToken> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Cannot read token cache");
            return None;
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(token) => Some(token),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Ignoring corrupt token cache");
            None
        }
    }
}

/// Write the token cache via a temporary file and rename.
pub async fn save_cache(path: &Path, token: &StoredToken) -> Result<(), YouTubeError> {
    let json = serde_json::to_vec_pretty(token)?;
    let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    tracing::debug!(path = %path.display(), "Token cache written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::TimeZone;
    use tokio::io::AsyncReadExt;

    use super::*;

    fn at(secs: i64) -> Timestamp {
        Utc.timestamp_opt(1_790_000_000 + secs, 0).unwrap()
    }

    fn token(expires_at: Option<Timestamp>) -> StoredToken {
        StoredToken {
            access_token: "ya29.access".into(),
            refresh_token: Some("1//refresh".into()),
            expires_at,
            scope: Some(UPLOAD_SCOPE.into()),
        }
    }

    fn config(cache: PathBuf) -> OAuthConfig {
        OAuthConfig::new("client-id".into(), "client-secret".into(), cache)
    }

    #[test]
    fn freshness_honours_expiry_margin() {
        let t = token(Some(at(3600)));
        assert!(t.is_fresh_at(at(0)));
        assert!(t.is_fresh_at(at(3600 - EXPIRY_MARGIN_SECS - 1)));
        assert!(!t.is_fresh_at(at(3600 - EXPIRY_MARGIN_SECS)));
        assert!(!token(None).is_fresh_at(at(0)));
    }

    #[test]
    fn refresh_response_keeps_previous_refresh_token() {
        let response: TokenResponse =
            serde_json::from_str(r#"{"access_token":"new","expires_in":3599,"token_type":"Bearer"}"#).unwrap();
        let stored = response.into_stored(at(0), Some("1//old"));
        assert_eq!(stored.access_token, "new");
        assert_eq!(stored.refresh_token.as_deref(), Some("1//old"));
        assert_eq!(stored.expires_at, Some(at(3599)));
    }

    #[test]
    fn empty_configured_refresh_token_is_absent() {
        let cfg = config("token.json".into()).with_refresh_token(Some("  ".into()));
        assert!(cfg.refresh_token.is_none());
    }

    #[test]
    fn authorization_url_requests_offline_upload_scope() {
        let url = authorization_url(&config("token.json".into()), "http://127.0.0.1:8765", "st8").unwrap();
        let params: HashMap<String, String> = url.query_pairs().into_owned().collect();
        assert_eq!(params["scope"], UPLOAD_SCOPE);
        assert_eq!(params["access_type"], "offline");
        assert_eq!(params["redirect_uri"], "http://127.0.0.1:8765");
        assert_eq!(params["state"], "st8");
    }

    #[test]
    fn callback_parsing() {
        assert_eq!(
            parse_callback("GET /?state=s1&code=4%2Fabc HTTP/1.1\r\n", "s1").unwrap(),
            Some("4/abc".to_string())
        );
        assert_eq!(parse_callback("GET /favicon.ico HTTP/1.1\r\n", "s1").unwrap(), None);
        assert_matches!(
            parse_callback("GET /?state=other&code=x HTTP/1.1", "s1"),
            Err(YouTubeError::Consent(_))
        );
        assert_matches!(
            parse_callback("GET /?error=access_denied HTTP/1.1", "s1"),
            Err(YouTubeError::Consent(m)) if m.contains("access_denied")
        );
        assert_matches!(parse_callback("", "s1"), Err(YouTubeError::Consent(_)));
    }

    #[tokio::test]
    async fn loopback_listener_returns_code_after_ignoring_favicon_requests() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let browser = tokio::spawn(async move {
            for target in ["/favicon.ico", "/?code=granted&state=abc"] {
                let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
                stream
                    .write_all(format!("GET {target} HTTP/1.1\r\n").as_bytes())
                    .await
                    .unwrap();
                let mut reply = String::new();
                stream.read_to_string(&mut reply).await.unwrap();
                assert!(reply.starts_with("HTTP/1.1"));
            }
        });

        let code = receive_callback(&listener, "abc").await.unwrap();
        browser.await.unwrap();
        assert_eq!(code, "granted");
    }

    #[tokio::test]
    async fn cache_round_trip_and_corrupt_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        assert!(load_cache(&path).await.is_none());

        let stored = token(Some(at(3600)));
        save_cache(&path, &stored).await.unwrap();
        assert_eq!(load_cache(&path).await, Some(stored));

        std::fs::write(&path, b"{not json").unwrap();
        assert!(load_cache(&path).await.is_none());
    }

    #[tokio::test]
    async fn fresh_cached_token_is_used_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        let mut cached = token(Some(Utc::now() + chrono::Duration::hours(1)));
        cached.access_token = "cached-access".into();
        save_cache(&path, &cached).await.unwrap();

        let mut cfg = config(path);
        cfg.token_url = "http://127.0.0.1:9/unreachable".into();
        let client = OAuthClient::new(cfg);

        assert_eq!(client.access_token().await.unwrap(), "cached-access");
    }
}
