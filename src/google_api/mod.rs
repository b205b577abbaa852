//! Native Google API client.
//!
//! Direct HTTP via reqwest against People v1, Calendar v3 and Gmail v1.
//! The OAuth token lives in a JSON file whose path comes from `SyncConfig`;
//! nothing here reads process-global paths.
//!
//! Modules:
//! - auth: OAuth2 browser consent flow (`relsync sync init`)
//! - calendar: Calendar events.list with sync tokens
//! - contacts: People connections.list with sync tokens
//! - gmail: Gmail history/messages, metadata only
//! - token_store: token file persistence

pub mod auth;
pub mod calendar;
pub mod contacts;
pub mod gmail;
pub mod token_store;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::GoogleCredentials;

/// Read-only scopes. Gmail needs `gmail.readonly` rather than
/// `gmail.metadata` because the latter rejects `q` searches; message bodies
/// are still never requested.
pub const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/contacts.readonly",
    "https://www.googleapis.com/auth/calendar.readonly",
    "https://www.googleapis.com/auth/gmail.readonly",
];

pub const AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
pub const TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

// ============================================================================
// Token types
// ============================================================================

/// OAuth2 token payload persisted in the token file.
///
/// Both `token` and `access_token` are accepted on read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleToken {
    #[serde(alias = "access_token")]
    pub token: String,
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    pub client_id: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    /// RFC 3339 expiry of `token`.
    #[serde(default)]
    pub expiry: Option<String>,
    /// Authenticated user email.
    #[serde(default, alias = "email")]
    pub account: Option<String>,
}

fn default_token_uri() -> String {
    TOKEN_URI.to_string()
}

// ============================================================================
// Error type
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum GoogleApiError {
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Token expired or revoked")]
    AuthExpired,
    #[error("Token not found at {0}")]
    TokenNotFound(PathBuf),
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),
    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("OAuth flow cancelled")]
    FlowCancelled,
    #[error("OAuth state mismatch")]
    OAuthStateMismatch,
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl GoogleApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            GoogleApiError::ApiError { status, .. } => Some(*status),
            GoogleApiError::Http(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

// ============================================================================
// Retry
// ============================================================================

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 250,
            max_backoff_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retryable,
    NonRetryable,
}

fn retry_decision_for_status(status: reqwest::StatusCode) -> RetryDecision {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        RetryDecision::Retryable
    } else {
        RetryDecision::NonRetryable
    }
}

/// Backoff before attempt `attempt + 1`. `Retry-After` (seconds, capped at 30)
/// wins over the exponential schedule.
fn retry_delay(
    attempt: u32,
    policy: &RetryPolicy,
    retry_after: Option<&reqwest::header::HeaderValue>,
) -> Duration {
    if let Some(value) = retry_after.and_then(|v| v.to_str().ok()) {
        if let Ok(secs) = value.trim().parse::<u64>() {
            return Duration::from_secs(secs.min(30));
        }
    }

    let exponent = 2u64.saturating_pow(attempt.saturating_sub(1));
    let base = policy
        .initial_backoff_ms
        .saturating_mul(exponent)
        .min(policy.max_backoff_ms);
    let jitter = (std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0))
        % 150;
    Duration::from_millis(base.saturating_add(jitter))
}

/// Send a request, retrying 429/408/5xx and connect/timeout failures.
///
/// The final response is returned as-is whatever its status; callers decide
/// what a 404 or 410 means for their endpoint.
pub async fn send_with_retry(
    request: reqwest::RequestBuilder,
    policy: &RetryPolicy,
) -> Result<reqwest::Response, GoogleApiError> {
    let attempts = policy.max_attempts.max(1);
    for attempt in 1..=attempts {
        let Some(cloned) = request.try_clone() else {
            return request.send().await.map_err(GoogleApiError::Http);
        };

        match cloned.send().await {
            Ok(response) => {
                let status = response.status();
                let decision = retry_decision_for_status(status);
                if decision == RetryDecision::Retryable && attempt < attempts {
                    let delay = retry_delay(
                        attempt,
                        policy,
                        response.headers().get(reqwest::header::RETRY_AFTER),
                    );
                    log::warn!(
                        "google_api: retry {}/{} after status {} (sleep {:?})",
                        attempt,
                        attempts,
                        status,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                return Ok(response);
            }
            Err(err) => {
                let retryable_transport = err.is_timeout() || err.is_connect();
                if retryable_transport && attempt < attempts {
                    let delay = retry_delay(attempt, policy, None);
                    log::warn!(
                        "google_api: retry {}/{} after transport error: {} (sleep {:?})",
                        attempt,
                        attempts,
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                return Err(GoogleApiError::Http(err));
            }
        }
    }

    Err(GoogleApiError::ApiError {
        status: 0,
        message: "request exhausted retries".to_string(),
    })
}

/// Pull `error.message` out of a Google JSON error body, else the raw body.
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v["error"]["message"]
                .as_str()
                .or_else(|| v["error_description"].as_str())
                .map(|s| s.to_string())
        })
        .unwrap_or_else(|| body.trim().to_string())
}

/// Convert a non-success response into an error. 401 means the token is dead.
pub(crate) async fn error_from_response(resp: reqwest::Response) -> GoogleApiError {
    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return GoogleApiError::AuthExpired;
    }
    let body = resp.text().await.unwrap_or_default();
    GoogleApiError::ApiError {
        status: status.as_u16(),
        message: extract_error_message(&body),
    }
}

pub(crate) async fn read_json<T: DeserializeOwned>(
    resp: reqwest::Response,
) -> Result<T, GoogleApiError> {
    if !resp.status().is_success() {
        return Err(error_from_response(resp).await);
    }
    Ok(resp.json().await?)
}

// ============================================================================
// Token refresh
// ============================================================================

/// Whether a token is expired (or within 60 seconds of it) at `now`.
pub fn is_token_expired(token: &GoogleToken, now: DateTime<Utc>) -> bool {
    match &token.expiry {
        None => true,
        Some(expiry_str) => match DateTime::parse_from_rfc3339(expiry_str) {
            Ok(expiry) => expiry <= now + chrono::Duration::seconds(60),
            Err(_) => true,
        },
    }
}

fn map_refresh_error(status: u16, body: &str) -> GoogleApiError {
    let lowered = body.to_lowercase();
    if (status == 400 || status == 401)
        && (lowered.contains("invalid_grant") || lowered.contains("token has been expired"))
    {
        return GoogleApiError::AuthExpired;
    }
    GoogleApiError::RefreshFailed(format!("HTTP {}: {}", status, body))
}

/// Owns the token file and serializes refreshes.
pub struct GoogleAuth {
    token_path: PathBuf,
    credentials: GoogleCredentials,
    http: reqwest::Client,
    refresh_lock: Mutex<()>,
}

impl GoogleAuth {
    pub fn new(token_path: PathBuf, credentials: GoogleCredentials) -> Self {
        Self {
            token_path,
            credentials,
            http: reqwest::Client::new(),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn token_path(&self) -> &std::path::Path {
        &self.token_path
    }

    pub fn load_token(&self) -> Result<GoogleToken, GoogleApiError> {
        token_store::load_token(&self.token_path)
    }

    /// A valid access token, refreshing and persisting it if expired.
    pub async fn access_token(&self) -> Result<String, GoogleApiError> {
        let _guard = self.refresh_lock.lock().await;
        let token = self.load_token()?;
        if !is_token_expired(&token, Utc::now()) {
            return Ok(token.token);
        }
        let refreshed = self.refresh(&token).await?;
        Ok(refreshed.token)
    }

    async fn refresh(&self, token: &GoogleToken) -> Result<GoogleToken, GoogleApiError> {
        let refresh_token = token
            .refresh_token
            .as_deref()
            .ok_or(GoogleApiError::AuthExpired)?;

        let resp = self
            .http
            .post(&token.token_uri)
            .form(&[
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;
        let status = resp.status();
        let body_text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(map_refresh_error(status.as_u16(), &body_text));
        }
        let body: serde_json::Value = serde_json::from_str(&body_text)?;

        let access_token = body["access_token"]
            .as_str()
            .ok_or_else(|| GoogleApiError::RefreshFailed("No access_token in response".into()))?;
        let expires_in = body["expires_in"].as_u64().unwrap_or(3600);
        let expiry = Utc::now() + chrono::Duration::seconds(expires_in as i64);

        let mut new_token = token.clone();
        new_token.token = access_token.to_string();
        new_token.expiry = Some(expiry.to_rfc3339());
        token_store::save_token(&self.token_path, &new_token)?;
        log::debug!("google_api: refreshed access token");
        Ok(new_token)
    }
}

/// Authenticated GET with the shared retry policy.
#[derive(Clone)]
pub struct GoogleClient {
    auth: Arc<GoogleAuth>,
    http: reqwest::Client,
    retry: RetryPolicy,
}

impl GoogleClient {
    pub fn new(auth: Arc<GoogleAuth>) -> Self {
        Self {
            auth,
            http: reqwest::Client::new(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn auth(&self) -> &GoogleAuth {
        &self.auth
    }

    pub(crate) async fn get(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<reqwest::Response, GoogleApiError> {
        let access_token = self.auth.access_token().await?;
        let request = self.http.get(url).bearer_auth(access_token).query(query);
        send_with_retry(request, &self.retry).await
    }
}

// ============================================================================
// Tests
// ============================================================================
