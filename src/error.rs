//! Error types for sync runs
//!
//! Errors are classified by recoverability:
//! - Retryable: provider failures that outlived the request retry budget
//! - NonRetryable: local store and validation failures
//! - RequiresUserAction: missing credentials, missing or revoked OAuth token

use std::time::Duration;

use thiserror::Error;

use crate::db::DbError;
use crate::google_api::GoogleApiError;

/// Error types for sync runs
#[derive(Debug, Error)]
pub enum SyncError {
    // Retryable errors
    #[error("Provider request failed: {0}")]
    Provider(String),

    // Non-retryable errors
    #[error("Local store error: {0}")]
    Store(#[from] DbError),

    #[error("Sync interval {} is too short; minimum is {}", human(.0), human(.1))]
    IntervalTooShort(Duration, Duration),

    #[error("No services selected")]
    NoServices,

    #[error("Unknown service '{0}' (expected contacts, calendar, gmail or all)")]
    UnknownService(String),

    #[error("Invalid cadence: {0}")]
    InvalidCadence(String),

    #[error("Contact not found: {0}")]
    ContactNotFound(String),

    #[error("Ambiguous contact '{0}': {1} contacts share that name")]
    AmbiguousContact(String, usize),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // Requires user action
    #[error("Google OAuth credentials missing: set GOOGLE_CLIENT_ID and GOOGLE_CLIENT_SECRET")]
    MissingCredentials,

    #[error("Not authenticated with Google: {0}")]
    AuthRequired(String),
}

fn human(d: &Duration) -> humantime::FormattedDuration {
    humantime::format_duration(*d)
}

impl SyncError {
    /// Returns true if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Provider(_))
    }

    /// Returns true if this error requires user action to resolve
    pub fn requires_user_action(&self) -> bool {
        matches!(
            self,
            SyncError::MissingCredentials | SyncError::AuthRequired(_)
        )
    }

    /// Get a user-friendly recovery suggestion
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            SyncError::Provider(_) => {
                "The next run resumes from the last stored cursor. Check your connection and try again."
            }
            SyncError::Store(_) => "Check file permissions and disk space for the data directory.",
            SyncError::IntervalTooShort(..) => "Use an interval of at least 5 minutes, e.g. --interval 15m.",
            SyncError::NoServices | SyncError::UnknownService(_) => {
                "Pass --services with any of contacts,calendar,gmail or 'all'."
            }
            SyncError::InvalidCadence(_) => "Cadence days must be a positive number.",
            SyncError::ContactNotFound(_) | SyncError::AmbiguousContact(..) => {
                "Use the contact id instead of the name."
            }
            SyncError::Configuration(_) => "Check RELSYNC_HOME and the --db/--token paths.",
            SyncError::MissingCredentials => {
                "Export GOOGLE_CLIENT_ID and GOOGLE_CLIENT_SECRET, then run `relsync sync init`."
            }
            SyncError::AuthRequired(_) => "Run `relsync sync init` to authenticate with Google.",
        }
    }
}

impl From<GoogleApiError> for SyncError {
    fn from(err: GoogleApiError) -> Self {
        match err {
            GoogleApiError::AuthExpired | GoogleApiError::TokenNotFound(_) => {
                SyncError::AuthRequired(err.to_string())
            }
            GoogleApiError::RefreshFailed(ref msg) if msg.contains("invalid_grant") => {
                SyncError::AuthRequired(err.to_string())
            }
            other => SyncError::Provider(other.to_string()),
        }
    }
}
