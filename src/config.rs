//! Runtime configuration passed explicitly into the sync engine.
//!
//! Paths default to `~/.relsync/` (or `$RELSYNC_HOME`). OAuth client
//! credentials come from `GOOGLE_CLIENT_ID` / `GOOGLE_CLIENT_SECRET`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::SyncError;

pub const DATA_DIR_ENV: &str = "RELSYNC_HOME";
pub const CLIENT_ID_ENV: &str = "GOOGLE_CLIENT_ID";
pub const CLIENT_SECRET_ENV: &str = "GOOGLE_CLIENT_SECRET";

/// Source of "now" for cursor windows, cadence scoring and timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock pinned to one instant. Used by tests and replays.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// OAuth2 desktop client credentials.
#[derive(Clone)]
pub struct GoogleCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for GoogleCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

impl GoogleCredentials {
    /// Read credentials from the environment. `None` when either is unset or blank.
    pub fn from_env() -> Option<Self> {
        let client_id = std::env::var(CLIENT_ID_ENV).ok()?;
        let client_secret = std::env::var(CLIENT_SECRET_ENV).ok()?;
        Self::from_parts(&client_id, &client_secret)
    }

    fn from_parts(client_id: &str, client_secret: &str) -> Option<Self> {
        let client_id = client_id.trim();
        let client_secret = client_secret.trim();
        if client_id.is_empty() || client_secret.is_empty() {
            return None;
        }
        Some(Self {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        })
    }
}

/// Everything an importer needs besides its provider client.
#[derive(Clone)]
pub struct SyncConfig {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub token_path: PathBuf,
    pub credentials: Option<GoogleCredentials>,
    pub clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncConfig")
            .field("data_dir", &self.data_dir)
            .field("db_path", &self.db_path)
            .field("token_path", &self.token_path)
            .field("credentials", &self.credentials)
            .finish()
    }
}

impl SyncConfig {
    /// Build the runtime config from CLI overrides and the environment.
    pub fn load(db_path: Option<PathBuf>, token_path: Option<PathBuf>) -> Result<Self, SyncError> {
        let data_dir = default_data_dir()?;
        Ok(Self::with_paths(
            &data_dir,
            db_path,
            token_path,
            GoogleCredentials::from_env(),
        ))
    }

    pub fn with_paths(
        data_dir: &Path,
        db_path: Option<PathBuf>,
        token_path: Option<PathBuf>,
        credentials: Option<GoogleCredentials>,
    ) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
            db_path: db_path.unwrap_or_else(|| crate::db::SyncDb::default_path(data_dir)),
            token_path: token_path.unwrap_or_else(|| data_dir.join("google").join("token.json")),
            credentials,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Credentials are a precondition for any importer; their absence is fatal.
    pub fn require_credentials(&self) -> Result<&GoogleCredentials, SyncError> {
        self.credentials.as_ref().ok_or(SyncError::MissingCredentials)
    }
}

/// `$RELSYNC_HOME`, else `~/.relsync`.
pub fn default_data_dir() -> Result<PathBuf, SyncError> {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        if !dir.trim().is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    dirs::home_dir()
        .map(|home| home.join(".relsync"))
        .ok_or_else(|| SyncError::Configuration("home directory not found".to_string()))
}
