//! Shared type definitions for the database layer.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors specific to database operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Schema migration failed: {0}")]
    Migration(String),

    #[error("Invalid {column} value in database: '{value}'")]
    InvalidValue { column: &'static str, value: String },

    #[error("Metadata encoding failed: {0}")]
    Metadata(#[from] serde_json::Error),
}

// =============================================================================
// Sync state
// =============================================================================

/// Lifecycle status of a service's sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Idle,
    Syncing,
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Error => "error",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(SyncStatus::Idle),
            "syncing" => Ok(SyncStatus::Syncing),
            "error" => Ok(SyncStatus::Error),
            other => Err(DbError::InvalidValue {
                column: "status",
                value: other.to_string(),
            }),
        }
    }
}

/// A row from the `sync_state` table. One per external service.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub service: String,
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Provider-specific cursor. Empty when the next run must do a window scan.
    pub last_sync_token: String,
    pub status: SyncStatus,
    pub error_message: Option<String>,
}

impl SyncState {
    /// Whether the next run can resume incrementally from a stored cursor.
    pub fn has_cursor(&self) -> bool {
        !self.last_sync_token.trim().is_empty()
    }
}

// =============================================================================
// Sync log (dedup ledger)
// =============================================================================

/// Current version of the `sync_log.metadata` JSON layout.
pub const SYNC_LOG_SCHEMA_VERSION: u32 = 1;

/// Result of writing a dedup ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutcome {
    Logged,
    /// The `(service, source_id)` pair was already present. Benign.
    AlreadyLogged,
}

/// Which domain entity a ledger entry points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Contact,
    Company,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Contact => "contact",
            EntityKind::Company => "company",
        }
    }
}

impl FromStr for EntityKind {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "contact" => Ok(EntityKind::Contact),
            "company" => Ok(EntityKind::Company),
            other => Err(DbError::InvalidValue {
                column: "entity_type",
                value: other.to_string(),
            }),
        }
    }
}

/// Whether a mail interaction was sent or received by the account owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MailDirection {
    Inbound,
    Outbound,
}

/// Per-provider details kept alongside a ledger entry.
///
/// Mail records never carry body content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImportedRecord {
    CalendarEvent {
        summary: String,
        start: DateTime<Utc>,
        attendee_count: usize,
    },
    GmailMessage {
        thread_id: String,
        subject: String,
        direction: MailDirection,
    },
    Contact {
        resource_name: String,
        #[serde(default)]
        company: Option<String>,
    },
}

/// Versioned wrapper serialized into `sync_log.metadata`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncLogMetadata {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(flatten)]
    pub record: ImportedRecord,
}

fn default_schema_version() -> u32 {
    SYNC_LOG_SCHEMA_VERSION
}

impl SyncLogMetadata {
    pub fn new(record: ImportedRecord) -> Self {
        Self {
            schema_version: SYNC_LOG_SCHEMA_VERSION,
            record,
        }
    }
}

/// A row from the `sync_log` table.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncLogEntry {
    pub id: i64,
    pub source_service: String,
    pub source_id: String,
    pub entity_type: EntityKind,
    pub entity_id: String,
    pub imported_at: DateTime<Utc>,
    pub metadata: Option<SyncLogMetadata>,
}

// =============================================================================
// Contacts and companies
// =============================================================================

/// A row from the `contacts` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DbContact {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub company_id: Option<String>,
    pub last_contacted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A row from the `companies` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DbCompany {
    pub id: String,
    pub name: String,
    pub domain: Option<String>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Interactions and cadence
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionType {
    Meeting,
    Call,
    Email,
    Message,
    Event,
}

impl InteractionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionType::Meeting => "meeting",
            InteractionType::Call => "call",
            InteractionType::Email => "email",
            InteractionType::Message => "message",
            InteractionType::Event => "event",
        }
    }
}

impl FromStr for InteractionType {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "meeting" => Ok(InteractionType::Meeting),
            "call" => Ok(InteractionType::Call),
            "email" => Ok(InteractionType::Email),
            "message" => Ok(InteractionType::Message),
            "event" => Ok(InteractionType::Event),
            other => Err(DbError::InvalidValue {
                column: "interaction_type",
                value: other.to_string(),
            }),
        }
    }
}

/// A row from the `interaction_log` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionLog {
    pub id: String,
    pub contact_id: String,
    pub interaction_type: InteractionType,
    pub timestamp: DateTime<Utc>,
    pub notes: Option<String>,
    pub sentiment: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationshipStrength {
    Weak,
    #[default]
    Medium,
    Strong,
}

impl RelationshipStrength {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipStrength::Weak => "weak",
            RelationshipStrength::Medium => "medium",
            RelationshipStrength::Strong => "strong",
        }
    }

    /// Weight applied to overdue days when scoring follow-up priority.
    pub fn multiplier(&self) -> f64 {
        match self {
            RelationshipStrength::Weak => 1.0,
            RelationshipStrength::Medium => 1.5,
            RelationshipStrength::Strong => 2.0,
        }
    }
}

impl fmt::Display for RelationshipStrength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelationshipStrength {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "weak" => Ok(RelationshipStrength::Weak),
            "medium" => Ok(RelationshipStrength::Medium),
            "strong" => Ok(RelationshipStrength::Strong),
            other => Err(DbError::InvalidValue {
                column: "relationship_strength",
                value: other.to_string(),
            }),
        }
    }
}

/// Default follow-up cadence for a contact without an explicit setting.
pub const DEFAULT_CADENCE_DAYS: i64 = 30;

/// A row from the `contact_cadence` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactCadence {
    pub contact_id: String,
    pub cadence_days: i64,
    pub relationship_strength: RelationshipStrength,
    pub priority_score: f64,
    pub last_interaction_date: Option<DateTime<Utc>>,
    pub next_followup_date: Option<DateTime<Utc>>,
}

impl ContactCadence {
    /// Cadence created lazily on a contact's first interaction.
    pub fn with_defaults(contact_id: &str) -> Self {
        Self {
            contact_id: contact_id.to_string(),
            cadence_days: DEFAULT_CADENCE_DAYS,
            relationship_strength: RelationshipStrength::default(),
            priority_score: 0.0,
            last_interaction_date: None,
            next_followup_date: None,
        }
    }
}

/// A follow-up candidate joined with its contact.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowupRow {
    pub contact: DbContact,
    pub cadence: ContactCadence,
}
