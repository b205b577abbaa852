//! Handlers behind the `relsync sync …` subcommands.
//!
//! Everything here returns data or a [`SyncError`]; printing and exit codes
//! belong to `main`.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cadence;
use crate::config::SyncConfig;
use crate::db::{ContactCadence, DbContact, FollowupRow, RelationshipStrength, SyncDb, SyncStatus};
use crate::error::SyncError;
use crate::google_api::{auth, token_store};
use crate::sync::SyncService;

/// Run the browser consent flow and store the token. Returns the account email.
pub async fn init(config: &SyncConfig) -> Result<String, SyncError> {
    let credentials = config.require_credentials()?;
    let email = auth::run_consent_flow(credentials, &config.token_path).await?;
    log::info!("auth: connected Google account {}", email);
    Ok(email)
}

/// One line of `sync status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub service: SyncService,
    pub status: SyncStatus,
    pub last_sync_time: Option<DateTime<Utc>>,
    /// The next run resumes from a stored cursor.
    pub incremental: bool,
    pub error_message: Option<String>,
}

/// Status of every service, including ones that never ran.
pub fn status(db: &SyncDb) -> Result<Vec<ServiceStatus>, SyncError> {
    let mut rows = Vec::with_capacity(SyncService::ALL.len());
    for service in SyncService::ALL {
        let row = match db.get_sync_state(service.as_str())? {
            Some(state) => ServiceStatus {
                service,
                status: state.status,
                last_sync_time: state.last_sync_time,
                incremental: state.has_cursor(),
                error_message: state.error_message,
            },
            None => ServiceStatus {
                service,
                status: SyncStatus::Idle,
                last_sync_time: None,
                incremental: false,
                error_message: None,
            },
        };
        rows.push(row);
    }
    Ok(rows)
}

/// Account line for `sync status`.
pub fn account_summary(token_path: &Path) -> String {
    if !token_path.exists() {
        return "not connected (run `relsync sync init`)".to_string();
    }
    token_store::peek_account_email(token_path)
        .unwrap_or_else(|| "connected (account unknown)".to_string())
}

pub fn format_status(rows: &[ServiceStatus]) -> String {
    let mut out = String::new();
    for row in rows {
        let last = row
            .last_sync_time
            .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
            .unwrap_or_else(|| "never".to_string());
        let mode = if row.incremental { "incremental" } else { "window" };
        out.push_str(&format!(
            "{:<9} {:<8} last sync {:<20} next run {}",
            row.service.as_str(),
            row.status.as_str(),
            last,
            mode
        ));
        if let Some(err) = &row.error_message {
            out.push_str(&format!("\n          error: {}", err));
        }
        out.push('\n');
    }
    out
}

/// `sync reset <service|all>`: status back to idle, cursor kept.
/// Returns the services that had state to reset.
pub fn reset(db: &SyncDb, target: &str) -> Result<Vec<SyncService>, SyncError> {
    let services = if target.trim().eq_ignore_ascii_case("all") {
        SyncService::ALL.to_vec()
    } else {
        vec![target.parse::<SyncService>()?]
    };
    let mut reset = Vec::new();
    for service in services {
        if db.reset_sync_state(service.as_str())? {
            log::info!("{} sync: state reset to idle", service);
            reset.push(service);
        }
    }
    Ok(reset)
}

/// Find a contact by id, else by exact name. Several contacts sharing the
/// name is an error rather than a guess.
pub fn find_contact(db: &SyncDb, query: &str) -> Result<DbContact, SyncError> {
    let query = query.trim();
    if let Some(contact) = db.get_contact(query)? {
        return Ok(contact);
    }
    if query.contains('@') {
        if let Some(contact) = db.find_contact_by_email(query)? {
            return Ok(contact);
        }
    }
    let mut matches = db.find_contacts_by_name(query)?;
    match matches.len() {
        0 => Err(SyncError::ContactNotFound(query.to_string())),
        1 => Ok(matches.remove(0)),
        n => Err(SyncError::AmbiguousContact(query.to_string(), n)),
    }
}

/// `sync cadence <contact> [--days N] [--strength S]`.
pub fn set_cadence(
    db: &SyncDb,
    query: &str,
    days: Option<i64>,
    strength: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(DbContact, ContactCadence), SyncError> {
    let strength = strength
        .map(|s| {
            s.parse::<RelationshipStrength>()
                .map_err(|_| SyncError::InvalidCadence(format!("unknown strength '{}'", s)))
        })
        .transpose()?;
    let contact = find_contact(db, query)?;
    let cadence = cadence::set_cadence(db, &contact.id, days, strength, now)?;
    Ok((contact, cadence))
}

pub fn followups(db: &SyncDb, limit: usize) -> Result<Vec<FollowupRow>, SyncError> {
    Ok(db.get_followups(limit)?)
}

pub fn format_followups(rows: &[FollowupRow]) -> String {
    if rows.is_empty() {
        return "No follow-ups yet. Run `relsync sync` to import interactions.\n".to_string();
    }
    let mut out = String::new();
    for (i, row) in rows.iter().enumerate() {
        let next = row
            .cadence
            .next_followup_date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "{:>3}. {:<28} score {:>6.1}  every {:>3}d ({})  next {}\n",
            i + 1,
            row.contact.name,
            row.cadence.priority_score,
            row.cadence.cadence_days,
            row.cadence.relationship_strength,
            next
        ));
    }
    out
}
