//! Incremental sync engine.
//!
//! One importer per provider. Every importer follows the same lifecycle,
//! driven by [`SyncEngine::run_service`]:
//!
//! 1. `sync_state.status = syncing`
//! 2. pick a fetch mode from the stored cursor (or the `initial` flag)
//! 3. page through the provider, filtering and importing each record in its
//!    own transaction, deduplicated through `sync_log`
//! 4. on success store the provider's newest cursor (status back to idle);
//!    on failure set status `error` and leave the cursor where it was
//!
//! A cursor the provider no longer accepts is not a failure: the importer
//! clears it and re-runs the fetch over a short recent window.

pub mod calendar;
pub mod contacts;
pub mod gmail;
pub mod source;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::config::SyncConfig;
use crate::db::{DbError, SyncDb, SyncStatus};
use crate::error::SyncError;
use crate::google_api::calendar::CalendarClient;
use crate::google_api::contacts::PeopleClient;
use crate::google_api::gmail::GmailClient;
use crate::google_api::{GoogleApiError, GoogleAuth, GoogleClient};

use self::source::{CalendarSource, ContactsSource, FetchResult, MailSource};

// ============================================================================
// Services
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncService {
    Contacts,
    Calendar,
    Gmail,
}

impl SyncService {
    /// Canonical run order. Contacts go first so meeting attendees and mail
    /// senders resolve to directory names rather than derived ones.
    pub const ALL: [SyncService; 3] = [SyncService::Contacts, SyncService::Calendar, SyncService::Gmail];

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncService::Contacts => "contacts",
            SyncService::Calendar => "calendar",
            SyncService::Gmail => "gmail",
        }
    }
}

impl fmt::Display for SyncService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncService {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "contacts" => Ok(SyncService::Contacts),
            "calendar" => Ok(SyncService::Calendar),
            "gmail" => Ok(SyncService::Gmail),
            other => Err(SyncError::UnknownService(other.to_string())),
        }
    }
}

/// Parse `contacts,gmail` or `all`. Duplicates collapse; canonical order is kept.
pub fn parse_service_list(raw: &str) -> Result<Vec<SyncService>, SyncError> {
    let mut selected = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        if part.eq_ignore_ascii_case("all") {
            selected.extend(SyncService::ALL);
        } else {
            selected.push(part.parse::<SyncService>()?);
        }
    }
    if selected.is_empty() {
        return Err(SyncError::NoServices);
    }
    selected.sort();
    selected.dedup();
    Ok(selected)
}

// ============================================================================
// Reports
// ============================================================================

/// Why a fetched record produced no interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SkipReason {
    AllDay,
    Cancelled,
    Declined,
    Solo,
    MissingStart,
    /// Starts after the run. Not logged, so a later run imports it once it has happened.
    Upcoming,
    AutomatedSender,
    GroupEmail,
    CalendarInvite,
    LowSignal,
    Draft,
    Deleted,
    NoIdentity,
    Duplicate,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::AllDay => "all_day",
            SkipReason::Cancelled => "cancelled",
            SkipReason::Declined => "declined",
            SkipReason::Solo => "solo",
            SkipReason::MissingStart => "missing_start",
            SkipReason::Upcoming => "upcoming",
            SkipReason::AutomatedSender => "automated_sender",
            SkipReason::GroupEmail => "group_email",
            SkipReason::CalendarInvite => "calendar_invite",
            SkipReason::LowSignal => "low_signal",
            SkipReason::Draft => "draft",
            SkipReason::Deleted => "deleted",
            SkipReason::NoIdentity => "no_identity",
            SkipReason::Duplicate => "duplicate",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the importer selected what to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    Incremental,
    Window { days: i64 },
    /// Full listing (contacts have no time window).
    Full,
}

impl fmt::Display for FetchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchMode::Incremental => f.write_str("incremental"),
            FetchMode::Window { days } => write!(f, "window {}d", days),
            FetchMode::Full => f.write_str("full"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    pub service: SyncService,
    pub mode: FetchMode,
    pub fetched: usize,
    pub imported: usize,
    pub interactions: usize,
    /// Records whose store write failed. Processing continued past them.
    pub failed: usize,
    pub skipped: BTreeMap<SkipReason, usize>,
    /// The stored cursor was rejected and the run fell back to a window.
    pub cursor_reset: bool,
    /// Newest provider cursor, stored by the engine on success.
    pub cursor: Option<String>,
}

impl SyncReport {
    pub fn new(service: SyncService, mode: FetchMode) -> Self {
        Self {
            service,
            mode,
            fetched: 0,
            imported: 0,
            interactions: 0,
            failed: 0,
            skipped: BTreeMap::new(),
            cursor_reset: false,
            cursor: None,
        }
    }

    pub fn skip(&mut self, reason: SkipReason) {
        *self.skipped.entry(reason).or_insert(0) += 1;
    }

    pub fn skipped_for(&self, reason: SkipReason) -> usize {
        self.skipped.get(&reason).copied().unwrap_or(0)
    }

    pub fn total_skipped(&self) -> usize {
        self.skipped.values().sum()
    }

    /// One-line human summary for logs and the CLI.
    pub fn summary(&self) -> String {
        let mut line = format!(
            "{}: {} fetched, {} imported ({} interactions), {} skipped, {} failed [{}{}]",
            self.service,
            self.fetched,
            self.imported,
            self.interactions,
            self.total_skipped(),
            self.failed,
            self.mode,
            if self.cursor_reset { ", cursor reset" } else { "" },
        );
        if !self.skipped.is_empty() {
            let reasons: Vec<String> = self
                .skipped
                .iter()
                .map(|(reason, count)| format!("{}={}", reason, count))
                .collect();
            line.push_str(&format!(" skips: {}", reasons.join(" ")));
        }
        line
    }

    /// Fold one record's transactional outcome into the counters.
    pub(crate) fn record(&mut self, source_id: &str, outcome: Result<RecordOutcome, DbError>) {
        match outcome {
            Ok(RecordOutcome::Imported { interactions }) => {
                self.imported += 1;
                self.interactions += interactions;
            }
            Ok(RecordOutcome::Skipped(reason)) => self.skip(reason),
            Err(err) => {
                log::warn!("{} sync: failed to import {}: {}", self.service, source_id, err);
                self.failed += 1;
            }
        }
    }
}

/// Why paging stopped before the last page.
pub(crate) enum Interrupted {
    /// The provider no longer accepts the cursor the listing started from.
    CursorInvalid,
    Failed(SyncError),
}

impl From<DbError> for Interrupted {
    fn from(err: DbError) -> Self {
        Interrupted::Failed(err.into())
    }
}

impl From<GoogleApiError> for Interrupted {
    fn from(err: GoogleApiError) -> Self {
        Interrupted::Failed(err.into())
    }
}

impl<T> FetchResult<T> {
    pub(crate) fn into_page(self) -> Result<T, Interrupted> {
        match self {
            FetchResult::Page(page) => Ok(page),
            FetchResult::CursorInvalid => Err(Interrupted::CursorInvalid),
            FetchResult::Failure(err) => Err(err.into()),
        }
    }
}

/// Result of importing one record inside its transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RecordOutcome {
    Imported { interactions: usize },
    Skipped(SkipReason),
}

// ============================================================================
// Engine
// ============================================================================

/// Provider clients the engine dispatches to.
pub struct Sources {
    pub contacts: Box<dyn ContactsSource>,
    pub calendar: Box<dyn CalendarSource>,
    pub mail: Box<dyn MailSource>,
}

impl Sources {
    pub fn google(auth: Arc<GoogleAuth>) -> Self {
        let client = GoogleClient::new(auth);
        Self {
            contacts: Box::new(PeopleClient::new(client.clone())),
            calendar: Box::new(CalendarClient::new(client.clone())),
            mail: Box::new(GmailClient::new(client)),
        }
    }
}

pub struct SyncEngine {
    config: SyncConfig,
    db: SyncDb,
    sources: Sources,
    /// Checked before any state is touched. `None` when sources need no auth.
    auth: Option<Arc<GoogleAuth>>,
}

impl SyncEngine {
    pub fn new(config: SyncConfig, db: SyncDb, sources: Sources) -> Self {
        Self {
            config,
            db,
            sources,
            auth: None,
        }
    }

    /// Engine backed by the Google APIs. Credentials are a hard precondition.
    pub fn connect(config: SyncConfig) -> Result<Self, SyncError> {
        let credentials = config.require_credentials()?.clone();
        let db = SyncDb::open_at(&config.db_path)?;
        let auth = Arc::new(GoogleAuth::new(config.token_path.clone(), credentials));
        let sources = Sources::google(Arc::clone(&auth));
        Ok(Self {
            config,
            db,
            sources,
            auth: Some(auth),
        })
    }

    pub fn db(&self) -> &SyncDb {
        &self.db
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Fail fast on a missing or revoked token without touching sync state.
    async fn preflight(&self) -> Result<(), SyncError> {
        if let Some(auth) = &self.auth {
            auth.access_token().await?;
        }
        Ok(())
    }

    /// Run one importer once, owning the `sync_state` lifecycle.
    pub async fn run_service(
        &self,
        service: SyncService,
        initial: bool,
    ) -> Result<SyncReport, SyncError> {
        self.preflight().await?;

        let prior = self.db.get_sync_state(service.as_str())?;
        self.db
            .set_status(service.as_str(), SyncStatus::Syncing, None)?;
        log::info!(
            "{} sync: starting{}",
            service,
            if initial { " (initial)" } else { "" }
        );
        let started = Instant::now();

        let clock = &*self.config.clock;
        let result = match service {
            SyncService::Contacts => {
                contacts::ContactsImporter::new(&self.db, &*self.sources.contacts, clock)
                    .run(initial)
                    .await
            }
            SyncService::Calendar => {
                calendar::CalendarImporter::new(&self.db, &*self.sources.calendar, clock)
                    .run(initial)
                    .await
            }
            SyncService::Gmail => {
                gmail::GmailImporter::new(&self.db, &*self.sources.mail, clock)
                    .run(initial)
                    .await
            }
        };

        match result {
            Ok(report) => {
                let stored = match &report.cursor {
                    Some(cursor) => self
                        .db
                        .set_cursor(service.as_str(), cursor, self.config.now()),
                    None => self.db.set_status(service.as_str(), SyncStatus::Idle, None),
                };
                if let Err(err) = stored {
                    log::error!("{} sync: could not store cursor: {}", service, err);
                    if let Err(store_err) = self.db.set_status(
                        service.as_str(),
                        SyncStatus::Error,
                        Some(&err.to_string()),
                    ) {
                        log::error!("{} sync: could not record failure: {}", service, store_err);
                    }
                    return Err(err.into());
                }
                log::info!("{} ({:.1?})", report.summary(), started.elapsed());
                Ok(report)
            }
            Err(err) => {
                // Auth problems leave the durable state as it was.
                let restore = if err.requires_user_action() {
                    let (status, message) = match &prior {
                        Some(p) if p.status != SyncStatus::Syncing => {
                            (p.status, p.error_message.clone())
                        }
                        _ => (SyncStatus::Idle, None),
                    };
                    self.db
                        .set_status(service.as_str(), status, message.as_deref())
                } else {
                    self.db
                        .set_status(service.as_str(), SyncStatus::Error, Some(&err.to_string()))
                };
                if let Err(store_err) = restore {
                    log::error!("{} sync: could not record failure: {}", service, store_err);
                }
                log::error!(
                    "{} sync: failed after {:.1?}: {}",
                    service,
                    started.elapsed(),
                    err
                );
                Err(err)
            }
        }
    }

    /// Run every service once in canonical order, isolating failures.
    pub async fn run_all(&self, initial: bool) -> Vec<(SyncService, Result<SyncReport, SyncError>)> {
        let mut results = Vec::with_capacity(SyncService::ALL.len());
        for service in SyncService::ALL {
            results.push((service, self.run_service(service, initial).await));
        }
        results
    }
}


#[cfg(test)]
mod tests {
    use std::path::Path;

    use chrono::{DateTime, Utc};

    use super::fakes::*;
    use super::source::*;
    use super::*;
    use crate::config::FixedClock;
    use crate::db::test_utils::test_db;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-06-15T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn engine(calendar: Vec<Scripted<CalendarPage>>) -> SyncEngine {
        let config = SyncConfig::with_paths(Path::new("/tmp/relsync-test"), None, None, None)
            .with_clock(Arc::new(FixedClock(now())));
        let sources = Sources {
            contacts: Box::new(FakeContacts::new(vec![Scripted::Page(ContactsPage {
                next_sync_token: Some("people-1".to_string()),
                ..Default::default()
            })])),
            calendar: Box::new(FakeCalendar::new(calendar)),
            mail: Box::new(FakeMail::new(
                "me@acme.com",
                vec![Scripted::Page(MessageIdPage::default())],
                vec![],
            )),
        };
        SyncEngine::new(config, test_db(), sources)
    }

    #[test]
    fn test_parse_service_list() {
        assert_eq!(parse_service_list("all").unwrap(), SyncService::ALL.to_vec());
        assert_eq!(
            parse_service_list("gmail, calendar,gmail").unwrap(),
            vec![SyncService::Calendar, SyncService::Gmail]
        );
        assert!(matches!(parse_service_list(" , "), Err(SyncError::NoServices)));
        assert!(matches!(
            parse_service_list("calendar,slack"),
            Err(SyncError::UnknownService(s)) if s == "slack"
        ));
    }

    #[test]
    fn test_report_summary_lists_skips() {
        let mut report = SyncReport::new(SyncService::Calendar, FetchMode::Window { days: 7 });
        report.fetched = 4;
        report.skip(SkipReason::Solo);
        report.skip(SkipReason::AllDay);
        report.skip(SkipReason::Solo);
        assert_eq!(report.total_skipped(), 3);
        assert_eq!(report.skipped_for(SkipReason::Solo), 2);
        let summary = report.summary();
        assert!(summary.contains("window 7d"));
        assert!(summary.contains("all_day=1 solo=2"));
    }

    #[tokio::test]
    async fn test_success_stores_cursor_and_idles() {
        let engine = engine(vec![Scripted::Page(CalendarPage {
            next_sync_token: Some("cal-sync-1".to_string()),
            ..Default::default()
        })]);
        let report = engine.run_service(SyncService::Calendar, false).await.unwrap();
        assert_eq!(report.cursor.as_deref(), Some("cal-sync-1"));

        let state = engine.db().get_sync_state("calendar").unwrap().unwrap();
        assert_eq!(state.status, SyncStatus::Idle);
        assert_eq!(state.last_sync_token, "cal-sync-1");
        assert_eq!(state.last_sync_time, Some(now()));
    }

    #[tokio::test]
    async fn test_failure_sets_error_and_keeps_cursor() {
        let engine = engine(vec![Scripted::Fail(503)]);
        engine
            .db()
            .set_cursor("calendar", "cal-sync-old", now())
            .unwrap();

        let err = engine
            .run_service(SyncService::Calendar, false)
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        let state = engine.db().get_sync_state("calendar").unwrap().unwrap();
        assert_eq!(state.status, SyncStatus::Error);
        assert!(state.error_message.unwrap().contains("503"));
        assert_eq!(state.last_sync_token, "cal-sync-old");
    }

    #[tokio::test]
    async fn test_cursor_write_failure_marks_error() {
        let engine = engine(vec![Scripted::Page(CalendarPage {
            next_sync_token: Some("cal-sync-1".to_string()),
            ..Default::default()
        })]);
        engine
            .db()
            .conn_ref()
            .execute_batch(
                "CREATE TEMP TRIGGER reject_cursor BEFORE UPDATE OF last_sync_token ON sync_state
                 WHEN NEW.last_sync_token = 'cal-sync-1'
                 BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END;",
            )
            .unwrap();

        let err = engine
            .run_service(SyncService::Calendar, false)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Store(_)));

        let state = engine.db().get_sync_state("calendar").unwrap().unwrap();
        assert_eq!(state.status, SyncStatus::Error);
        assert!(state.error_message.as_ref().unwrap().contains("disk I/O error"));
        assert!(!state.has_cursor());
    }

    #[tokio::test]
    async fn test_run_all_isolates_failures() {
        let engine = engine(vec![Scripted::Fail(500)]);
        let results = engine.run_all(false).await;
        let outcome: Vec<(SyncService, bool)> =
            results.iter().map(|(s, r)| (*s, r.is_ok())).collect();
        assert_eq!(
            outcome,
            vec![
                (SyncService::Contacts, true),
                (SyncService::Calendar, false),
                (SyncService::Gmail, true),
            ]
        );
        for state in engine.db().list_sync_states().unwrap() {
            assert_ne!(state.status, SyncStatus::Syncing);
        }
    }

    #[test]
    fn test_connect_requires_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let config = SyncConfig::with_paths(dir.path(), None, None, None);
        assert!(matches!(
            SyncEngine::connect(config),
            Err(SyncError::MissingCredentials)
        ));
        // Nothing was created on the way out.
        assert!(!dir.path().join("relsync.db").exists());
    }
}
