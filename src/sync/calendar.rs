//! Calendar importer: meetings become `meeting` interactions for every
//! external attendee.

use chrono::Duration;

use super::source::{CalendarEvent, CalendarQuery, CalendarSource, EventAttendee};
use super::{FetchMode, Interrupted, RecordOutcome, SkipReason, SyncReport, SyncService};
use crate::cadence;
use crate::config::Clock;
use crate::db::{
    DbError, EntityKind, ImportedRecord, InteractionType, LogOutcome, SyncDb, SyncLogMetadata,
};
use crate::error::SyncError;
use crate::resolver::EntityResolver;

/// Look-back of a first (`--initial`) run.
pub const INITIAL_WINDOW_DAYS: i64 = 180;
/// Look-back when there is no usable sync token.
pub const RECENT_WINDOW_DAYS: i64 = 7;

const SERVICE: SyncService = SyncService::Calendar;

/// Decide whether an event counts as a meeting with other people.
///
/// Checks run in a fixed order so the reported reason is stable.
pub fn classify_event(event: &CalendarEvent) -> Result<(), SkipReason> {
    if event.all_day {
        return Err(SkipReason::AllDay);
    }
    if event.status.as_deref() == Some("cancelled") {
        return Err(SkipReason::Cancelled);
    }
    let declined = event
        .attendees
        .iter()
        .any(|a| a.is_self && a.response_status.as_deref() == Some("declined"));
    if declined {
        return Err(SkipReason::Declined);
    }
    // Rooms and equipment are attendees too; they don't make a meeting.
    let people = event.attendees.iter().filter(|a| !a.resource).count();
    if people <= 1 {
        return Err(SkipReason::Solo);
    }
    if event.start.is_none() {
        return Err(SkipReason::MissingStart);
    }
    Ok(())
}

/// Attendees that represent someone other than the account owner.
fn counterparts(event: &CalendarEvent) -> impl Iterator<Item = &EventAttendee> {
    event
        .attendees
        .iter()
        .filter(|a| !a.is_self && !a.resource && !a.email.is_empty())
}

fn window_rejected() -> SyncError {
    SyncError::Provider("calendar rejected a time-window listing as an expired sync token".to_string())
}

pub struct CalendarImporter<'a> {
    db: &'a SyncDb,
    source: &'a dyn CalendarSource,
    clock: &'a dyn Clock,
}

impl<'a> CalendarImporter<'a> {
    pub fn new(db: &'a SyncDb, source: &'a dyn CalendarSource, clock: &'a dyn Clock) -> Self {
        Self { db, source, clock }
    }

    /// `[now - days, now)`.
    fn window(&self, days: i64) -> CalendarQuery {
        let now = self.clock.now();
        CalendarQuery::Window {
            time_min: now - Duration::days(days),
            time_max: now,
        }
    }

    pub async fn run(&self, initial: bool) -> Result<SyncReport, SyncError> {
        let stored = self
            .db
            .get_sync_state(SERVICE.as_str())?
            .filter(|s| s.has_cursor())
            .map(|s| s.last_sync_token);

        let (query, mode) = match stored {
            Some(sync_token) if !initial => {
                (CalendarQuery::Incremental { sync_token }, FetchMode::Incremental)
            }
            _ => {
                let days = if initial {
                    INITIAL_WINDOW_DAYS
                } else {
                    RECENT_WINDOW_DAYS
                };
                (self.window(days), FetchMode::Window { days })
            }
        };

        let mut report = SyncReport::new(SERVICE, mode);
        match self.fetch_all(&query, &mut report).await {
            Ok(()) if mode == FetchMode::Incremental => {
                self.catch_up(&mut report).await?;
                return Ok(report);
            }
            Ok(()) => return Ok(report),
            Err(Interrupted::Failed(err)) => return Err(err),
            Err(Interrupted::CursorInvalid) if mode != FetchMode::Incremental => {
                return Err(window_rejected())
            }
            Err(Interrupted::CursorInvalid) => {}
        }

        log::warn!(
            "calendar sync: sync token expired, re-fetching the last {} days",
            RECENT_WINDOW_DAYS
        );
        self.db.clear_cursor(SERVICE.as_str())?;
        report.mode = FetchMode::Window {
            days: RECENT_WINDOW_DAYS,
        };
        report.cursor_reset = true;
        report.cursor = None;

        let query = self.window(RECENT_WINDOW_DAYS);
        match self.fetch_all(&query, &mut report).await {
            Ok(()) => Ok(report),
            Err(Interrupted::Failed(err)) => Err(err),
            Err(Interrupted::CursorInvalid) => Err(window_rejected()),
        }
    }

    /// A sync-token listing reports a meeting when it is booked, usually
    /// before it happens, and not again unless it changes. Meetings that
    /// started since are picked up from the recent window; only their imports
    /// count toward the report.
    async fn catch_up(&self, report: &mut SyncReport) -> Result<(), SyncError> {
        let mut recent = SyncReport::new(SERVICE, FetchMode::Window { days: RECENT_WINDOW_DAYS });
        match self.fetch_all(&self.window(RECENT_WINDOW_DAYS), &mut recent).await {
            Ok(()) => {}
            Err(Interrupted::Failed(err)) => return Err(err),
            Err(Interrupted::CursorInvalid) => return Err(window_rejected()),
        }
        if recent.imported > 0 {
            log::info!(
                "calendar sync: imported {} meetings that started since they were booked",
                recent.imported
            );
        }
        report.imported += recent.imported;
        report.interactions += recent.interactions;
        report.failed += recent.failed;
        Ok(())
    }

    async fn fetch_all(
        &self,
        query: &CalendarQuery,
        report: &mut SyncReport,
    ) -> Result<(), Interrupted> {
        let now = self.clock.now();
        let mut page_token: Option<String> = None;
        loop {
            let page = self
                .source
                .list_events(query, page_token.as_deref())
                .await
                .into_page()?;
            log::debug!("calendar sync: page with {} events", page.events.len());

            for event in &page.events {
                report.fetched += 1;
                let outcome = match classify_event(event) {
                    Ok(()) if event.start.is_some_and(|start| start > now) => {
                        Ok(RecordOutcome::Skipped(SkipReason::Upcoming))
                    }
                    Ok(()) => self.import_event(event),
                    Err(reason) => Ok(RecordOutcome::Skipped(reason)),
                };
                report.record(&event.id, outcome);
            }

            if page.next_sync_token.is_some() {
                report.cursor = page.next_sync_token;
            }
            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }
        Ok(())
    }

    /// Import one meeting atomically: contacts, interactions and the ledger
    /// entry commit together or not at all.
    fn import_event(&self, event: &CalendarEvent) -> Result<RecordOutcome, DbError> {
        let Some(start) = event.start else {
            return Ok(RecordOutcome::Skipped(SkipReason::MissingStart));
        };
        let now = self.clock.now();

        self.db.with_transaction(|tx| {
            if tx.log_exists(SERVICE.as_str(), &event.id)? {
                return Ok(RecordOutcome::Skipped(SkipReason::Duplicate));
            }

            let resolver = EntityResolver::new(tx, now);
            let mut contact_ids = Vec::new();
            for attendee in counterparts(event) {
                let contact = resolver
                    .resolve_contact_from_address(attendee.display_name.as_deref(), &attendee.email)?;
                if !contact_ids.contains(&contact.id) {
                    contact_ids.push(contact.id);
                }
            }
            let Some(primary) = contact_ids.first() else {
                return Ok(RecordOutcome::Skipped(SkipReason::NoIdentity));
            };

            let metadata = SyncLogMetadata::new(ImportedRecord::CalendarEvent {
                summary: event.summary.clone(),
                start,
                attendee_count: event.attendees.len(),
            });
            let logged = tx.log_import(
                SERVICE.as_str(),
                &event.id,
                EntityKind::Contact,
                primary,
                Some(&metadata),
                now,
            )?;
            if logged == LogOutcome::AlreadyLogged {
                return Ok(RecordOutcome::Skipped(SkipReason::Duplicate));
            }

            for contact_id in &contact_ids {
                cadence::record_interaction(
                    tx,
                    contact_id,
                    InteractionType::Meeting,
                    start,
                    Some(&event.summary),
                    now,
                )?;
            }
            Ok(RecordOutcome::Imported {
                interactions: contact_ids.len(),
            })
        })
    }
}
