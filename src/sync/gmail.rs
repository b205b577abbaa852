//! Gmail importer: high-signal correspondence becomes `email` interactions.
//!
//! Only metadata is read. A message is imported when it is starred, or when
//! the thread shows a two-way exchange (the account owner replied to it, or
//! it got a reply). Automated senders, group mail and calendar traffic are
//! dropped before any of that is considered.

use std::collections::HashMap;
use std::sync::OnceLock;

use chrono::Duration;
use regex::Regex;

use super::source::{MailMessage, MailQuery, MailSource, Mailbox};
use super::{FetchMode, Interrupted, RecordOutcome, SkipReason, SyncReport, SyncService};
use crate::cadence;
use crate::config::Clock;
use crate::db::{
    DbError, EntityKind, ImportedRecord, InteractionType, LogOutcome, MailDirection, SyncDb,
    SyncLogMetadata,
};
use crate::error::SyncError;
use crate::google_api::GoogleApiError;
use crate::resolver::EntityResolver;

/// Look-back of a first (`--initial`) run.
pub const INITIAL_WINDOW_DAYS: i64 = 30;
/// Look-back when there is no usable history id.
pub const RECENT_WINDOW_DAYS: i64 = 7;
/// Messages with this many To+Cc recipients are treated as group mail.
pub const GROUP_RECIPIENT_THRESHOLD: usize = 5;

const SERVICE: SyncService = SyncService::Gmail;

const INVITE_SUBJECT_PREFIXES: &[&str] = &[
    "invitation:",
    "updated invitation:",
    "accepted:",
    "declined:",
    "tentatively accepted:",
    "canceled event:",
    "cancelled event:",
];

fn re_automated_sender() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)(^|[.\-_+])(no-?reply|do-?not-?reply|notifications?|mailer-daemon|postmaster|newsletter|marketing|bounces?)([.\-_+@]|$)",
        )
        .unwrap()
    })
}

/// Whether an address belongs to a bot, list or notification system.
pub fn is_automated_sender(address: &str) -> bool {
    let local = address.split('@').next().unwrap_or(address);
    re_automated_sender().is_match(local)
}

pub fn is_calendar_invite(message: &MailMessage) -> bool {
    if message
        .content_type
        .as_deref()
        .is_some_and(|ct| ct.to_lowercase().contains("text/calendar"))
    {
        return true;
    }
    let subject = message.subject.trim().to_lowercase();
    INVITE_SUBJECT_PREFIXES
        .iter()
        .any(|prefix| subject.starts_with(prefix))
}

/// Exclusions that apply regardless of stars or replies.
pub fn noise_reason(message: &MailMessage) -> Option<SkipReason> {
    if message
        .from
        .as_ref()
        .is_some_and(|from| is_automated_sender(&from.email))
    {
        return Some(SkipReason::AutomatedSender);
    }
    if message.recipient_count() >= GROUP_RECIPIENT_THRESHOLD {
        return Some(SkipReason::GroupEmail);
    }
    if is_calendar_invite(message) {
        return Some(SkipReason::CalendarInvite);
    }
    None
}

fn is_from(message: &MailMessage, me: &str) -> bool {
    message.is_sent()
        || message
            .from
            .as_ref()
            .is_some_and(|from| from.email.eq_ignore_ascii_case(me))
}

pub fn direction(message: &MailMessage, me: &str) -> MailDirection {
    if is_from(message, me) {
        MailDirection::Outbound
    } else {
        MailDirection::Inbound
    }
}

/// The other party: the sender of inbound mail, the first recipient of outbound.
pub fn counterpart<'m>(
    message: &'m MailMessage,
    direction: MailDirection,
    me: &str,
) -> Option<&'m Mailbox> {
    let candidate = match direction {
        MailDirection::Inbound => message.from.as_ref(),
        MailDirection::Outbound => message
            .to
            .iter()
            .find(|m| !m.email.eq_ignore_ascii_case(me)),
    };
    candidate.filter(|m| m.email.contains('@'))
}

/// Drafts and noise never count, whatever the thread looks like.
fn exclusion(message: &MailMessage) -> Option<SkipReason> {
    if message.has_label("DRAFT") {
        return Some(SkipReason::Draft);
    }
    noise_reason(message)
}

/// Whether a later message in the thread came from the other side: the owner
/// answered inbound mail, or someone answered the owner.
fn answered(message: &MailMessage, direction: MailDirection, thread: &[MailMessage], me: &str) -> bool {
    thread
        .iter()
        .filter(|m| m.id != message.id && m.date > message.date && !m.has_label("DRAFT"))
        .any(|m| self::direction(m, me) != direction)
}

/// Threads fetched during one run, by thread id.
type ThreadCache = HashMap<String, Vec<MailMessage>>;

pub struct GmailImporter<'a> {
    db: &'a SyncDb,
    source: &'a dyn MailSource,
    clock: &'a dyn Clock,
}

impl<'a> GmailImporter<'a> {
    pub fn new(db: &'a SyncDb, source: &'a dyn MailSource, clock: &'a dyn Clock) -> Self {
        Self { db, source, clock }
    }

    pub async fn run(&self, initial: bool) -> Result<SyncReport, SyncError> {
        let me = self.source.account_email().await?.trim().to_lowercase();
        let stored = self
            .db
            .get_sync_state(SERVICE.as_str())?
            .filter(|s| s.has_cursor())
            .map(|s| s.last_sync_token);
        let mut threads = ThreadCache::new();

        let Some(start_history_id) = stored.filter(|_| !initial) else {
            let days = if initial {
                INITIAL_WINDOW_DAYS
            } else {
                RECENT_WINDOW_DAYS
            };
            let report = SyncReport::new(SERVICE, FetchMode::Window { days });
            return self.window_run(days, &me, report, &mut threads).await;
        };

        let mut report = SyncReport::new(SERVICE, FetchMode::Incremental);
        let query = MailQuery::History {
            start_history_id: start_history_id.clone(),
        };
        match self.fetch_all(&query, &me, &mut report, &mut threads).await {
            Ok(latest) => {
                report.cursor = Some(latest.unwrap_or(start_history_id));
                return Ok(report);
            }
            Err(Interrupted::Failed(err)) => return Err(err),
            Err(Interrupted::CursorInvalid) => {}
        }

        log::warn!(
            "gmail sync: history id {} expired, re-scanning the last {} days",
            start_history_id,
            RECENT_WINDOW_DAYS
        );
        self.db.clear_cursor(SERVICE.as_str())?;
        report.mode = FetchMode::Window {
            days: RECENT_WINDOW_DAYS,
        };
        report.cursor_reset = true;
        self.window_run(RECENT_WINDOW_DAYS, &me, report, &mut threads)
            .await
    }

    /// Search a recent window. The cursor is the mailbox history id taken
    /// before listing, so nothing that arrives mid-scan is skipped next time.
    async fn window_run(
        &self,
        days: i64,
        me: &str,
        mut report: SyncReport,
        threads: &mut ThreadCache,
    ) -> Result<SyncReport, SyncError> {
        let history_id = self.source.current_history_id().await?;
        let query = MailQuery::Window {
            after: self.clock.now() - Duration::days(days),
        };
        match self.fetch_all(&query, me, &mut report, threads).await {
            Ok(_) => {
                report.cursor = Some(history_id);
                Ok(report)
            }
            Err(Interrupted::Failed(err)) => Err(err),
            Err(Interrupted::CursorInvalid) => Err(SyncError::Provider(
                "gmail rejected a time-window search as an expired history id".to_string(),
            )),
        }
    }

    /// Page through the listing. Returns the newest history id reported.
    async fn fetch_all(
        &self,
        query: &MailQuery,
        me: &str,
        report: &mut SyncReport,
        threads: &mut ThreadCache,
    ) -> Result<Option<String>, Interrupted> {
        let mut latest = None;
        let mut page_token: Option<String> = None;
        loop {
            let page = self
                .source
                .list_message_ids(query, page_token.as_deref())
                .await
                .into_page()?;
            log::debug!("gmail sync: page with {} messages", page.message_ids.len());

            for id in &page.message_ids {
                report.fetched += 1;
                self.process(id, me, threads, report).await?;
            }

            if page.history_id.is_some() {
                latest = page.history_id;
            }
            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }
        Ok(latest)
    }

    /// Filter one listed message and record the outcome, along with any
    /// earlier messages it answers. Provider errors abort the run; store
    /// errors are counted in the report.
    async fn process(
        &self,
        id: &str,
        me: &str,
        threads: &mut ThreadCache,
        report: &mut SyncReport,
    ) -> Result<(), Interrupted> {
        match self.db.log_exists(SERVICE.as_str(), id) {
            Ok(true) => {
                report.skip(SkipReason::Duplicate);
                return Ok(());
            }
            Ok(false) => {}
            Err(err) => {
                report.record(id, Err(err));
                return Ok(());
            }
        }
        let Some(message) = self.source.get_message(id).await? else {
            report.skip(SkipReason::Deleted);
            return Ok(());
        };
        if let Some(reason) = exclusion(&message) {
            report.skip(reason);
            return Ok(());
        }

        let thread = self.load_thread(&message.thread_id, threads).await?;
        let direction = direction(&message, me);
        let outcome = match counterpart(&message, direction, me) {
            None => Ok(RecordOutcome::Skipped(SkipReason::NoIdentity)),
            Some(other) if message.is_starred() || answered(&message, direction, thread, me) => {
                self.import_message(&message, other, direction)
            }
            Some(_) => Ok(RecordOutcome::Skipped(SkipReason::LowSignal)),
        };
        report.record(id, outcome);

        self.import_answered(&message, direction, thread, me, report);
        Ok(())
    }

    async fn load_thread<'t>(
        &self,
        thread_id: &str,
        threads: &'t mut ThreadCache,
    ) -> Result<&'t [MailMessage], GoogleApiError> {
        if !threads.contains_key(thread_id) {
            let thread = self.source.get_thread(thread_id).await?;
            threads.insert(thread_id.to_string(), thread);
        }
        Ok(threads.get(thread_id).map(Vec::as_slice).unwrap_or_default())
    }

    /// A reply makes the earlier messages from the other side high-signal.
    /// Those were skipped as low signal when they were listed on their own,
    /// and incremental listings never return them again.
    fn import_answered(
        &self,
        reply: &MailMessage,
        reply_direction: MailDirection,
        thread: &[MailMessage],
        me: &str,
        report: &mut SyncReport,
    ) {
        for earlier in thread
            .iter()
            .filter(|m| m.id != reply.id && m.date < reply.date)
        {
            let earlier_direction = direction(earlier, me);
            if earlier_direction == reply_direction || exclusion(earlier).is_some() {
                continue;
            }
            let Some(other) = counterpart(earlier, earlier_direction, me) else {
                continue;
            };
            match self.db.log_exists(SERVICE.as_str(), &earlier.id) {
                Ok(true) => continue,
                Ok(false) => {}
                Err(err) => {
                    report.record(&earlier.id, Err(err));
                    continue;
                }
            }
            log::debug!("gmail sync: {} answered by {}, importing", earlier.id, reply.id);
            report.record(&earlier.id, self.import_message(earlier, other, earlier_direction));
        }
    }

    fn import_message(
        &self,
        message: &MailMessage,
        other: &Mailbox,
        direction: MailDirection,
    ) -> Result<RecordOutcome, DbError> {
        let now = self.clock.now();
        self.db.with_transaction(|tx| {
            let contact = EntityResolver::new(tx, now)
                .resolve_contact_from_address(other.name.as_deref(), &other.email)?;

            let metadata = SyncLogMetadata::new(ImportedRecord::GmailMessage {
                thread_id: message.thread_id.clone(),
                subject: message.subject.clone(),
                direction,
            });
            let logged = tx.log_import(
                SERVICE.as_str(),
                &message.id,
                EntityKind::Contact,
                &contact.id,
                Some(&metadata),
                now,
            )?;
            if logged == LogOutcome::AlreadyLogged {
                return Ok(RecordOutcome::Skipped(SkipReason::Duplicate));
            }

            let subject = Some(message.subject.as_str()).filter(|s| !s.trim().is_empty());
            cadence::record_interaction(
                tx,
                &contact.id,
                InteractionType::Email,
                message.date,
                subject,
                now,
            )?;
            Ok(RecordOutcome::Imported { interactions: 1 })
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use super::super::fakes::{FakeMail, Scripted};
    use super::super::source::MessageIdPage;
    use super::*;
    use crate::config::FixedClock;
    use crate::db::test_utils::test_db;

    const ME: &str = "me@acme.com";

    fn ts(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw).unwrap().with_timezone(&Utc)
    }

    fn now() -> DateTime<Utc> {
        ts("2026-06-15T12:00:00Z")
    }

    fn mailbox(email: &str) -> Mailbox {
        Mailbox {
            name: None,
            email: email.to_string(),
        }
    }

    fn msg(id: &str, thread: &str, from: &str, to: &[&str], labels: &[&str], date: &str) -> MailMessage {
        MailMessage {
            id: id.to_string(),
            thread_id: thread.to_string(),
            from: Some(mailbox(from)),
            to: to.iter().map(|e| mailbox(e)).collect(),
            cc: vec![],
            subject: format!("Re: {}", thread),
            content_type: Some("multipart/alternative".to_string()),
            label_ids: labels.iter().map(|l| l.to_string()).collect(),
            date: ts(date),
        }
    }

    fn listing(ids: &[&str]) -> Scripted<MessageIdPage> {
        Scripted::Page(MessageIdPage {
            message_ids: ids.iter().map(|s| s.to_string()).collect(),
            next_page_token: None,
            history_id: None,
        })
    }

    #[test]
    fn test_automated_senders() {
        for addr in [
            "noreply@github.com",
            "no-reply@accounts.google.com",
            "do-not-reply@bank.com",
            "notifications@linear.app",
            "MAILER-DAEMON@googlemail.com",
            "team.newsletter@substack.com",
        ] {
            assert!(is_automated_sender(addr), "{} should be automated", addr);
        }
        for addr in ["alice@initech.com", "renotify.person@x.com", "marketingbob@x.com"] {
            assert!(!is_automated_sender(addr), "{} should be a person", addr);
        }
    }

    #[test]
    fn test_noise_overrides_star() {
        let starred_bot = msg("m1", "t1", "no-reply@github.com", &[ME], &["INBOX", "STARRED"], "2026-06-10T10:00:00Z");
        assert_eq!(noise_reason(&starred_bot), Some(SkipReason::AutomatedSender));

        let five = ["a@x.com", "b@x.com", "c@x.com", "d@x.com", ME];
        let group = msg("m2", "t2", "bob@globex.com", &five, &["STARRED"], "2026-06-10T10:00:00Z");
        assert_eq!(noise_reason(&group), Some(SkipReason::GroupEmail));

        let four = msg("m3", "t3", "bob@globex.com", &five[1..], &["STARRED"], "2026-06-10T10:00:00Z");
        assert_eq!(noise_reason(&four), None);

        let mut invite = msg("m4", "t4", "bob@globex.com", &[ME], &[], "2026-06-10T10:00:00Z");
        invite.subject = "Invitation: QBR @ Thu Jun 18".to_string();
        assert_eq!(noise_reason(&invite), Some(SkipReason::CalendarInvite));

        let mut ics = msg("m5", "t5", "bob@globex.com", &[ME], &[], "2026-06-10T10:00:00Z");
        ics.content_type = Some("text/calendar; method=REQUEST".to_string());
        assert!(is_calendar_invite(&ics));
    }

    #[test]
    fn test_direction_and_counterpart() {
        let sent = msg("m1", "t1", ME, &[ME, "erin@initech.com"], &["SENT"], "2026-06-10T10:00:00Z");
        assert_eq!(direction(&sent, ME), MailDirection::Outbound);
        assert_eq!(
            counterpart(&sent, MailDirection::Outbound, ME).map(|m| m.email.as_str()),
            Some("erin@initech.com")
        );

        let note_to_self = msg("m2", "t2", ME, &[ME], &["SENT"], "2026-06-10T10:00:00Z");
        assert!(counterpart(&note_to_self, MailDirection::Outbound, ME).is_none());

        let received = msg("m3", "t3", "erin@initech.com", &[ME], &["INBOX"], "2026-06-10T10:00:00Z");
        assert_eq!(direction(&received, ME), MailDirection::Inbound);
    }

    #[tokio::test]
    async fn test_window_run_keeps_only_high_signal_mail() {
        let db = test_db();
        let clock = FixedClock(now());
        let five = ["a@x.com", "b@x.com", "c@x.com", "d@x.com", ME];
        let mut draft = msg("draft", "t9", ME, &["alice@initech.com"], &["DRAFT"], "2026-06-14T10:00:00Z");
        draft.subject = "unsent".to_string();
        let messages = vec![
            msg("starred", "t1", "alice@initech.com", &[ME], &["INBOX", "STARRED"], "2026-06-10T09:00:00Z"),
            msg("bot", "t2", "no-reply@github.com", &[ME], &["INBOX", "STARRED"], "2026-06-10T09:00:00Z"),
            msg("group", "t3", "bob@globex.com", &five, &["INBOX", "STARRED"], "2026-06-10T09:00:00Z"),
            // carol wrote, the owner replied: carol's message counts, the reply does not.
            msg("carol-1", "t4", "carol@hooli.com", &[ME], &["INBOX"], "2026-06-11T09:00:00Z"),
            msg("carol-2", "t4", ME, &["carol@hooli.com"], &["SENT"], "2026-06-11T10:00:00Z"),
            msg("dave", "t5", "dave@pied-piper.com", &[ME], &["INBOX"], "2026-06-12T09:00:00Z"),
            draft,
        ];
        let source = FakeMail::new(
            ME,
            vec![listing(&["starred", "bot", "group", "carol-1", "carol-2", "dave", "gone", "draft"])],
            messages,
        );

        let report = GmailImporter::new(&db, &source, &clock)
            .run(false)
            .await
            .unwrap();
        assert_eq!(report.mode, FetchMode::Window { days: RECENT_WINDOW_DAYS });
        assert_eq!(report.fetched, 8);
        assert_eq!(report.imported, 2);
        assert_eq!(report.skipped_for(SkipReason::AutomatedSender), 1);
        assert_eq!(report.skipped_for(SkipReason::GroupEmail), 1);
        assert_eq!(report.skipped_for(SkipReason::LowSignal), 2);
        assert_eq!(report.skipped_for(SkipReason::Deleted), 1);
        assert_eq!(report.skipped_for(SkipReason::Draft), 1);
        assert_eq!(report.cursor.as_deref(), Some("9000"));
        assert_eq!(
            source.queries(),
            vec![MailQuery::Window {
                after: now() - Duration::days(RECENT_WINDOW_DAYS)
            }]
        );

        assert_eq!(db.count_interactions(Some(InteractionType::Email)).unwrap(), 2);
        assert!(db.find_contact_by_email("alice@initech.com").unwrap().is_some());
        assert!(db.find_contact_by_email("carol@hooli.com").unwrap().is_some());
        assert!(db.find_contact_by_email("bob@globex.com").unwrap().is_none());
        assert!(db.find_contact_by_email("dave@pied-piper.com").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_outbound_mail_with_reply_is_logged_against_recipient() {
        let db = test_db();
        let clock = FixedClock(now());
        let messages = vec![
            msg("ask", "t1", ME, &["erin@initech.com"], &["SENT"], "2026-06-10T09:00:00Z"),
            msg("answer", "t1", "erin@initech.com", &[ME], &["INBOX"], "2026-06-10T11:00:00Z"),
        ];
        let source = FakeMail::new(ME, vec![listing(&["ask", "answer"])], messages);

        let report = GmailImporter::new(&db, &source, &clock)
            .run(false)
            .await
            .unwrap();
        assert_eq!(report.imported, 1);
        assert_eq!(report.skipped_for(SkipReason::LowSignal), 1);

        let erin = db.find_contact_by_email("erin@initech.com").unwrap().unwrap();
        let entry = db.get_log_entry("gmail", "ask").unwrap().unwrap();
        assert_eq!(entry.entity_id, erin.id);
        match entry.metadata.unwrap().record {
            ImportedRecord::GmailMessage { direction, thread_id, .. } => {
                assert_eq!(direction, MailDirection::Outbound);
                assert_eq!(thread_id, "t1");
            }
            other => panic!("unexpected metadata {:?}", other),
        }
        assert_eq!(erin.last_contacted_at, Some(ts("2026-06-10T09:00:00Z")));
    }

    #[tokio::test]
    async fn test_imported_messages_are_not_refetched() {
        let db = test_db();
        let clock = FixedClock(now());
        let messages = vec![msg("m1", "t1", "alice@initech.com", &[ME], &["STARRED"], "2026-06-10T09:00:00Z")];
        let source = FakeMail::new(ME, vec![listing(&["m1"])], messages);
        let importer = GmailImporter::new(&db, &source, &clock);

        importer.run(false).await.unwrap();
        let second = importer.run(false).await.unwrap();

        assert_eq!(second.skipped_for(SkipReason::Duplicate), 1);
        assert_eq!(*source.message_fetches.lock().unwrap(), 1);
        assert_eq!(db.count_interactions(None).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_history_listing_advances_cursor() {
        let db = test_db();
        let clock = FixedClock(now());
        db.set_cursor("gmail", "4100", now()).unwrap();
        let source = FakeMail::new(
            ME,
            vec![Scripted::Page(MessageIdPage {
                message_ids: vec![],
                next_page_token: None,
                history_id: Some("4242".to_string()),
            })],
            vec![],
        );

        let report = GmailImporter::new(&db, &source, &clock)
            .run(false)
            .await
            .unwrap();
        assert_eq!(report.mode, FetchMode::Incremental);
        assert_eq!(report.cursor.as_deref(), Some("4242"));
        assert_eq!(
            source.queries(),
            vec![MailQuery::History {
                start_history_id: "4100".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_expired_history_id_falls_back_to_window() {
        let db = test_db();
        let clock = FixedClock(now());
        db.set_cursor("gmail", "12", now()).unwrap();
        let messages = vec![msg("m1", "t1", "alice@initech.com", &[ME], &["STARRED"], "2026-06-14T09:00:00Z")];
        let source = FakeMail::new(ME, vec![Scripted::CursorInvalid, listing(&["m1"])], messages);

        let report = GmailImporter::new(&db, &source, &clock)
            .run(false)
            .await
            .unwrap();
        assert!(report.cursor_reset);
        assert_eq!(report.imported, 1);
        assert_eq!(report.cursor.as_deref(), Some("9000"));
        let queries = source.queries();
        assert_eq!(queries.len(), 2);
        assert!(matches!(queries[1], MailQuery::Window { .. }));
        assert!(!db.get_sync_state("gmail").unwrap().unwrap().has_cursor());
    }

    fn history(ids: &[&str], history_id: &str) -> Scripted<MessageIdPage> {
        Scripted::Page(MessageIdPage {
            message_ids: ids.iter().map(|s| s.to_string()).collect(),
            next_page_token: None,
            history_id: Some(history_id.to_string()),
        })
    }

    #[tokio::test]
    async fn test_reply_in_later_run_imports_the_answered_message() {
        let db = test_db();
        let clock = FixedClock(now());
        db.set_cursor("gmail", "100", now()).unwrap();
        let source = FakeMail::new(
            ME,
            vec![history(&["m1"], "101"), history(&["m2"], "102")],
            vec![msg("m1", "t1", "alice@initech.com", &[ME], &["INBOX"], "2026-06-14T09:00:00Z")],
        );
        let importer = GmailImporter::new(&db, &source, &clock);

        let first = importer.run(false).await.unwrap();
        assert_eq!(first.skipped_for(SkipReason::LowSignal), 1);
        assert_eq!(first.interactions, 0);
        db.set_cursor("gmail", "101", now()).unwrap();

        // Only the owner's reply shows up in the next history listing.
        source.deliver(msg("m2", "t1", ME, &["alice@initech.com"], &["SENT"], "2026-06-15T08:00:00Z"));
        let second = importer.run(false).await.unwrap();
        assert_eq!(second.fetched, 1);
        assert_eq!(second.skipped_for(SkipReason::LowSignal), 1);
        assert_eq!(second.imported, 1);
        assert_eq!(second.interactions, 1);
        assert_eq!(second.cursor.as_deref(), Some("102"));

        let alice = db.find_contact_by_email("alice@initech.com").unwrap().unwrap();
        assert_eq!(db.get_log_entry("gmail", "m1").unwrap().unwrap().entity_id, alice.id);
        assert!(db.get_log_entry("gmail", "m2").unwrap().is_none());
        assert_eq!(alice.last_contacted_at, Some(ts("2026-06-14T09:00:00Z")));

        // Relisting the thread later changes nothing.
        let third = importer.run(false).await.unwrap();
        assert_eq!(third.imported, 0);
        assert_eq!(db.count_interactions(Some(InteractionType::Email)).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_answer_to_outbound_mail_imports_it_in_later_run() {
        let db = test_db();
        let clock = FixedClock(now());
        db.set_cursor("gmail", "100", now()).unwrap();
        let source = FakeMail::new(
            ME,
            vec![history(&["ask"], "101"), history(&["answer"], "102")],
            vec![msg("ask", "t1", ME, &["erin@initech.com"], &["SENT"], "2026-06-14T09:00:00Z")],
        );
        let importer = GmailImporter::new(&db, &source, &clock);

        importer.run(false).await.unwrap();
        source.deliver(msg("answer", "t1", "erin@initech.com", &[ME], &["INBOX"], "2026-06-14T11:00:00Z"));
        let second = importer.run(false).await.unwrap();

        assert_eq!(second.imported, 1);
        assert!(db.get_log_entry("gmail", "ask").unwrap().is_some());
        assert!(db.get_log_entry("gmail", "answer").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_message_starred_after_listing_is_imported() {
        let db = test_db();
        let clock = FixedClock(now());
        db.set_cursor("gmail", "100", now()).unwrap();
        let plain = msg("m1", "t1", "alice@initech.com", &[ME], &["INBOX"], "2026-06-14T09:00:00Z");
        let source = FakeMail::new(
            ME,
            vec![history(&["m1"], "101"), history(&["m1"], "103")],
            vec![plain.clone()],
        );
        let importer = GmailImporter::new(&db, &source, &clock);

        let first = importer.run(false).await.unwrap();
        assert_eq!(first.skipped_for(SkipReason::LowSignal), 1);

        let mut starred = plain;
        starred.label_ids.push("STARRED".to_string());
        source.deliver(starred);
        let second = importer.run(false).await.unwrap();
        assert_eq!(second.imported, 1);
        assert_eq!(db.count_interactions(Some(InteractionType::Email)).unwrap(), 1);
    }
}
