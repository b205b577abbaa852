//! Contacts importer: the Google directory seeds contacts and companies.
//!
//! Directory entries are identity, not interaction, so nothing here touches
//! `interaction_log` or cadence.

use super::source::{ContactsSource, PersonRecord};
use super::{FetchMode, Interrupted, RecordOutcome, SkipReason, SyncReport, SyncService};
use crate::config::Clock;
use crate::db::{DbError, EntityKind, ImportedRecord, LogOutcome, SyncDb, SyncLogMetadata};
use crate::error::SyncError;
use crate::resolver::EntityResolver;

const SERVICE: SyncService = SyncService::Contacts;

pub struct ContactsImporter<'a> {
    db: &'a SyncDb,
    source: &'a dyn ContactsSource,
    clock: &'a dyn Clock,
}

impl<'a> ContactsImporter<'a> {
    pub fn new(db: &'a SyncDb, source: &'a dyn ContactsSource, clock: &'a dyn Clock) -> Self {
        Self { db, source, clock }
    }

    pub async fn run(&self, initial: bool) -> Result<SyncReport, SyncError> {
        let stored = self
            .db
            .get_sync_state(SERVICE.as_str())?
            .filter(|s| s.has_cursor())
            .map(|s| s.last_sync_token)
            .filter(|_| !initial);

        let mode = if stored.is_some() {
            FetchMode::Incremental
        } else {
            FetchMode::Full
        };
        let mut report = SyncReport::new(SERVICE, mode);

        match self.fetch_all(stored.as_deref(), &mut report).await {
            Ok(()) => return Ok(report),
            Err(Interrupted::Failed(err)) => return Err(err),
            Err(Interrupted::CursorInvalid) if stored.is_none() => {
                return Err(SyncError::Provider(
                    "people api rejected a full listing as an expired sync token".to_string(),
                ))
            }
            Err(Interrupted::CursorInvalid) => {}
        }

        log::warn!("contacts sync: sync token expired, relisting all connections");
        self.db.clear_cursor(SERVICE.as_str())?;
        report.mode = FetchMode::Full;
        report.cursor_reset = true;
        report.cursor = None;
        match self.fetch_all(None, &mut report).await {
            Ok(()) => Ok(report),
            Err(Interrupted::Failed(err)) => Err(err),
            Err(Interrupted::CursorInvalid) => Err(SyncError::Provider(
                "people api rejected a full listing as an expired sync token".to_string(),
            )),
        }
    }

    async fn fetch_all(
        &self,
        sync_token: Option<&str>,
        report: &mut SyncReport,
    ) -> Result<(), Interrupted> {
        let mut page_token: Option<String> = None;
        loop {
            let page = self
                .source
                .list_connections(sync_token, page_token.as_deref())
                .await
                .into_page()?;

            for person in &page.people {
                report.fetched += 1;
                let outcome = if person.deleted {
                    Ok(RecordOutcome::Skipped(SkipReason::Deleted))
                } else if person.name.is_none() && person.emails.is_empty() {
                    Ok(RecordOutcome::Skipped(SkipReason::NoIdentity))
                } else {
                    self.import_person(person)
                };
                report.record(&person.resource_name, outcome);
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

    fn import_person(&self, person: &PersonRecord) -> Result<RecordOutcome, DbError> {
        let now = self.clock.now();
        self.db.with_transaction(|tx| {
            if tx.log_exists(SERVICE.as_str(), &person.resource_name)? {
                return Ok(RecordOutcome::Skipped(SkipReason::Duplicate));
            }

            let contact = EntityResolver::new(tx, now).resolve_contact_in_company(
                person.name.as_deref().unwrap_or_default(),
                person.emails.first().map(String::as_str),
                person.organization.as_deref(),
            )?;

            let metadata = SyncLogMetadata::new(ImportedRecord::Contact {
                resource_name: person.resource_name.clone(),
                company: person.organization.clone(),
            });
            let logged = tx.log_import(
                SERVICE.as_str(),
                &person.resource_name,
                EntityKind::Contact,
                &contact.id,
                Some(&metadata),
                now,
            )?;
            Ok(match logged {
                LogOutcome::Logged => RecordOutcome::Imported { interactions: 0 },
                LogOutcome::AlreadyLogged => RecordOutcome::Skipped(SkipReason::Duplicate),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use super::super::fakes::{FakeContacts, Scripted};
    use super::super::source::ContactsPage;
    use super::*;
    use crate::config::FixedClock;
    use crate::db::test_utils::test_db;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-06-15T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn person(resource: &str, name: Option<&str>, email: Option<&str>, org: Option<&str>) -> PersonRecord {
        PersonRecord {
            resource_name: resource.to_string(),
            name: name.map(|n| n.to_string()),
            emails: email.map(|e| vec![e.to_string()]).unwrap_or_default(),
            organization: org.map(|o| o.to_string()),
            deleted: false,
        }
    }

    fn page(people: Vec<PersonRecord>, token: &str) -> Scripted<ContactsPage> {
        Scripted::Page(ContactsPage {
            people,
            next_page_token: None,
            next_sync_token: Some(token.to_string()),
        })
    }

    #[tokio::test]
    async fn test_full_listing_creates_contacts_and_companies() {
        let db = test_db();
        let clock = FixedClock(now());
        let mut gone = person("people/c4", Some("Old Friend"), None, None);
        gone.deleted = true;
        let source = FakeContacts::new(vec![page(
            vec![
                person("people/c1", Some("Sarah Chen"), Some("sarah@acme.com"), Some("Acme")),
                person("people/c2", None, Some("jo.march@gmail.com"), None),
                person("people/c3", None, None, Some("Nowhere Inc")),
                gone,
            ],
            "people-sync-1",
        )]);

        let report = ContactsImporter::new(&db, &source, &clock)
            .run(false)
            .await
            .unwrap();
        assert_eq!(report.mode, FetchMode::Full);
        assert_eq!(report.imported, 2);
        assert_eq!(report.interactions, 0);
        assert_eq!(report.skipped_for(SkipReason::NoIdentity), 1);
        assert_eq!(report.skipped_for(SkipReason::Deleted), 1);
        assert_eq!(report.cursor.as_deref(), Some("people-sync-1"));

        let sarah = db.find_contact_by_email("sarah@acme.com").unwrap().unwrap();
        let acme = db.find_company_by_name("Acme").unwrap().unwrap();
        assert_eq!(sarah.company_id.as_deref(), Some(acme.id.as_str()));

        let jo = db.find_contact_by_email("jo.march@gmail.com").unwrap().unwrap();
        assert_eq!(jo.name, "Jo March");
        assert!(jo.company_id.is_none());

        assert_eq!(db.count_interactions(None).unwrap(), 0);
        assert!(db.get_cadence(&sarah.id).unwrap().is_none());
        assert!(db.find_company_by_name("Nowhere Inc").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_incremental_listing_uses_stored_token() {
        let db = test_db();
        let clock = FixedClock(now());
        db.set_cursor("contacts", "people-sync-1", now()).unwrap();
        let source = FakeContacts::new(vec![page(
            vec![person("people/c9", Some("New Hire"), Some("new@acme.com"), None)],
            "people-sync-2",
        )]);

        let report = ContactsImporter::new(&db, &source, &clock)
            .run(false)
            .await
            .unwrap();
        assert_eq!(report.mode, FetchMode::Incremental);
        assert_eq!(report.imported, 1);
        assert_eq!(
            *source.tokens.lock().unwrap(),
            vec![Some("people-sync-1".to_string())]
        );
    }

    #[tokio::test]
    async fn test_expired_token_relists_everything() {
        let db = test_db();
        let clock = FixedClock(now());
        db.set_cursor("contacts", "stale", now()).unwrap();
        let source = FakeContacts::new(vec![
            Scripted::CursorInvalid,
            page(
                vec![person("people/c1", Some("Sarah Chen"), Some("sarah@acme.com"), None)],
                "people-sync-3",
            ),
        ]);

        let report = ContactsImporter::new(&db, &source, &clock)
            .run(false)
            .await
            .unwrap();
        assert!(report.cursor_reset);
        assert_eq!(report.mode, FetchMode::Full);
        assert_eq!(report.cursor.as_deref(), Some("people-sync-3"));
        assert_eq!(
            *source.tokens.lock().unwrap(),
            vec![Some("stale".to_string()), None]
        );
    }

    #[tokio::test]
    async fn test_relisting_does_not_duplicate() {
        let db = test_db();
        let clock = FixedClock(now());
        let source = FakeContacts::new(vec![page(
            vec![person("people/c1", Some("Sarah Chen"), Some("sarah@acme.com"), Some("Acme"))],
            "people-sync-1",
        )]);
        let importer = ContactsImporter::new(&db, &source, &clock);

        importer.run(true).await.unwrap();
        let second = importer.run(true).await.unwrap();
        assert_eq!(second.skipped_for(SkipReason::Duplicate), 1);
        assert_eq!(db.count_contacts().unwrap(), 1);
        assert_eq!(db.count_log_entries("contacts").unwrap(), 1);
    }
}
