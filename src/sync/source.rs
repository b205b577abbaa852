//! Provider-neutral records and the source traits importers fetch through.
//!
//! Every page fetch returns a [`FetchResult`]; importers branch on the tag
//! instead of catching a "cursor expired" error.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::google_api::GoogleApiError;

/// Outcome of one page fetch.
#[derive(Debug)]
pub enum FetchResult<T> {
    Page(T),
    /// The stored cursor is no longer accepted by the provider.
    CursorInvalid,
    /// The request failed after the retry budget was spent.
    Failure(GoogleApiError),
}

impl<T> From<Result<T, GoogleApiError>> for FetchResult<T> {
    fn from(result: Result<T, GoogleApiError>) -> Self {
        match result {
            Ok(page) => FetchResult::Page(page),
            Err(err) => FetchResult::Failure(err),
        }
    }
}

// ============================================================================
// Calendar
// ============================================================================

/// Which slice of the calendar to list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CalendarQuery {
    /// Changes since a stored sync token.
    Incremental { sync_token: String },
    /// Events starting inside `[time_min, time_max)`.
    Window {
        time_min: DateTime<Utc>,
        time_max: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventAttendee {
    pub email: String,
    pub display_name: Option<String>,
    pub is_self: bool,
    pub resource: bool,
    pub response_status: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalendarEvent {
    pub id: String,
    pub summary: String,
    pub status: Option<String>,
    /// Timed start. `None` for all-day events.
    pub start: Option<DateTime<Utc>>,
    pub all_day: bool,
    pub attendees: Vec<EventAttendee>,
}

#[derive(Debug, Clone, Default)]
pub struct CalendarPage {
    pub events: Vec<CalendarEvent>,
    pub next_page_token: Option<String>,
    /// Present only on the last page.
    pub next_sync_token: Option<String>,
}

#[async_trait]
pub trait CalendarSource: Send + Sync {
    async fn list_events(
        &self,
        query: &CalendarQuery,
        page_token: Option<&str>,
    ) -> FetchResult<CalendarPage>;
}

// ============================================================================
// Mail
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MailQuery {
    /// Messages added since a stored history id.
    History { start_history_id: String },
    /// Messages received after `after`.
    Window { after: DateTime<Utc> },
}

#[derive(Debug, Clone, Default)]
pub struct MessageIdPage {
    pub message_ids: Vec<String>,
    pub next_page_token: Option<String>,
    /// Mailbox history id reported by a history listing.
    pub history_id: Option<String>,
}

/// A parsed `Name <addr>` entry from an address header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailbox {
    pub name: Option<String>,
    pub email: String,
}

/// Message metadata. Never carries body content.
#[derive(Debug, Clone, PartialEq)]
pub struct MailMessage {
    pub id: String,
    pub thread_id: String,
    pub from: Option<Mailbox>,
    pub to: Vec<Mailbox>,
    pub cc: Vec<Mailbox>,
    pub subject: String,
    pub content_type: Option<String>,
    pub label_ids: Vec<String>,
    pub date: DateTime<Utc>,
}

impl MailMessage {
    pub fn has_label(&self, label: &str) -> bool {
        self.label_ids.iter().any(|l| l == label)
    }

    pub fn is_sent(&self) -> bool {
        self.has_label("SENT")
    }

    pub fn is_starred(&self) -> bool {
        self.has_label("STARRED")
    }

    pub fn recipient_count(&self) -> usize {
        self.to.len() + self.cc.len()
    }
}

#[async_trait]
pub trait MailSource: Send + Sync {
    async fn list_message_ids(
        &self,
        query: &MailQuery,
        page_token: Option<&str>,
    ) -> FetchResult<MessageIdPage>;

    /// Metadata for one message, `None` if it has been deleted since listing.
    async fn get_message(&self, id: &str) -> Result<Option<MailMessage>, GoogleApiError>;

    /// Metadata for every message in a thread, oldest first.
    async fn get_thread(&self, thread_id: &str) -> Result<Vec<MailMessage>, GoogleApiError>;

    /// The mailbox's current history id.
    async fn current_history_id(&self) -> Result<String, GoogleApiError>;

    /// The authenticated account's address.
    async fn account_email(&self) -> Result<String, GoogleApiError>;
}

// ============================================================================
// Contacts
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersonRecord {
    pub resource_name: String,
    pub name: Option<String>,
    pub emails: Vec<String>,
    pub organization: Option<String>,
    /// Set on incremental listings for contacts removed upstream.
    pub deleted: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ContactsPage {
    pub people: Vec<PersonRecord>,
    pub next_page_token: Option<String>,
    pub next_sync_token: Option<String>,
}

#[async_trait]
pub trait ContactsSource: Send + Sync {
    /// List connections, full when `sync_token` is `None`.
    async fn list_connections(
        &self,
        sync_token: Option<&str>,
        page_token: Option<&str>,
    ) -> FetchResult<ContactsPage>;
}
