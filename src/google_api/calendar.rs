//! Google Calendar API v3: primary calendar events with sync tokens.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;

use super::{error_from_response, GoogleApiError, GoogleClient};
use crate::sync::source::{
    CalendarEvent, CalendarPage, CalendarQuery, CalendarSource, EventAttendee, FetchResult,
};

const EVENTS_URL: &str = "https://www.googleapis.com/calendar/v3/calendars/primary/events";

// ============================================================================
// API response types (deserialized from Google Calendar JSON)
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CalendarListResponse {
    #[serde(default)]
    items: Vec<GoogleEventRaw>,
    next_page_token: Option<String>,
    next_sync_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleEventRaw {
    #[serde(default)]
    id: String,
    #[serde(default)]
    summary: Option<String>,
    start: Option<EventDateTime>,
    #[serde(default)]
    attendees: Vec<Attendee>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventDateTime {
    date_time: Option<String>,
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Attendee {
    #[serde(default)]
    email: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    response_status: Option<String>,
    #[serde(default)]
    resource: Option<bool>,
    #[serde(rename = "self", default)]
    is_self: Option<bool>,
}

impl From<GoogleEventRaw> for CalendarEvent {
    fn from(raw: GoogleEventRaw) -> Self {
        let all_day = raw
            .start
            .as_ref()
            .map(|s| s.date_time.is_none() && s.date.is_some())
            .unwrap_or(false);
        let start = raw
            .start
            .as_ref()
            .and_then(|s| s.date_time.as_deref())
            .and_then(parse_event_datetime);
        CalendarEvent {
            id: raw.id,
            summary: raw.summary.unwrap_or_else(|| "(No title)".to_string()),
            status: raw.status,
            start,
            all_day,
            attendees: raw
                .attendees
                .into_iter()
                .map(|a| EventAttendee {
                    email: a.email.trim().to_lowercase(),
                    display_name: a.display_name.filter(|n| !n.trim().is_empty()),
                    is_self: a.is_self.unwrap_or(false),
                    resource: a.resource.unwrap_or(false),
                    response_status: a.response_status,
                })
                .collect(),
        }
    }
}

// ============================================================================
// Calendar API
// ============================================================================

pub struct CalendarClient {
    client: GoogleClient,
}

impl CalendarClient {
    pub fn new(client: GoogleClient) -> Self {
        Self { client }
    }
}

/// Query parameters for one events.list page.
///
/// Sync tokens cannot be combined with time bounds, and `orderBy` is
/// rejected alongside them, so neither mode sets it.
fn list_params(query: &CalendarQuery, page_token: Option<&str>) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("singleEvents", "true".to_string()),
        ("maxResults", "250".to_string()),
        ("showDeleted", "false".to_string()),
    ];
    match query {
        CalendarQuery::Incremental { sync_token } => {
            params.push(("syncToken", sync_token.clone()));
        }
        CalendarQuery::Window { time_min, time_max } => {
            params.push(("timeMin", time_min.to_rfc3339_opts(SecondsFormat::Secs, true)));
            params.push(("timeMax", time_max.to_rfc3339_opts(SecondsFormat::Secs, true)));
        }
    }
    if let Some(token) = page_token {
        params.push(("pageToken", token.to_string()));
    }
    params
}

#[async_trait]
impl CalendarSource for CalendarClient {
    async fn list_events(
        &self,
        query: &CalendarQuery,
        page_token: Option<&str>,
    ) -> FetchResult<CalendarPage> {
        let params = list_params(query, page_token);
        let resp = match self.client.get(EVENTS_URL, &params).await {
            Ok(resp) => resp,
            Err(err) => return FetchResult::Failure(err),
        };

        // 410 GONE: the sync token expired or was invalidated server-side.
        if resp.status() == reqwest::StatusCode::GONE {
            return FetchResult::CursorInvalid;
        }
        if !resp.status().is_success() {
            return FetchResult::Failure(error_from_response(resp).await);
        }

        let body: Result<CalendarListResponse, GoogleApiError> =
            resp.json().await.map_err(GoogleApiError::from);
        body.map(|body| CalendarPage {
            events: body.items.into_iter().map(CalendarEvent::from).collect(),
            next_page_token: body.next_page_token,
            next_sync_token: body.next_sync_token,
        })
        .into()
    }
}

/// Parse an RFC 3339 event timestamp into UTC.
pub fn parse_event_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
