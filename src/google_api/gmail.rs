//! Gmail API v1: history, message listing and metadata.
//!
//! Only `format=metadata` is ever requested. Message bodies are never
//! fetched, so nothing downstream can store them.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

use super::{error_from_response, read_json, GoogleApiError, GoogleClient};
use crate::sync::source::{FetchResult, MailMessage, MailQuery, MailSource, Mailbox, MessageIdPage};

const GMAIL_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

/// Headers requested with every metadata fetch.
const METADATA_HEADERS: &[&str] = &["From", "To", "Cc", "Subject", "Date", "Content-Type"];

// ============================================================================
// API response types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageListResponse {
    #[serde(default)]
    messages: Vec<MessageStub>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageStub {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryListResponse {
    #[serde(default)]
    history: Vec<HistoryRecord>,
    #[serde(default)]
    next_page_token: Option<String>,
    #[serde(default)]
    history_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryRecord {
    #[serde(default)]
    messages_added: Vec<HistoryMessageAdded>,
    #[serde(default)]
    labels_added: Vec<HistoryLabelAdded>,
}

#[derive(Debug, Deserialize)]
struct HistoryMessageAdded {
    message: MessageStub,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryLabelAdded {
    message: MessageStub,
    #[serde(default)]
    label_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageDetail {
    #[serde(default)]
    id: String,
    #[serde(default)]
    thread_id: String,
    #[serde(default)]
    label_ids: Vec<String>,
    #[serde(default)]
    internal_date: Option<String>,
    #[serde(default)]
    payload: Option<MessagePayload>,
}

#[derive(Debug, Deserialize)]
struct MessagePayload {
    #[serde(default)]
    headers: Vec<Header>,
}

#[derive(Debug, Deserialize)]
struct Header {
    #[serde(default)]
    name: String,
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct ThreadDetail {
    #[serde(default)]
    messages: Vec<MessageDetail>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileResponse {
    #[serde(default)]
    email_address: String,
    #[serde(default)]
    history_id: String,
}

impl MessageDetail {
    fn header(&self, name: &str) -> Option<&str> {
        self.payload
            .as_ref()?
            .headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    fn date(&self) -> Option<DateTime<Utc>> {
        let from_internal = self
            .internal_date
            .as_deref()
            .and_then(|ms| ms.parse::<i64>().ok())
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single());
        from_internal.or_else(|| {
            self.header("Date")
                .and_then(|d| DateTime::parse_from_rfc2822(d.trim()).ok())
                .map(|d| d.with_timezone(&Utc))
        })
    }

    fn into_message(self) -> Result<MailMessage, GoogleApiError> {
        let date = self.date().ok_or_else(|| GoogleApiError::ApiError {
            status: 0,
            message: format!("message {} has no usable date", self.id),
        })?;
        Ok(MailMessage {
            from: self.header("From").and_then(|v| parse_address_list(v).into_iter().next()),
            to: self.header("To").map(parse_address_list).unwrap_or_default(),
            cc: self.header("Cc").map(parse_address_list).unwrap_or_default(),
            subject: self.header("Subject").unwrap_or_default().trim().to_string(),
            content_type: self.header("Content-Type").map(|v| v.trim().to_lowercase()),
            date,
            id: self.id,
            thread_id: self.thread_id,
            label_ids: self.label_ids,
        })
    }
}

// ============================================================================
// Address parsing
// ============================================================================

/// Parse an address header such as `"Chen, Sarah" <sarah@acme.com>, bob@x.io`.
///
/// Entries without an `@` are dropped. Addresses are lowercased.
pub fn parse_address_list(value: &str) -> Vec<Mailbox> {
    let mut entries = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut in_angle = false;
    for c in value.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            '<' if !in_quotes => in_angle = true,
            '>' if !in_quotes => in_angle = false,
            ',' if !in_quotes && !in_angle => {
                entries.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    entries.push(current);

    entries
        .iter()
        .filter_map(|entry| parse_mailbox(entry))
        .collect()
}

fn parse_mailbox(entry: &str) -> Option<Mailbox> {
    let entry = entry.trim();
    let (name, email) = match (entry.rfind('<'), entry.rfind('>')) {
        (Some(open), Some(close)) if open < close => {
            let name = entry[..open].trim().trim_matches('"').trim();
            (
                (!name.is_empty()).then(|| name.to_string()),
                entry[open + 1..close].trim(),
            )
        }
        _ => (None, entry.trim_matches('"')),
    };
    let email = email.trim().to_lowercase();
    if !email.contains('@') {
        return None;
    }
    Some(Mailbox { name, email })
}

// ============================================================================
// Gmail API
// ============================================================================

pub struct GmailClient {
    client: GoogleClient,
}

impl GmailClient {
    pub fn new(client: GoogleClient) -> Self {
        Self { client }
    }

    async fn profile(&self) -> Result<ProfileResponse, GoogleApiError> {
        let resp = self.client.get(&format!("{}/profile", GMAIL_BASE), &[]).await?;
        read_json(resp).await
    }

    async fn list_history(
        &self,
        start_history_id: &str,
        page_token: Option<&str>,
    ) -> FetchResult<MessageIdPage> {
        let mut params = vec![
            ("startHistoryId", start_history_id.to_string()),
            ("historyTypes", "messageAdded".to_string()),
            ("historyTypes", "labelAdded".to_string()),
            ("maxResults", "500".to_string()),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken", token.to_string()));
        }
        let resp = match self
            .client
            .get(&format!("{}/history", GMAIL_BASE), &params)
            .await
        {
            Ok(resp) => resp,
            Err(err) => return FetchResult::Failure(err),
        };
        // 404: startHistoryId is older than the mailbox keeps history for.
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return FetchResult::CursorInvalid;
        }
        let body: HistoryListResponse = match read_json(resp).await {
            Ok(body) => body,
            Err(err) => return FetchResult::Failure(err),
        };

        FetchResult::Page(MessageIdPage {
            message_ids: history_message_ids(body.history),
            next_page_token: body.next_page_token,
            history_id: body.history_id,
        })
    }

    async fn list_window(
        &self,
        after: DateTime<Utc>,
        page_token: Option<&str>,
    ) -> Result<MessageIdPage, GoogleApiError> {
        let mut params = vec![
            ("q", format!("after:{}", after.timestamp())),
            ("maxResults", "500".to_string()),
            ("includeSpamTrash", "false".to_string()),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken", token.to_string()));
        }
        let resp = self
            .client
            .get(&format!("{}/messages", GMAIL_BASE), &params)
            .await?;
        let body: MessageListResponse = read_json(resp).await?;
        Ok(MessageIdPage {
            message_ids: body.messages.into_iter().map(|m| m.id).collect(),
            next_page_token: body.next_page_token,
            history_id: None,
        })
    }
}

/// Messages worth (re)considering: new arrivals, and messages starred since
/// they were first seen. Listed once each, in history order.
fn history_message_ids(history: Vec<HistoryRecord>) -> Vec<String> {
    let mut seen = HashSet::new();
    history
        .into_iter()
        .flat_map(|record| {
            let added = record.messages_added.into_iter().map(|a| a.message.id);
            let starred = record
                .labels_added
                .into_iter()
                .filter(|l| l.label_ids.iter().any(|id| id == "STARRED"))
                .map(|l| l.message.id);
            added.chain(starred).collect::<Vec<_>>()
        })
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

fn metadata_params() -> Vec<(&'static str, String)> {
    let mut params = vec![("format", "metadata".to_string())];
    for header in METADATA_HEADERS {
        params.push(("metadataHeaders", header.to_string()));
    }
    params
}

#[async_trait]
impl MailSource for GmailClient {
    async fn list_message_ids(
        &self,
        query: &MailQuery,
        page_token: Option<&str>,
    ) -> FetchResult<MessageIdPage> {
        match query {
            MailQuery::History { start_history_id } => {
                self.list_history(start_history_id, page_token).await
            }
            MailQuery::Window { after } => self.list_window(*after, page_token).await.into(),
        }
    }

    async fn get_message(&self, id: &str) -> Result<Option<MailMessage>, GoogleApiError> {
        let resp = self
            .client
            .get(&format!("{}/messages/{}", GMAIL_BASE, id), &metadata_params())
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(error_from_response(resp).await);
        }
        let detail: MessageDetail = resp.json().await?;
        detail.into_message().map(Some)
    }

    async fn get_thread(&self, thread_id: &str) -> Result<Vec<MailMessage>, GoogleApiError> {
        let resp = self
            .client
            .get(
                &format!("{}/threads/{}", GMAIL_BASE, thread_id),
                &metadata_params(),
            )
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let thread: ThreadDetail = read_json(resp).await?;
        let mut messages = thread
            .messages
            .into_iter()
            .filter_map(|m| m.into_message().ok())
            .collect::<Vec<_>>();
        messages.sort_by_key(|m| m.date);
        Ok(messages)
    }

    async fn current_history_id(&self) -> Result<String, GoogleApiError> {
        Ok(self.profile().await?.history_id)
    }

    async fn account_email(&self) -> Result<String, GoogleApiError> {
        Ok(self.profile().await?.email_address.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address_list() {
        let parsed = parse_address_list(
            r#""Chen, Sarah" <Sarah@Acme.com>, bob@globex.com, Undisclosed recipients:;"#,
        );
        assert_eq!(
            parsed,
            vec![
                Mailbox {
                    name: Some("Chen, Sarah".to_string()),
                    email: "sarah@acme.com".to_string(),
                },
                Mailbox {
                    name: None,
                    email: "bob@globex.com".to_string(),
                },
            ]
        );
        assert!(parse_address_list("").is_empty());
    }

    #[test]
    fn test_message_detail_conversion() {
        let json = r#"{
            "id": "m1",
            "threadId": "t1",
            "labelIds": ["INBOX", "STARRED"],
            "internalDate": "1767225600000",
            "payload": {"headers": [
                {"name": "From", "value": "Sarah Chen <sarah@acme.com>"},
                {"name": "To", "value": "me@example.org"},
                {"name": "Cc", "value": "a@x.io, b@x.io"},
                {"name": "Subject", "value": " Q3 plan "},
                {"name": "Content-Type", "value": "multipart/alternative; boundary=x"}
            ]}
        }"#;
        let detail: MessageDetail = serde_json::from_str(json).unwrap();
        let message = detail.into_message().unwrap();
        assert_eq!(message.from.as_ref().unwrap().email, "sarah@acme.com");
        assert_eq!(message.recipient_count(), 3);
        assert_eq!(message.subject, "Q3 plan");
        assert!(message.is_starred());
        assert!(!message.is_sent());
        assert_eq!(message.date.to_rfc3339(), "2026-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_history_lists_arrivals_and_new_stars() {
        let json = r#"{
            "historyId": "4300",
            "history": [
                {"id": "4201", "messagesAdded": [{"message": {"id": "m1", "threadId": "t1"}}]},
                {"id": "4202", "labelsAdded": [
                    {"message": {"id": "m0", "threadId": "t0"}, "labelIds": ["STARRED"]},
                    {"message": {"id": "m7", "threadId": "t7"}, "labelIds": ["IMPORTANT"]}
                ]},
                {"id": "4203", "labelsAdded": [{"message": {"id": "m1"}, "labelIds": ["STARRED"]}]}
            ]
        }"#;
        let body: HistoryListResponse = serde_json::from_str(json).unwrap();
        assert_eq!(body.history_id.as_deref(), Some("4300"));
        assert_eq!(history_message_ids(body.history), vec!["m1", "m0"]);
    }

    #[test]
    fn test_date_header_fallback() {
        let json = r#"{
            "id": "m2",
            "payload": {"headers": [{"name": "Date", "value": "Thu, 01 Jan 2026 10:00:00 +0000"}]}
        }"#;
        let detail: MessageDetail = serde_json::from_str(json).unwrap();
        assert_eq!(
            detail.into_message().unwrap().date.to_rfc3339(),
            "2026-01-01T10:00:00+00:00"
        );

        let undated: MessageDetail = serde_json::from_str(r#"{"id": "m3"}"#).unwrap();
        assert!(undated.into_message().is_err());
    }

    #[test]
    fn test_history_response_collects_added_ids() {
        let json = r#"{
            "history": [
                {"id": "10", "messagesAdded": [{"message": {"id": "a", "threadId": "t"}}]},
                {"id": "11"},
                {"id": "12", "messagesAdded": [{"message": {"id": "b"}}, {"message": {"id": "a"}}]}
            ],
            "historyId": "12"
        }"#;
        let body: HistoryListResponse = serde_json::from_str(json).unwrap();
        assert_eq!(body.history_id.as_deref(), Some("12"));
        let ids: Vec<String> = body
            .history
            .into_iter()
            .flat_map(|r| r.messages_added)
            .map(|a| a.message.id)
            .collect();
        assert_eq!(ids, vec!["a", "b", "a"]);
    }

    #[test]
    fn test_metadata_params_never_request_body() {
        let params = metadata_params();
        assert!(params.contains(&("format", "metadata".to_string())));
        assert!(!params.iter().any(|(_, v)| v == "full" || v == "raw"));
    }
}
