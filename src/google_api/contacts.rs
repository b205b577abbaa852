//! Google People API v1: the account's connections with sync tokens.

use async_trait::async_trait;
use serde::Deserialize;

use super::{error_from_response, GoogleApiError, GoogleClient};
use crate::sync::source::{ContactsPage, ContactsSource, FetchResult, PersonRecord};

const CONNECTIONS_URL: &str = "https://people.googleapis.com/v1/people/me/connections";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionsResponse {
    #[serde(default)]
    connections: Vec<Person>,
    #[serde(default)]
    next_page_token: Option<String>,
    #[serde(default)]
    next_sync_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Person {
    #[serde(default)]
    resource_name: String,
    #[serde(default)]
    metadata: Option<PersonMetadata>,
    #[serde(default)]
    names: Vec<Name>,
    #[serde(default)]
    email_addresses: Vec<EmailAddress>,
    #[serde(default)]
    organizations: Vec<Organization>,
}

#[derive(Debug, Deserialize)]
struct PersonMetadata {
    #[serde(default)]
    deleted: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Name {
    #[serde(default)]
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmailAddress {
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct Organization {
    #[serde(default)]
    name: Option<String>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl From<Person> for PersonRecord {
    fn from(person: Person) -> Self {
        PersonRecord {
            resource_name: person.resource_name,
            deleted: person.metadata.map(|m| m.deleted).unwrap_or(false),
            name: non_blank(person.names.into_iter().find_map(|n| n.display_name)),
            emails: person
                .email_addresses
                .into_iter()
                .map(|e| e.value.trim().to_lowercase())
                .filter(|e| e.contains('@'))
                .collect(),
            organization: non_blank(person.organizations.into_iter().find_map(|o| o.name)),
        }
    }
}

/// An expired People sync token comes back as 410 or as a 400
/// `FAILED_PRECONDITION` whose details carry `EXPIRED_SYNC_TOKEN`.
fn is_expired_sync_token(status: u16, body: &str) -> bool {
    status == 410 || (status == 400 && body.contains("EXPIRED_SYNC_TOKEN"))
}

pub struct PeopleClient {
    client: GoogleClient,
}

impl PeopleClient {
    pub fn new(client: GoogleClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ContactsSource for PeopleClient {
    async fn list_connections(
        &self,
        sync_token: Option<&str>,
        page_token: Option<&str>,
    ) -> FetchResult<ContactsPage> {
        let mut params = vec![
            ("personFields", "names,emailAddresses,organizations,metadata".to_string()),
            ("pageSize", "1000".to_string()),
            ("requestSyncToken", "true".to_string()),
        ];
        if let Some(token) = sync_token {
            params.push(("syncToken", token.to_string()));
        }
        if let Some(token) = page_token {
            params.push(("pageToken", token.to_string()));
        }

        let resp = match self.client.get(CONNECTIONS_URL, &params).await {
            Ok(resp) => resp,
            Err(err) => return FetchResult::Failure(err),
        };
        let status = resp.status();
        if status == reqwest::StatusCode::GONE {
            return FetchResult::CursorInvalid;
        }
        if status == reqwest::StatusCode::BAD_REQUEST {
            let body = resp.text().await.unwrap_or_default();
            if is_expired_sync_token(status.as_u16(), &body) {
                return FetchResult::CursorInvalid;
            }
            return FetchResult::Failure(GoogleApiError::ApiError {
                status: status.as_u16(),
                message: super::extract_error_message(&body),
            });
        }
        if !status.is_success() {
            return FetchResult::Failure(error_from_response(resp).await);
        }

        let body: Result<ConnectionsResponse, GoogleApiError> =
            resp.json().await.map_err(GoogleApiError::from);
        body.map(|body| ContactsPage {
            people: body.connections.into_iter().map(PersonRecord::from).collect(),
            next_page_token: body.next_page_token,
            next_sync_token: body.next_sync_token,
        })
        .into()
    }
}
