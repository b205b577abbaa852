//! OAuth2 browser consent flow for `relsync sync init`.
//!
//! Opens the user's browser for consent, captures the redirect on a
//! localhost TcpListener, exchanges the auth code for tokens, fetches the
//! account email and writes the token file.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::path::Path;

use super::{token_store, GoogleApiError, GoogleToken, AUTH_URI, SCOPES, TOKEN_URI};
use crate::config::GoogleCredentials;

/// Run the full consent flow and return the authenticated email address.
pub async fn run_consent_flow(
    credentials: &GoogleCredentials,
    token_path: &Path,
) -> Result<String, GoogleApiError> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();
    let redirect_uri = format!("http://localhost:{}", port);
    let state = uuid::Uuid::new_v4().simple().to_string();

    let auth_url = build_auth_url(&credentials.client_id, &redirect_uri, &state)?;

    log::info!("auth: opening browser for Google OAuth consent");
    if let Err(e) = open::that(auth_url.as_str()) {
        log::warn!("auth: failed to open browser: {}. Visit: {}", e, auth_url);
    }
    println!("If the browser did not open, visit:\n\n  {}\n", auth_url);

    let auth_code = wait_for_auth_code(&listener, &state)?;

    let client = reqwest::Client::new();
    let resp = client
        .post(TOKEN_URI)
        .form(&[
            ("code", auth_code.as_str()),
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
            ("redirect_uri", redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ])
        .send()
        .await?;

    if !resp.status().is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(GoogleApiError::RefreshFailed(format!(
            "Token exchange failed: {}",
            body
        )));
    }

    let body: serde_json::Value = resp.json().await?;

    let access_token = body["access_token"]
        .as_str()
        .ok_or_else(|| GoogleApiError::RefreshFailed("No access_token in response".into()))?
        .to_string();
    let refresh_token = body["refresh_token"].as_str().map(|s| s.to_string());
    let expires_in = body["expires_in"].as_u64().unwrap_or(3600);
    let expiry = chrono::Utc::now() + chrono::Duration::seconds(expires_in as i64);

    let email = fetch_user_email(&client, &access_token).await;

    let token = GoogleToken {
        token: access_token,
        refresh_token,
        token_uri: TOKEN_URI.to_string(),
        client_id: credentials.client_id.clone(),
        scopes: SCOPES.iter().map(|s| s.to_string()).collect(),
        expiry: Some(expiry.to_rfc3339()),
        account: Some(email.clone()),
    };
    token_store::save_token(token_path, &token)?;
    log::info!("auth: token written to {}", token_path.display());

    Ok(email)
}

fn build_auth_url(
    client_id: &str,
    redirect_uri: &str,
    state: &str,
) -> Result<url::Url, GoogleApiError> {
    let scope = SCOPES.join(" ");
    let auth_url = url::Url::parse_with_params(
        AUTH_URI,
        &[
            ("client_id", client_id),
            ("redirect_uri", redirect_uri),
            ("response_type", "code"),
            ("scope", scope.as_str()),
            ("access_type", "offline"),
            ("prompt", "consent"),
            ("state", state),
        ],
    )?;
    Ok(auth_url)
}

/// Wait for the OAuth redirect and extract the auth code.
fn wait_for_auth_code(listener: &TcpListener, expected_state: &str) -> Result<String, GoogleApiError> {
    let (mut stream, _) = listener.accept()?;

    let mut buffer = [0u8; 4096];
    let n = stream.read(&mut buffer)?;
    let request = String::from_utf8_lossy(&buffer[..n]);

    match parse_redirect(&request, expected_state) {
        Ok(code) => {
            send_response(
                &mut stream,
                "Authorization successful! You can close this tab and return to the terminal.",
            );
            Ok(code)
        }
        Err(err) => {
            send_response(&mut stream, "Authorization failed. You can close this tab.");
            Err(err)
        }
    }
}

/// Parse `GET /?code=...&state=... HTTP/1.1` into the auth code.
fn parse_redirect(request: &str, expected_state: &str) -> Result<String, GoogleApiError> {
    let path = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .ok_or(GoogleApiError::FlowCancelled)?;
    let redirect = url::Url::parse(&format!("http://localhost{}", path))
        .map_err(|_| GoogleApiError::FlowCancelled)?;

    let mut code = None;
    let mut state = None;
    for (key, value) in redirect.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => return Err(GoogleApiError::FlowCancelled),
            _ => {}
        }
    }
    if state.as_deref() != Some(expected_state) {
        return Err(GoogleApiError::OAuthStateMismatch);
    }
    code.filter(|c| !c.is_empty())
        .ok_or(GoogleApiError::FlowCancelled)
}

fn send_response(stream: &mut impl Write, message: &str) {
    let body = format!(
        "<html><body style=\"font-family: system-ui; text-align: center; padding: 40px;\">\
         <h2>{}</h2></body></html>",
        message
    );
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.flush();
}

/// The account email from the Gmail profile, or "authenticated" if unavailable.
async fn fetch_user_email(client: &reqwest::Client, access_token: &str) -> String {
    match client
        .get("https://gmail.googleapis.com/gmail/v1/users/me/profile")
        .bearer_auth(access_token)
        .send()
        .await
    {
        Ok(resp) if resp.status().is_success() => {
            if let Ok(body) = resp.json::<serde_json::Value>().await {
                if let Some(email) = body["emailAddress"].as_str() {
                    return email.to_string();
                }
            }
        }
        _ => {}
    }
    "authenticated".to_string()
}
