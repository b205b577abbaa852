//! OAuth token file persistence.
//!
//! The token file is created with mode 0600 inside a 0700 directory and is
//! replaced atomically so a crash mid-refresh never leaves a torn token.

use std::path::Path;

use super::{GoogleApiError, GoogleToken};

pub fn load_token(path: &Path) -> Result<GoogleToken, GoogleApiError> {
    if !path.exists() {
        return Err(GoogleApiError::TokenNotFound(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path)?;
    let token: GoogleToken = serde_json::from_str(&content)?;
    Ok(token)
}

pub fn save_token(path: &Path, token: &GoogleToken) -> Result<(), GoogleApiError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700))?;
            }
        }
    }

    let content = serde_json::to_string_pretty(token)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, content)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

pub fn delete_token(path: &Path) -> Result<(), GoogleApiError> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    Ok(())
}

/// Authenticated account email without propagating errors.
pub fn peek_account_email(path: &Path) -> Option<String> {
    load_token(path).ok().map(|token| {
        token
            .account
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| "connected".to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_token() -> GoogleToken {
        GoogleToken {
            token: "ya29.test".to_string(),
            refresh_token: Some("1//refresh".to_string()),
            token_uri: super::super::TOKEN_URI.to_string(),
            client_id: "client".to_string(),
            scopes: vec!["https://www.googleapis.com/auth/calendar.readonly".to_string()],
            expiry: None,
            account: Some("me@acme.com".to_string()),
        }
    }

    #[test]
    fn test_missing_token_is_reported_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        match load_token(&path) {
            Err(GoogleApiError::TokenNotFound(p)) => assert_eq!(p, path),
            other => panic!("expected TokenNotFound, got {:?}", other.map(|t| t.token)),
        }
        assert_eq!(peek_account_email(&path), None);
    }

    #[test]
    fn test_save_load_delete() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("google").join("token.json");
        save_token(&path, &sample_token()).unwrap();
        let loaded = load_token(&path).unwrap();
        assert_eq!(loaded.token, "ya29.test");
        assert_eq!(peek_account_email(&path).as_deref(), Some("me@acme.com"));
        assert!(!path.with_extension("json.tmp").exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        delete_token(&path).unwrap();
        assert!(!path.exists());
        delete_token(&path).unwrap();
    }
}
