use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;

use super::service::ServiceError;

/// Boundary to the externally-acquired authenticated session. The login flow
/// that produces the session is out of scope; all this crate needs from it is
/// a bearer token usable against the service.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn access_token(&self) -> Result<String, ServiceError>;
}

/// Session persisted by the external login flow as a small JSON file.
pub struct StoredSession {
    path: PathBuf,
}

impl StoredSession {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[derive(Debug, Deserialize)]
struct SessionFile {
    #[serde(default, alias = "accessToken")]
    access_token: Option<String>,
}

#[async_trait]
impl SessionProvider for StoredSession {
    async fn access_token(&self) -> Result<String, ServiceError> {
        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|_| ServiceError::NoAccessToken)?;
        let session: SessionFile =
            serde_json::from_str(&contents).map_err(|_| ServiceError::NoAccessToken)?;
        match session.access_token {
            Some(token) if !token.trim().is_empty() => Ok(token),
            _ => Err(ServiceError::NoAccessToken),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_token_under_either_spelling() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("session.json");

        std::fs::write(&path, r#"{"access_token": "tok-a"}"#).expect("write session");
        let session = StoredSession::new(path.clone());
        assert_eq!(session.access_token().await.expect("token"), "tok-a");

        std::fs::write(&path, r#"{"accessToken": "tok-b"}"#).expect("write session");
        assert_eq!(session.access_token().await.expect("token"), "tok-b");
    }

    #[tokio::test]
    async fn missing_or_empty_token_is_a_no_token_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("session.json");

        let session = StoredSession::new(path.clone());
        assert!(matches!(
            session.access_token().await,
            Err(ServiceError::NoAccessToken)
        ));

        std::fs::write(&path, r#"{"access_token": ""}"#).expect("write session");
        assert!(matches!(
            session.access_token().await,
            Err(ServiceError::NoAccessToken)
        ));
    }
}
