use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH};
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::api::{CreatePayload, CreateResponse, Draft, DraftListing, PendingEntry, UploadResponse};
use super::proxy::ProxyEndpoint;
use super::session::SessionProvider;

const UPLOAD_USE_CASE: &str = "inpaint_safe";

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("no access token available from session; re-run the login flow")]
    NoAccessToken,
    #[error("anti-automation challenge page returned instead of a service response")]
    ChallengePage,
    #[error("service returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed service response: {0}")]
    Malformed(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One request seen by the transport, reported to the optional observer.
/// Diagnostics only; stage transitions never depend on these events.
#[derive(Debug, Clone)]
pub struct RequestEvent {
    pub method: &'static str,
    pub url: String,
    pub status: Option<u16>,
}

pub type RequestObserver = Arc<dyn Fn(&RequestEvent) + Send + Sync>;

/// The remote generation service, abstracted so tests can inject a scripted
/// transport. One implementation per run, constructed with the session and
/// proxy the whole pipeline shares.
#[async_trait]
pub trait Service: Send + Sync {
    async fn create_task(&self, payload: &CreatePayload) -> Result<CreateResponse, ServiceError>;
    async fn pending(&self) -> Result<Vec<PendingEntry>, ServiceError>;
    async fn drafts(&self, limit: usize) -> Result<Vec<Draft>, ServiceError>;
    async fn upload_media(&self, path: &Path) -> Result<String, ServiceError>;
    /// Best-effort content length probe for a download URL; `None` when the
    /// remote does not report one.
    async fn content_length(&self, url: &str) -> Result<Option<u64>, ServiceError>;
    async fn fetch(&self, url: &str) -> Result<Bytes, ServiceError>;
}

pub struct HttpService {
    client: Client,
    base_url: String,
    session: Arc<dyn SessionProvider>,
    observer: Option<RequestObserver>,
}

impl HttpService {
    /// Build a client routed through the run's proxy endpoint, for IP/geo
    /// consistency between browsing and downloads.
    pub fn new(
        base_url: &str,
        proxy: &ProxyEndpoint,
        session: Arc<dyn SessionProvider>,
        observer: Option<RequestObserver>,
    ) -> Result<Self, ServiceError> {
        let proxied = reqwest::Proxy::all(&proxy.server)?
            .basic_auth(&proxy.username, &proxy.password);
        let client = Client::builder()
            .user_agent(format!("vidgen/{}", env!("CARGO_PKG_VERSION")))
            .proxy(proxied)
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            session,
            observer,
        })
    }

    fn observe(&self, method: &'static str, url: &str, status: Option<u16>) {
        if let Some(observer) = &self.observer {
            observer(&RequestEvent {
                method,
                url: url.to_string(),
                status,
            });
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn bearer(&self) -> Result<String, ServiceError> {
        let token = self.session.access_token().await?;
        Ok(format!("Bearer {token}"))
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ServiceError> {
        let status = resp.status();
        let body = resp.text().await?;
        // Challenge interstitials usually arrive with a non-success status;
        // classify them before the status check so they stay fatal.
        if looks_like_challenge(&body) {
            return Err(ServiceError::ChallengePage);
        }
        if !status.is_success() {
            return Err(ServiceError::Status {
                status: status.as_u16(),
                body: truncate(&body, 300),
            });
        }
        serde_json::from_str(&body)
            .map_err(|err| ServiceError::Malformed(format!("{err} in: {}", truncate(&body, 200))))
    }
}

#[async_trait]
impl Service for HttpService {
    async fn create_task(&self, payload: &CreatePayload) -> Result<CreateResponse, ServiceError> {
        let url = self.endpoint("/backend/nf/create");
        self.observe("POST", &url, None);
        let resp = self
            .client
            .post(&url)
            .header(AUTHORIZATION, self.bearer().await?)
            .json(payload)
            .send()
            .await?;
        self.observe("POST", &url, Some(resp.status().as_u16()));
        Self::decode(resp).await
    }

    async fn pending(&self) -> Result<Vec<PendingEntry>, ServiceError> {
        let url = self.endpoint("/backend/nf/pending/v2");
        self.observe("GET", &url, None);
        let resp = self
            .client
            .get(&url)
            .header(AUTHORIZATION, self.bearer().await?)
            .send()
            .await?;
        self.observe("GET", &url, Some(resp.status().as_u16()));
        Self::decode(resp).await
    }

    async fn drafts(&self, limit: usize) -> Result<Vec<Draft>, ServiceError> {
        let url = self.endpoint(&format!("/backend/project_y/profile/drafts?limit={limit}"));
        self.observe("GET", &url, None);
        let resp = self
            .client
            .get(&url)
            .header(AUTHORIZATION, self.bearer().await?)
            .send()
            .await?;
        self.observe("GET", &url, Some(resp.status().as_u16()));
        let listing: DraftListing = Self::decode(resp).await?;
        Ok(listing.items)
    }

    async fn upload_media(&self, path: &Path) -> Result<String, ServiceError> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "reference".to_string());
        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(guess_mime(path))?;
        let form = Form::new()
            .part("file", part)
            .text("use_case", UPLOAD_USE_CASE);

        let url = self.endpoint("/backend/project_y/file/upload");
        self.observe("POST", &url, None);
        let resp = self
            .client
            .post(&url)
            .header(AUTHORIZATION, self.bearer().await?)
            .multipart(form)
            .send()
            .await?;
        self.observe("POST", &url, Some(resp.status().as_u16()));
        let upload: UploadResponse = Self::decode(resp).await?;
        Ok(upload.file_id)
    }

    async fn content_length(&self, url: &str) -> Result<Option<u64>, ServiceError> {
        self.observe("HEAD", url, None);
        let resp = match self.client.head(url).send().await {
            Ok(resp) => resp,
            Err(_) => return Ok(None),
        };
        self.observe("HEAD", url, Some(resp.status().as_u16()));
        if !resp.status().is_success() {
            return Ok(None);
        }
        let length = resp
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        Ok(length)
    }

    async fn fetch(&self, url: &str) -> Result<Bytes, ServiceError> {
        self.observe("GET", url, None);
        let resp = self.client.get(url).send().await?;
        self.observe("GET", url, Some(resp.status().as_u16()));
        if !resp.status().is_success() {
            return Err(ServiceError::Status {
                status: resp.status().as_u16(),
                body: format!("downloading {url}"),
            });
        }

        let mut buf = Vec::new();
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(Bytes::from(buf))
    }
}

fn guess_mime(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "image/png",
    }
}

fn looks_like_challenge(body: &str) -> bool {
    let head = body.trim_start();
    if !(head.starts_with("<!DOCTYPE") || head.starts_with("<!doctype") || head.starts_with("<html"))
    {
        return false;
    }
    let lowered = body.to_lowercase();
    lowered.contains("just a moment") || lowered.contains("challenge")
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_pages_are_recognized() {
        assert!(looks_like_challenge(
            "<!DOCTYPE html><title>Just a moment...</title>"
        ));
        assert!(!looks_like_challenge(r#"{"id": "task_1"}"#));
        assert!(!looks_like_challenge("<html><body>hello</body></html>"));
    }

    #[test]
    fn mime_guess_covers_common_extensions() {
        assert_eq!(guess_mime(Path::new("ref.JPG")), "image/jpeg");
        assert_eq!(guess_mime(Path::new("ref.webp")), "image/webp");
        assert_eq!(guess_mime(Path::new("ref")), "image/png");
    }
}
