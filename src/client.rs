//! HTTP client for the external backend.
//!
//! The backend does the spreadsheet parsing, the KPI computation and the
//! authentication; this module only moves requests and responses across the
//! wire and turns failures into [`Error`] values.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode, multipart};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::RwLock;
use std::time::Duration;

use crate::auth::{LoginResponse, OAuthProvider, RegisterRequest, User};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::kpi::KpiSnapshot;
use crate::upload::SelectedFile;

/// Computes KPIs from an uploaded spreadsheet
#[async_trait]
pub trait KpiBackend: Send + Sync {
    /// Sends the file as multipart field `file` and validates the response
    async fn upload(&self, file: &SelectedFile) -> Result<KpiSnapshot>;
}

/// Session management on the backend
#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn login(&self, email: &str, password: &str) -> Result<LoginResponse>;

    async fn register(&self, request: &RegisterRequest) -> Result<User>;

    async fn logout(&self) -> Result<()>;

    async fn current_user(&self) -> Result<User>;

    /// Where to send the user for the provider's consent screen
    async fn authorization_url(&self, provider: OAuthProvider) -> Result<String>;

    /// Bearer token used when the session cookie is not available
    fn set_token(&self, token: Option<String>);
}

/// [`KpiBackend`] and [`AuthBackend`] over HTTP.
///
/// Keeps a cookie store for the session cookie and, as a fallback, the last
/// `access_token` handed out by the login endpoint.
pub struct HttpBackend {
    base_url: String,
    client: reqwest::Client,
    token: RwLock<Option<String>>,
}

impl HttpBackend {
    pub fn new(config: &Config) -> Result<Self> {
        Self::with_base_url(&config.api_url, config.request_timeout)
    }

    /// # Errors
    /// * `Error::Http` if the TLS backend cannot be initialised
    pub fn with_base_url(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            token: RwLock::new(None),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn token(&self) -> Option<String> {
        self.token.read().ok().and_then(|t| t.clone())
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        match self.token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.bytes().await.map_err(transport_error)?;
        Err(Error::Backend {
            status: status.as_u16(),
            message: error_message(status, &body),
        })
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let response = self.send(builder).await?;
        let body = response.bytes().await.map_err(transport_error)?;
        serde_json::from_slice(&body).map_err(|e| Error::InvalidPayload(e.to_string()))
    }
}

/// Connection failures and timeouts mean the backend is not there at all
fn transport_error(e: reqwest::Error) -> Error {
    if e.is_connect() || e.is_timeout() {
        log::warn!("backend unreachable: {}", e);
        Error::BackendUnavailable
    } else {
        Error::Http(e)
    }
}

/// Extracts `error` (or FastAPI's `detail`) from an error body
fn error_message(status: StatusCode, body: &[u8]) -> String {
    let from_body = serde_json::from_slice::<Value>(body).ok().and_then(|v| {
        ["error", "detail", "message"]
            .iter()
            .find_map(|key| v.get(*key).and_then(Value::as_str).map(str::to_string))
    });

    from_body.unwrap_or_else(|| match status.canonical_reason() {
        Some(reason) => format!("Request failed: {} {}", status.as_u16(), reason),
        None => format!("Request failed: {}", status.as_u16()),
    })
}

#[async_trait]
impl KpiBackend for HttpBackend {
    async fn upload(&self, file: &SelectedFile) -> Result<KpiSnapshot> {
        let part = multipart::Part::bytes(file.bytes.clone())
            .file_name(file.name.clone())
            .mime_str(file.kind.mime_type())?;
        let form = multipart::Form::new().part("file", part);

        log::info!("uploading {} ({} bytes)", file.name, file.bytes.len());
        let response = self
            .send(self.request(Method::POST, "/upload/").multipart(form))
            .await?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(transport_error)?;
        let value: Value = serde_json::from_slice(&body)
            .map_err(|e| Error::InvalidPayload(format!("not JSON: {}", e)))?;

        // some backends report failures as `{"error": ...}` with a 200
        if let Some(message) = value.as_object().and_then(KpiSnapshot::error_message) {
            log::warn!("backend reported an error with status {}: {}", status, message);
            return Err(Error::Backend {
                status,
                message: message.to_string(),
            });
        }
        KpiSnapshot::from_value(value)
    }
}

#[async_trait]
impl AuthBackend for HttpBackend {
    async fn login(&self, email: &str, password: &str) -> Result<LoginResponse> {
        let body = serde_json::json!({ "email": email, "password": password });
        self.send_json(self.request(Method::POST, "/api/auth/login").json(&body))
            .await
    }

    async fn register(&self, request: &RegisterRequest) -> Result<User> {
        self.send_json(self.request(Method::POST, "/api/auth/register").json(request))
            .await
    }

    async fn logout(&self) -> Result<()> {
        self.send(self.request(Method::POST, "/api/auth/logout"))
            .await?;
        Ok(())
    }

    async fn current_user(&self) -> Result<User> {
        self.send_json(self.request(Method::GET, "/api/auth/me"))
            .await
    }

    async fn authorization_url(&self, provider: OAuthProvider) -> Result<String> {
        let path = format!("/api/auth/{}", provider.as_str());
        let body: Value = self.send_json(self.request(Method::GET, &path)).await?;
        body.get("authorization_url")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::InvalidPayload("missing authorization_url".to_string()))
    }

    fn set_token(&self, token: Option<String>) {
        if let Ok(mut slot) = self.token.write() {
            *slot = token;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_prefers_body() {
        let status = StatusCode::BAD_REQUEST;
        assert_eq!(
            error_message(status, br#"{"error": "No file uploaded"}"#),
            "No file uploaded"
        );
        assert_eq!(
            error_message(status, br#"{"detail": "Invalid credentials"}"#),
            "Invalid credentials"
        );
        assert_eq!(
            error_message(StatusCode::INTERNAL_SERVER_ERROR, b"<html>oops</html>"),
            "Request failed: 500 Internal Server Error"
        );
    }

    #[test]
    fn base_url_is_normalized() {
        let backend =
            HttpBackend::with_base_url("http://localhost:8000/", Duration::from_secs(1)).unwrap();
        assert_eq!(backend.base_url(), "http://localhost:8000");
        assert_eq!(backend.token(), None);
        backend.set_token(Some("abc".into()));
        assert_eq!(backend.token().as_deref(), Some("abc"));
    }
}
