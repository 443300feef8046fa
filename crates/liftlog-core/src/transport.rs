//! Authorized transport.
//!
//! Single shared HTTP entry point for all backend calls. Every request
//! lazily reads the current identity session and attaches it as a bearer
//! credential; an authorization rejection (HTTP 401) is broadcast as a
//! [`SessionInvalidated`] event so the session manager can force a global
//! sign-out and the application root can return to its entry point. The
//! transport itself never touches session state, never navigates, and
//! never retries.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tracing::warn;

use crate::identity::IdentityProvider;

/// Fallback shown when the server supplies no message of its own.
pub const GENERIC_ERROR_MESSAGE: &str = "An error occurred";
/// Message for transport-level failures (no response received).
pub const NETWORK_ERROR_MESSAGE: &str = "Network error";

/// Categories of backend call failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// HTTP 401: the token was rejected; a forced sign-out follows.
    Unauthorized,
    /// Any other non-success HTTP status.
    Status,
    /// No response received (connectivity loss, timeout). Never conflated
    /// with a server-rejected request.
    Network,
    /// The response body could not be decoded.
    Parse,
}

/// Structured error from a backend call.
#[derive(Debug, Clone)]
pub struct ApiError {
    pub kind: ApiErrorKind,
    /// HTTP status, when a response was received.
    pub status: Option<u16>,
    /// One-line, user-presentable message (server-supplied when available).
    pub message: String,
    /// Optional raw error body.
    pub details: Option<String>,
}

impl ApiError {
    fn unauthorized(message: String, body: String) -> Self {
        Self {
            kind: ApiErrorKind::Unauthorized,
            status: Some(401),
            message,
            details: (!body.is_empty()).then_some(body),
        }
    }

    fn status(status: u16, message: String, body: String) -> Self {
        Self {
            kind: ApiErrorKind::Status,
            status: Some(status),
            message,
            details: (!body.is_empty()).then_some(body),
        }
    }

    fn network(error: &reqwest::Error) -> Self {
        Self {
            kind: ApiErrorKind::Network,
            status: None,
            message: NETWORK_ERROR_MESSAGE.to_string(),
            details: Some(error.to_string()),
        }
    }

    fn parse(error: &reqwest::Error) -> Self {
        Self {
            kind: ApiErrorKind::Parse,
            status: None,
            message: "Unexpected response from the server".to_string(),
            details: Some(error.to_string()),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ApiError {}

/// Result type for backend calls.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Event broadcast when the backend rejects the current credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionInvalidated;

/// Shared authorized HTTP client for the liftlog backend.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    provider: Arc<IdentityProvider>,
    invalidated: broadcast::Sender<SessionInvalidated>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, provider: Arc<IdentityProvider>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let (invalidated, _) = broadcast::channel(8);
        Self {
            http: reqwest::Client::new(),
            base_url,
            provider,
            invalidated,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Subscribes to forced-invalidation events (one per rejected request).
    pub fn on_invalidated(&self) -> broadcast::Receiver<SessionInvalidated> {
        self.invalidated.subscribe()
    }

    /// GET a JSON resource.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
        let response = self.dispatch(self.http.get(self.endpoint(path))).await?;
        decode(response).await
    }

    /// POST a JSON body, decoding a JSON response.
    pub async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> ApiResult<T> {
        let response = self
            .dispatch(self.http.post(self.endpoint(path)).json(body))
            .await?;
        decode(response).await
    }

    /// POST without a body, decoding a JSON response.
    pub async fn post_empty<T: DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
        let response = self.dispatch(self.http.post(self.endpoint(path))).await?;
        decode(response).await
    }

    /// DELETE a resource, ignoring any response body.
    pub async fn delete(&self, path: &str) -> ApiResult<()> {
        self.dispatch(self.http.delete(self.endpoint(path))).await?;
        Ok(())
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Attaches the bearer credential (when a session is present), sends,
    /// and maps non-success responses to [`ApiError`]s.
    async fn dispatch(&self, request: reqwest::RequestBuilder) -> ApiResult<reqwest::Response> {
        let request = match self.provider.current_session() {
            Some(session) => request.bearer_auth(session.access_token),
            None => request,
        };

        let response = request.send().await.map_err(|e| ApiError::network(&e))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = extract_detail(&body).unwrap_or_else(|| GENERIC_ERROR_MESSAGE.to_string());

        if status == reqwest::StatusCode::UNAUTHORIZED {
            warn!("authorization rejected by the backend; session invalidated");
            // No receivers just means nobody has initialized yet.
            let _ = self.invalidated.send(SessionInvalidated);
            return Err(ApiError::unauthorized(message, body));
        }

        Err(ApiError::status(status.as_u16(), message, body))
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> ApiResult<T> {
    response.json().await.map_err(|e| ApiError::parse(&e))
}

/// Extracts the server's `detail` message from an error body.
fn extract_detail(body: &str) -> Option<String> {
    let json: serde_json::Value = serde_json::from_str(body).ok()?;
    json.get("detail")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}
