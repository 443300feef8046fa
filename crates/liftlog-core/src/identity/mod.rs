//! Identity provider adapter.
//!
//! Uniform capability surface over the external identity service, with a
//! deterministic offline substitute selected at startup when the service is
//! unconfigured. The offline substitute exists so the app stays usable for
//! local development without a live provider; it is not real authentication.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::{self, Config};

mod cache;
mod offline;
mod remote;

pub use cache::CachedSession;
pub use offline::OfflineProvider;
pub use remote::RemoteProvider;

/// Opaque credential bundle issued by the identity provider.
///
/// Either absent entirely (unauthenticated) or present with a non-empty
/// access token; partial sessions are not valid states.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Bearer credential attached to every authorized backend request.
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Seconds until the access token expires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

impl Session {
    /// Creates a minimal session from a bare access token
    /// (the `install_session` path).
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_in: None,
            token_type: Some("bearer".to_string()),
        }
    }
}

/// The authenticated principal, derived from an active session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Categories of identity provider errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Credentials rejected by the provider (bad email/password, etc.)
    Credentials,
    /// Other HTTP status error from the provider
    Http,
    /// No response received (connectivity loss, timeout)
    Network,
    /// Failed to parse the provider's response
    Parse,
}

/// Structured error from the identity provider.
///
/// Opaque to callers apart from the human-readable message; retry policy,
/// if any, belongs to the caller.
#[derive(Debug, Clone)]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    /// One-line summary suitable for display
    pub message: String,
    /// Optional additional details (e.g., raw error body)
    pub details: Option<String>,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    /// Creates an error from a non-success provider response, extracting
    /// the provider's message from the body when present.
    pub fn from_status(status: u16, body: &str) -> Self {
        let kind = match status {
            400 | 401 | 403 | 422 => ProviderErrorKind::Credentials,
            _ => ProviderErrorKind::Http,
        };
        let message = extract_provider_message(body)
            .unwrap_or_else(|| format!("Identity provider error (HTTP {status})"));
        Self {
            kind,
            message,
            details: (!body.is_empty()).then(|| body.to_string()),
        }
    }

    pub fn network(error: &reqwest::Error) -> Self {
        Self {
            kind: ProviderErrorKind::Network,
            message: "Could not reach the identity provider".to_string(),
            details: Some(error.to_string()),
        }
    }

    pub fn parse(error: &reqwest::Error) -> Self {
        Self {
            kind: ProviderErrorKind::Parse,
            message: "Unexpected response from the identity provider".to_string(),
            details: Some(error.to_string()),
        }
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ProviderError {}

/// Result type for provider operations.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Extracts a human-readable message from a provider error body.
/// GoTrue-style services use `error_description`, `msg` or `message`.
fn extract_provider_message(body: &str) -> Option<String> {
    let json: serde_json::Value = serde_json::from_str(body).ok()?;
    for key in ["error_description", "msg", "message"] {
        if let Some(text) = json.get(key).and_then(|v| v.as_str()) {
            if !text.trim().is_empty() {
                return Some(text.trim().to_string());
            }
        }
    }
    None
}

/// Returns a masked version of a token for diagnostics (first 12 chars + ...).
pub fn mask_token(token: &str) -> String {
    if token.len() <= 16 {
        return "***".to_string();
    }
    format!("{}...", &token[..12])
}

type SessionListener = Box<dyn Fn(Option<&Session>, Option<&User>) + Send + Sync>;
type ListenerSlots = Mutex<Vec<(u64, SessionListener)>>;

/// Session-change listener registry shared by both provider variants.
#[derive(Default)]
pub(crate) struct Listeners {
    slots: Arc<ListenerSlots>,
    next_id: AtomicU64,
}

impl Listeners {
    /// Registers a listener, returning a disposable handle.
    fn register(
        &self,
        listener: impl Fn(Option<&Session>, Option<&User>) + Send + Sync + 'static,
    ) -> ListenerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.slots
            .lock()
            .expect("listener registry poisoned")
            .push((id, Box::new(listener)));
        ListenerHandle {
            id,
            slots: Arc::downgrade(&self.slots),
        }
    }

    /// Invokes all listeners with the provider's new session/identity.
    fn notify(&self, session: Option<&Session>, user: Option<&User>) {
        let slots = self.slots.lock().expect("listener registry poisoned");
        for (_, listener) in slots.iter() {
            listener(session, user);
        }
    }
}

/// Disposable subscription to provider session changes.
/// Dropping the handle deregisters the listener.
pub struct ListenerHandle {
    id: u64,
    slots: Weak<ListenerSlots>,
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let Some(slots) = self.slots.upgrade() {
            slots
                .lock()
                .expect("listener registry poisoned")
                .retain(|(id, _)| *id != self.id);
        }
    }
}

/// Identity provider: the remote service, or the offline substitute.
///
/// The variant is picked once at startup from configuration presence;
/// callers never branch on it again.
pub enum IdentityProvider {
    Remote(RemoteProvider),
    Offline(OfflineProvider),
}

impl IdentityProvider {
    /// Selects and constructs the provider from configuration.
    ///
    /// Missing identity endpoint configuration is a deliberate degradation
    /// (offline substitute), not a fault; it is logged so diagnostics can
    /// tell it apart from a genuine outage.
    ///
    /// # Errors
    /// Returns an error if configured values are malformed.
    pub fn from_config(config: &Config) -> Result<Self> {
        match config::resolve_identity_endpoint(config)? {
            Some(endpoint) => Ok(Self::Remote(RemoteProvider::new(
                endpoint,
                config::paths::session_cache_path(),
            ))),
            None => {
                warn!(
                    "identity provider unconfigured; using the offline substitute \
                     (deterministic fake identities, not real authentication)"
                );
                Ok(Self::Offline(OfflineProvider::new()))
            }
        }
    }

    /// Returns true when the offline substitute is in use.
    pub fn is_offline(&self) -> bool {
        matches!(self, Self::Offline(_))
    }

    /// Synchronous read of the last known session.
    pub fn current_session(&self) -> Option<Session> {
        match self {
            Self::Remote(p) => p.current_session(),
            Self::Offline(p) => p.current_session(),
        }
    }

    /// Synchronous read of the last known identity.
    pub fn current_user(&self) -> Option<User> {
        match self {
            Self::Remote(p) => p.current_user(),
            Self::Offline(p) => p.current_user(),
        }
    }

    /// Registers a listener invoked whenever the provider's internal session
    /// changes (token refresh, refresh failure). The offline substitute never
    /// fires it.
    pub fn on_session_change(
        &self,
        listener: impl Fn(Option<&Session>, Option<&User>) + Send + Sync + 'static,
    ) -> ListenerHandle {
        match self {
            Self::Remote(p) => p.listeners().register(listener),
            Self::Offline(p) => p.listeners().register(listener),
        }
    }

    /// Exchanges credentials for a session.
    pub async fn sign_in(&self, email: &str, password: &str) -> ProviderResult<(Session, User)> {
        match self {
            Self::Remote(p) => p.sign_in(email, password).await,
            Self::Offline(p) => Ok(p.sign_in(email)),
        }
    }

    /// Registers a new account. Does not establish a session (provider flows
    /// require confirmation first).
    pub async fn sign_up(&self, email: &str, password: &str) -> ProviderResult<User> {
        match self {
            Self::Remote(p) => p.sign_up(email, password).await,
            Self::Offline(p) => Ok(p.sign_up(email)),
        }
    }

    /// Clears the provider-held session and identity. Idempotent; local
    /// state is cleared even when the network revocation fails.
    pub async fn sign_out(&self) {
        match self {
            Self::Remote(p) => p.sign_out().await,
            Self::Offline(p) => p.sign_out(),
        }
    }

    /// Manually installs a session from an externally-issued token
    /// (the guest-login path).
    pub async fn install_session(&self, access_token: &str) -> ProviderResult<()> {
        match self {
            Self::Remote(p) => p.install_session(access_token).await,
            Self::Offline(p) => {
                p.install_session(access_token);
                Ok(())
            }
        }
    }
}
