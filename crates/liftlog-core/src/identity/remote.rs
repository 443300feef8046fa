//! Remote identity provider.
//!
//! Talks to a GoTrue-style auth service over HTTP: password sign-in,
//! sign-up (confirmation required, no session), logout, identity lookup
//! and refresh-token exchange. The anon key rides along as the `apikey`
//! header on every call.
//!
//! The last known session is persisted via [`SessionCache`] and a single
//! background task refreshes the access token shortly before expiry,
//! firing the session-change listeners with the outcome. The adapter
//! itself never retries a failed call.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::cache::{CachedSession, SessionCache};
use super::{Listeners, ProviderError, ProviderResult, Session, User, mask_token};
use crate::config::IdentityEndpoint;

/// Shared internals reachable from the background refresh task.
struct RemoteInner {
    http: reqwest::Client,
    url: String,
    anon_key: String,
    state: Mutex<Option<CachedSession>>,
    listeners: Listeners,
    cache: SessionCache,
}

/// HTTP-backed identity provider.
pub struct RemoteProvider {
    inner: Arc<RemoteInner>,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Serialize)]
struct CredentialsBody<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct RefreshBody<'a> {
    refresh_token: &'a str,
}

#[derive(serde::Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    user: Option<User>,
}

impl RemoteProvider {
    /// Creates the provider, restoring any cached session from disk.
    ///
    /// When called inside an async runtime with a restored refreshable
    /// session, the background refresh task starts immediately.
    pub fn new(endpoint: IdentityEndpoint, cache_path: PathBuf) -> Self {
        let cache = SessionCache::new(cache_path);

        let restored = match cache.load() {
            Ok(cached) => cached,
            Err(e) => {
                warn!("failed to load session cache: {e:#}");
                None
            }
        };
        if let Some(cached) = &restored {
            debug!(
                token = %mask_token(&cached.session.access_token),
                "restored identity session from cache"
            );
        }

        let provider = Self {
            inner: Arc::new(RemoteInner {
                http: reqwest::Client::new(),
                url: endpoint.url.trim_end_matches('/').to_string(),
                anon_key: endpoint.anon_key,
                state: Mutex::new(restored),
                listeners: Listeners::default(),
                cache,
            }),
            refresh_task: Mutex::new(None),
        };
        provider.schedule_refresh();
        provider
    }

    pub(crate) fn listeners(&self) -> &Listeners {
        &self.inner.listeners
    }

    pub fn current_session(&self) -> Option<Session> {
        self.inner
            .state
            .lock()
            .expect("remote provider state poisoned")
            .as_ref()
            .map(|c| c.session.clone())
    }

    pub fn current_user(&self) -> Option<User> {
        self.inner
            .state
            .lock()
            .expect("remote provider state poisoned")
            .as_ref()
            .and_then(|c| c.user.clone())
    }

    /// Exchanges credentials for a session (`grant_type=password`).
    pub async fn sign_in(&self, email: &str, password: &str) -> ProviderResult<(Session, User)> {
        let token = request_token(
            &self.inner,
            "password",
            &CredentialsBody { email, password },
        )
        .await?;

        let user = token.user.clone().ok_or_else(|| {
            ProviderError::new(
                super::ProviderErrorKind::Parse,
                "Identity provider returned a session without a user",
            )
        })?;
        let session = session_from(token)?;

        self.store_session(CachedSession::new(session.clone(), Some(user.clone())));
        self.schedule_refresh();
        Ok((session, user))
    }

    /// Registers a new account. The service holds the session back until the
    /// address is confirmed, so only the identity comes back.
    pub async fn sign_up(&self, email: &str, password: &str) -> ProviderResult<User> {
        let response = self
            .inner
            .http
            .post(format!("{}/auth/v1/signup", self.inner.url))
            .header("apikey", &self.inner.anon_key)
            .json(&CredentialsBody { email, password })
            .send()
            .await
            .map_err(|e| ProviderError::network(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), &body));
        }

        // Depending on service settings the user arrives bare or wrapped.
        let value: Value = response.json().await.map_err(|e| ProviderError::parse(&e))?;
        let user_value = match value.get("user") {
            Some(wrapped) if wrapped.is_object() => wrapped.clone(),
            _ => value,
        };
        serde_json::from_value(user_value).map_err(|_| {
            ProviderError::new(
                super::ProviderErrorKind::Parse,
                "Unexpected response from the identity provider",
            )
        })
    }

    /// Clears the provider-held session and identity. The local state is
    /// dropped unconditionally; revocation on the server is best-effort.
    pub async fn sign_out(&self) {
        let previous = self
            .inner
            .state
            .lock()
            .expect("remote provider state poisoned")
            .take();
        self.abort_refresh();
        if let Err(e) = self.inner.cache.clear() {
            warn!("failed to clear session cache: {e:#}");
        }

        let Some(cached) = previous else { return };
        let result = self
            .inner
            .http
            .post(format!("{}/auth/v1/logout", self.inner.url))
            .header("apikey", &self.inner.anon_key)
            .bearer_auth(&cached.session.access_token)
            .send()
            .await;
        if let Err(e) = result {
            debug!("session revocation failed (ignored): {e}");
        }
    }

    /// Installs a session from an externally-issued token and resolves the
    /// identity behind it. A failed lookup still installs the session; the
    /// caller holds the authoritative user payload.
    pub async fn install_session(&self, access_token: &str) -> ProviderResult<()> {
        let user = match self.fetch_user(access_token).await {
            Ok(user) => Some(user),
            Err(e) => {
                warn!(
                    token = %mask_token(access_token),
                    "could not resolve identity for installed session: {e}"
                );
                None
            }
        };

        self.abort_refresh();
        self.store_session(CachedSession::new(Session::bearer(access_token), user));
        Ok(())
    }

    async fn fetch_user(&self, access_token: &str) -> ProviderResult<User> {
        let response = self
            .inner
            .http
            .get(format!("{}/auth/v1/user", self.inner.url))
            .header("apikey", &self.inner.anon_key)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| ProviderError::network(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), &body));
        }

        response.json().await.map_err(|e| ProviderError::parse(&e))
    }

    fn store_session(&self, cached: CachedSession) {
        if let Err(e) = self.inner.cache.save(&cached) {
            warn!("failed to persist session cache: {e:#}");
        }
        *self
            .inner
            .state
            .lock()
            .expect("remote provider state poisoned") = Some(cached);
    }

    fn abort_refresh(&self) {
        if let Some(task) = self
            .refresh_task
            .lock()
            .expect("refresh task slot poisoned")
            .take()
        {
            task.abort();
        }
    }

    /// (Re)starts the background refresh task for the current session.
    /// No-op outside an async runtime or when the session cannot refresh.
    fn schedule_refresh(&self) {
        self.abort_refresh();

        let refreshable = {
            let state = self
                .inner
                .state
                .lock()
                .expect("remote provider state poisoned");
            state.as_ref().is_some_and(|c| {
                c.session.refresh_token.is_some() && c.expires_at_ms.is_some()
            })
        };
        if !refreshable {
            return;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("no async runtime; background token refresh disabled");
            return;
        };

        let inner = Arc::clone(&self.inner);
        let task = handle.spawn(refresh_loop(inner));
        *self
            .refresh_task
            .lock()
            .expect("refresh task slot poisoned") = Some(task);
    }
}

impl Drop for RemoteProvider {
    fn drop(&mut self) {
        self.abort_refresh();
    }
}

/// Sleeps until the session is due, exchanges the refresh token, publishes
/// the outcome to listeners, and repeats. A failed exchange clears the
/// session; listeners observe the sign-out.
async fn refresh_loop(inner: Arc<RemoteInner>) {
    loop {
        let (refresh_token, wait_ms) = {
            let state = inner.state.lock().expect("remote provider state poisoned");
            let Some(cached) = state.as_ref() else { return };
            let Some(token) = cached.session.refresh_token.clone() else {
                return;
            };
            let Some(wait) = cached.ms_until_expiry() else {
                return;
            };
            (token, wait)
        };

        if wait_ms > 0 {
            tokio::time::sleep(Duration::from_millis(wait_ms)).await;
        }

        match request_token(&inner, "refresh_token", &RefreshBody {
            refresh_token: &refresh_token,
        })
        .await
        .and_then(session_with_user)
        {
            Ok((session, user)) => {
                debug!(token = %mask_token(&session.access_token), "refreshed identity session");
                let user = user.or_else(|| {
                    inner
                        .state
                        .lock()
                        .expect("remote provider state poisoned")
                        .as_ref()
                        .and_then(|c| c.user.clone())
                });
                let cached = CachedSession::new(session, user);
                if let Err(e) = inner.cache.save(&cached) {
                    warn!("failed to persist refreshed session: {e:#}");
                }
                let session = cached.session.clone();
                let user = cached.user.clone();
                *inner.state.lock().expect("remote provider state poisoned") = Some(cached);
                inner.listeners.notify(Some(&session), user.as_ref());
            }
            Err(e) => {
                warn!("session refresh failed; clearing session: {e}");
                *inner.state.lock().expect("remote provider state poisoned") = None;
                if let Err(e) = inner.cache.clear() {
                    warn!("failed to clear session cache: {e:#}");
                }
                inner.listeners.notify(None, None);
                return;
            }
        }
    }
}

/// Calls the token endpoint with the given grant and body.
async fn request_token<B: Serialize>(
    inner: &RemoteInner,
    grant_type: &str,
    body: &B,
) -> ProviderResult<TokenResponse> {
    let response = inner
        .http
        .post(format!("{}/auth/v1/token", inner.url))
        .query(&[("grant_type", grant_type)])
        .header("apikey", &inner.anon_key)
        .json(body)
        .send()
        .await
        .map_err(|e| ProviderError::network(&e))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::from_status(status.as_u16(), &body));
    }

    response.json().await.map_err(|e| ProviderError::parse(&e))
}

fn session_from(token: TokenResponse) -> ProviderResult<Session> {
    if token.access_token.is_empty() {
        return Err(ProviderError::new(
            super::ProviderErrorKind::Parse,
            "Identity provider returned an empty session",
        ));
    }
    Ok(Session {
        access_token: token.access_token,
        refresh_token: token.refresh_token,
        expires_in: token.expires_in,
        token_type: token.token_type,
    })
}

fn session_with_user(token: TokenResponse) -> ProviderResult<(Session, Option<User>)> {
    let user = token.user.clone();
    Ok((session_from(token)?, user))
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;
    use wiremock::matchers::{bearer_token, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::identity::ProviderErrorKind;

    fn endpoint(server: &MockServer) -> IdentityEndpoint {
        IdentityEndpoint {
            url: server.uri(),
            anon_key: "anon-key".to_string(),
        }
    }

    fn token_body(access: &str) -> serde_json::Value {
        serde_json::json!({
            "access_token": access,
            "token_type": "bearer",
            "expires_in": 3600,
            "refresh_token": "refresh-1",
            "user": {"id": "user-1", "email": "a@b.com"}
        })
    }

    /// Test: password sign-in stores the session and sends the anon key.
    #[tokio::test]
    async fn test_sign_in_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "password"))
            .and(header("apikey", "anon-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("tokA")))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let provider = RemoteProvider::new(endpoint(&server), dir.path().join("session.json"));

        let (session, user) = provider.sign_in("a@b.com", "pw").await.unwrap();
        assert_eq!(session.access_token, "tokA");
        assert_eq!(user.id, "user-1");
        assert_eq!(provider.current_session().unwrap().access_token, "tokA");
        assert_eq!(provider.current_user().unwrap().id, "user-1");
    }

    /// Test: rejected credentials surface the provider's message.
    #[tokio::test]
    async fn test_sign_in_credential_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(serde_json::json!({"error_description": "Invalid login credentials"})),
            )
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let provider = RemoteProvider::new(endpoint(&server), dir.path().join("session.json"));

        let err = provider.sign_in("bad@x.com", "wrong").await.unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Credentials);
        assert_eq!(err.message, "Invalid login credentials");
        assert!(provider.current_session().is_none());
    }

    /// Test: sign-up returns the identity without installing a session.
    #[tokio::test]
    async fn test_sign_up_returns_user_without_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/signup"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"id": "user-2", "email": "new@b.com"}),
            ))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let provider = RemoteProvider::new(endpoint(&server), dir.path().join("session.json"));

        let user = provider.sign_up("new@b.com", "pw").await.unwrap();
        assert_eq!(user.id, "user-2");
        assert!(provider.current_session().is_none());
    }

    /// Test: install_session resolves the identity with the bearer token.
    #[tokio::test]
    async fn test_install_session_fetches_user() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .and(bearer_token("tok1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"id": "guest", "email": "guest@local"}),
            ))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let provider = RemoteProvider::new(endpoint(&server), dir.path().join("session.json"));

        provider.install_session("tok1").await.unwrap();
        assert_eq!(provider.current_session().unwrap().access_token, "tok1");
        assert_eq!(provider.current_user().unwrap().id, "guest");
    }

    /// Test: sign-out clears local state even when revocation fails.
    #[tokio::test]
    async fn test_sign_out_is_fail_open() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("tokA")))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/logout"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let provider = RemoteProvider::new(endpoint(&server), dir.path().join("session.json"));
        provider.sign_in("a@b.com", "pw").await.unwrap();

        provider.sign_out().await;
        assert!(provider.current_session().is_none());
        assert!(provider.current_user().is_none());

        // Idempotent.
        provider.sign_out().await;
        assert!(provider.current_session().is_none());
    }

    /// Test: a signed-in session is restored by a new provider instance.
    #[tokio::test]
    async fn test_session_restored_from_cache() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("tokA")))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let cache_path = dir.path().join("session.json");

        {
            let provider = RemoteProvider::new(endpoint(&server), cache_path.clone());
            provider.sign_in("a@b.com", "pw").await.unwrap();
        }

        let restored = RemoteProvider::new(endpoint(&server), cache_path);
        assert_eq!(restored.current_session().unwrap().access_token, "tokA");
        assert_eq!(restored.current_user().unwrap().id, "user-1");
    }
}
