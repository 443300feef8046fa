//! Deterministic offline identity substitute.
//!
//! Used when the identity service is unconfigured so the app remains usable
//! for local development and demos. Sign-in always succeeds with an identity
//! derived from the email and a fixed dummy token; nothing here must ever be
//! mistaken for real authentication.

use sha2::{Digest, Sha256};

use super::{Listeners, Session, User};
use std::sync::Mutex;

/// Fixed access token issued by the substitute.
const OFFLINE_ACCESS_TOKEN: &str = "dummy";

/// Fixed identity synthesized for manually installed sessions.
const GUEST_USER_ID: &str = "guest";
const GUEST_USER_EMAIL: &str = "guest@local";

/// In-memory stand-in for the identity service.
///
/// Holds the session behind a mutex; never fires session-change listeners
/// (there is no background refresh to report).
pub struct OfflineProvider {
    state: Mutex<Option<(Session, User)>>,
    listeners: Listeners,
}

impl OfflineProvider {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(None),
            listeners: Listeners::default(),
        }
    }

    pub(crate) fn listeners(&self) -> &Listeners {
        &self.listeners
    }

    pub fn current_session(&self) -> Option<Session> {
        self.state
            .lock()
            .expect("offline provider state poisoned")
            .as_ref()
            .map(|(session, _)| session.clone())
    }

    pub fn current_user(&self) -> Option<User> {
        self.state
            .lock()
            .expect("offline provider state poisoned")
            .as_ref()
            .map(|(_, user)| user.clone())
    }

    /// Always succeeds; same email yields the same identity across calls.
    pub fn sign_in(&self, email: &str) -> (Session, User) {
        let user = deterministic_user(email);
        let session = Session::bearer(OFFLINE_ACCESS_TOKEN);
        *self.state.lock().expect("offline provider state poisoned") =
            Some((session.clone(), user.clone()));
        (session, user)
    }

    /// Synthesizes the account identity without establishing a session,
    /// mirroring provider flows that require confirmation.
    pub fn sign_up(&self, email: &str) -> User {
        deterministic_user(email)
    }

    pub fn sign_out(&self) {
        *self.state.lock().expect("offline provider state poisoned") = None;
    }

    /// Stores the externally-issued token and synthesizes the fixed guest
    /// identity.
    pub fn install_session(&self, access_token: &str) {
        let session = Session::bearer(access_token);
        let user = User {
            id: GUEST_USER_ID.to_string(),
            email: Some(GUEST_USER_EMAIL.to_string()),
        };
        *self.state.lock().expect("offline provider state poisoned") = Some((session, user));
    }
}

impl Default for OfflineProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Derives a stable identity from an email address.
fn deterministic_user(email: &str) -> User {
    let digest = Sha256::digest(email.as_bytes());
    let tag: String = digest.iter().take(6).map(|b| format!("{b:02x}")).collect();
    User {
        id: format!("offline-{tag}"),
        email: Some(email.to_string()),
    }
}
