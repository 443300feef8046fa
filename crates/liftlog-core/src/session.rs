//! Session state manager.
//!
//! The process-wide source of truth for "who is the current user".
//! Constructed once by the application root and passed down; sole writer of
//! the observable [`Snapshot`]. Mutating operations are serialized through
//! one async lock, so concurrent sign-in/sign-out cannot interleave and the
//! published snapshot always reflects a single completed operation.
//!
//! Presentation code consumes two channels: the synchronous snapshot
//! subscription (re-render on change) and the [`Notice`] broadcast (one
//! user-facing message per success or failure path).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::identity::{IdentityProvider, ListenerHandle, Session, User};
use crate::storage::ClientStorage;
use crate::transport::ApiClient;

/// The externally observable session state.
///
/// `loading` is true exactly while one mutating operation is in flight.
/// `is_guest` is true only while a session is also present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub session: Option<Session>,
    pub user: Option<User>,
    pub is_guest: bool,
    pub loading: bool,
}

/// Severity of a user-facing notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Error,
}

/// A single user-facing message (the toast equivalent).
#[derive(Debug, Clone)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

type Subscriber = Box<dyn Fn(&Snapshot) + Send>;
type SubscriberSlots = Mutex<Vec<(u64, Subscriber)>>;

/// Disposable snapshot subscription. Dropping the handle detaches the
/// subscriber.
pub struct Subscription {
    id: u64,
    slots: Weak<SubscriberSlots>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(slots) = self.slots.upgrade() {
            slots
                .lock()
                .expect("subscriber registry poisoned")
                .retain(|(id, _)| *id != self.id);
        }
    }
}

/// Orchestrates identity operations and publishes the resulting state.
pub struct SessionManager {
    provider: Arc<IdentityProvider>,
    api: Arc<ApiClient>,
    storage: ClientStorage,
    snapshot: Mutex<Snapshot>,
    subscribers: Arc<SubscriberSlots>,
    next_subscriber_id: AtomicU64,
    /// Serializes mutating operations: one in flight at a time.
    op_lock: tokio::sync::Mutex<()>,
    notices: broadcast::Sender<Notice>,
    /// Provider change subscription, held for the process lifetime.
    provider_listener: Mutex<Option<ListenerHandle>>,
}

impl SessionManager {
    pub fn new(
        provider: Arc<IdentityProvider>,
        api: Arc<ApiClient>,
        storage: ClientStorage,
    ) -> Arc<Self> {
        let (notices, _) = broadcast::channel(16);
        Arc::new(Self {
            provider,
            api,
            storage,
            snapshot: Mutex::new(Snapshot::default()),
            subscribers: Arc::new(Mutex::new(Vec::new())),
            next_subscriber_id: AtomicU64::new(0),
            op_lock: tokio::sync::Mutex::new(()),
            notices,
            provider_listener: Mutex::new(None),
        })
    }

    /// Current snapshot, by value.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.lock().expect("snapshot poisoned").clone()
    }

    /// The shared authorized transport.
    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    /// Registers a snapshot subscriber, notified synchronously in
    /// registration order on every publish. Subscribers must not
    /// subscribe or unsubscribe from within the callback.
    pub fn subscribe(&self, subscriber: impl Fn(&Snapshot) + Send + 'static) -> Subscription {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .expect("subscriber registry poisoned")
            .push((id, Box::new(subscriber)));
        Subscription {
            id,
            slots: Arc::downgrade(&self.subscribers),
        }
    }

    /// Subscribes to user-facing notices.
    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    /// Reads the provider's current session and identity, publishes the
    /// first snapshot, and wires up the two long-lived reactions: provider
    /// session changes and transport invalidation events. Called once at
    /// application startup.
    pub async fn initialize(self: &Arc<Self>) {
        let _op = self.op_lock.lock().await;
        self.publish(|s| s.loading = true);

        let session = self.provider.current_session();
        let user = self.provider.current_user();
        let is_guest = self.storage.is_guest() && session.is_some();
        self.publish(move |s| {
            *s = Snapshot {
                session,
                user,
                is_guest,
                loading: false,
            };
        });

        let already_wired = self
            .provider_listener
            .lock()
            .expect("provider listener slot poisoned")
            .is_some();
        if already_wired {
            return;
        }

        // Provider-initiated changes (token refresh, refresh failure)
        // republish with the currently persisted guest flag.
        let weak = Arc::downgrade(self);
        let handle = self.provider.on_session_change(move |session, user| {
            let Some(manager) = weak.upgrade() else { return };
            let session = session.cloned();
            let user = user.cloned();
            let is_guest = manager.storage.is_guest() && session.is_some();
            debug!("provider session change; republishing snapshot");
            manager.publish(move |s| {
                s.session = session;
                s.user = user;
                s.is_guest = is_guest;
            });
        });
        *self
            .provider_listener
            .lock()
            .expect("provider listener slot poisoned") = Some(handle);

        // Forced global sign-out when the backend rejects the credential.
        let mut invalidated = self.api.on_invalidated();
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            while invalidated.recv().await.is_ok() {
                let Some(manager) = weak.upgrade() else { return };
                manager.force_sign_out().await;
            }
        });
    }

    /// Exchanges credentials for a session. Failure leaves the snapshot
    /// unchanged apart from the loading flag.
    pub async fn sign_in(&self, email: &str, password: &str) {
        let _op = self.op_lock.lock().await;
        self.publish(|s| s.loading = true);

        match self.provider.sign_in(email, password).await {
            Ok((session, user)) => {
                if let Err(e) = self.storage.set_guest(false) {
                    warn!("failed to clear guest flag: {e:#}");
                }
                self.publish(move |s| {
                    *s = Snapshot {
                        session: Some(session),
                        user: Some(user),
                        is_guest: false,
                        loading: false,
                    };
                });
                self.notify(Notice::success("Signed in"));
            }
            Err(e) => {
                if let Some(details) = &e.details {
                    debug!("sign-in failed: {details}");
                }
                self.notify(Notice::error(e.message));
                self.publish(|s| s.loading = false);
            }
        }
    }

    /// Registers a new account. Never installs a session; the provider
    /// withholds it until the address is confirmed.
    pub async fn sign_up(&self, email: &str, password: &str) {
        let _op = self.op_lock.lock().await;
        self.publish(|s| s.loading = true);

        match self.provider.sign_up(email, password).await {
            Ok(_user) => {
                self.notify(Notice::success(
                    "Sign up successful; please check your email",
                ));
            }
            Err(e) => {
                if let Some(details) = &e.details {
                    debug!("sign-up failed: {details}");
                }
                self.notify(Notice::error(e.message));
            }
        }
        self.publish(|s| s.loading = false);
    }

    /// Signs out. Local state is cleared unconditionally once invoked;
    /// a provider call that cannot reach the network must not leave the
    /// user logged in. Idempotent.
    pub async fn sign_out(&self) {
        let _op = self.op_lock.lock().await;
        self.publish(|s| s.loading = true);

        self.provider.sign_out().await;
        if let Err(e) = self.storage.set_guest(false) {
            warn!("failed to clear guest flag: {e:#}");
        }
        self.publish(|s| *s = Snapshot::default());
    }

    /// Obtains a guest-scoped session from the application backend and
    /// installs it into the identity adapter. Failure leaves the manager
    /// anonymous.
    pub async fn login_as_guest(&self) {
        let _op = self.op_lock.lock().await;
        self.publish(|s| s.loading = true);

        let guest = match self.api.guest_session().await {
            Ok(guest) if !guest.access_token.is_empty() => guest,
            Ok(_) => {
                error!("backend returned a guest session without an access token");
                self.notify(Notice::error("Failed to log in as guest"));
                self.publish(|s| s.loading = false);
                return;
            }
            Err(e) => {
                if let Some(details) = &e.details {
                    debug!("guest provisioning failed: {details}");
                }
                self.notify(Notice::error(format!("Failed to log in as guest: {e}")));
                self.publish(|s| s.loading = false);
                return;
            }
        };

        match self.provider.install_session(&guest.access_token).await {
            Ok(()) => {
                let session = Session::from(&guest);
                let user = self.provider.current_user().unwrap_or_else(|| guest.user.clone());
                if let Err(e) = self.storage.set_guest(true) {
                    warn!("failed to persist guest flag: {e:#}");
                }
                self.publish(move |s| {
                    *s = Snapshot {
                        session: Some(session),
                        user: Some(user),
                        is_guest: true,
                        loading: false,
                    };
                });
                self.notify(Notice::success("Logged in as guest"));
            }
            Err(e) => {
                self.notify(Notice::error(format!("Failed to log in as guest: {e}")));
                self.publish(|s| s.loading = false);
            }
        }
    }

    /// Reaction to a transport invalidation event: clear everything and
    /// publish the empty snapshot. Runs under the operation lock, so it
    /// orders after any in-flight operation. Idempotent, like [`sign_out`];
    /// the application root may call it directly when it observes the
    /// invalidation event itself.
    ///
    /// [`sign_out`]: Self::sign_out
    pub async fn force_sign_out(&self) {
        let _op = self.op_lock.lock().await;
        warn!("authorization rejected; forcing global sign-out");
        self.provider.sign_out().await;
        if let Err(e) = self.storage.set_guest(false) {
            warn!("failed to clear guest flag: {e:#}");
        }
        self.publish(|s| *s = Snapshot::default());
    }

    /// Applies a mutation to the snapshot and notifies subscribers
    /// synchronously in registration order.
    fn publish(&self, update: impl FnOnce(&mut Snapshot)) {
        let snapshot = {
            let mut state = self.snapshot.lock().expect("snapshot poisoned");
            update(&mut state);
            state.clone()
        };
        let subscribers = self.subscribers.lock().expect("subscriber registry poisoned");
        for (_, subscriber) in subscribers.iter() {
            subscriber(&snapshot);
        }
    }

    fn notify(&self, notice: Notice) {
        match notice.level {
            NoticeLevel::Success => info!("{}", notice.message),
            NoticeLevel::Error => error!("{}", notice.message),
        }
        // Nobody listening is fine; notices are advisory.
        let _ = self.notices.send(notice);
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::identity::OfflineProvider;

    fn offline_manager(dir: &std::path::Path) -> Arc<SessionManager> {
        let provider = Arc::new(IdentityProvider::Offline(OfflineProvider::new()));
        let api = Arc::new(ApiClient::new(
            "http://127.0.0.1:9",
            Arc::clone(&provider),
        ));
        SessionManager::new(provider, api, ClientStorage::at(dir))
    }

    /// Test: initialize settles with loading=false and an anonymous snapshot.
    #[tokio::test]
    async fn test_initialize_settles_anonymous() {
        let dir = tempdir().unwrap();
        let manager = offline_manager(dir.path());

        manager.initialize().await;

        let snapshot = manager.snapshot();
        assert!(!snapshot.loading);
        assert!(snapshot.session.is_none());
        assert!(snapshot.user.is_none());
        assert!(!snapshot.is_guest);
    }

    /// Test: a stale guest flag without a session is not surfaced at boot.
    #[tokio::test]
    async fn test_initialize_ignores_guest_flag_without_session() {
        let dir = tempdir().unwrap();
        ClientStorage::at(dir.path()).set_guest(true).unwrap();

        let manager = offline_manager(dir.path());
        manager.initialize().await;

        assert!(!manager.snapshot().is_guest);
    }

    /// Test: sign-in publishes the authenticated snapshot and one notice.
    #[tokio::test]
    async fn test_sign_in_publishes_authenticated_snapshot() {
        let dir = tempdir().unwrap();
        let manager = offline_manager(dir.path());
        manager.initialize().await;
        let mut notices = manager.notices();

        manager.sign_in("a@b.com", "pw").await;

        let snapshot = manager.snapshot();
        assert!(!snapshot.loading);
        assert!(snapshot.session.is_some());
        assert!(snapshot.user.as_ref().unwrap().id.starts_with("offline-"));
        assert!(!snapshot.is_guest);

        let notice = notices.try_recv().unwrap();
        assert_eq!(notice.level, NoticeLevel::Success);
        assert!(notices.try_recv().is_err());
    }

    /// Test: repeated offline sign-ins yield the same identity id.
    #[tokio::test]
    async fn test_offline_sign_in_determinism() {
        let dir = tempdir().unwrap();
        let manager = offline_manager(dir.path());
        manager.initialize().await;

        manager.sign_in("a@b.com", "x").await;
        let first = manager.snapshot().user.unwrap().id;

        manager.sign_out().await;
        manager.sign_in("a@b.com", "y").await;
        let second = manager.snapshot().user.unwrap().id;

        assert_eq!(first, second);
    }

    /// Test: sign-up surfaces a confirmation notice without a session.
    #[tokio::test]
    async fn test_sign_up_leaves_anonymous() {
        let dir = tempdir().unwrap();
        let manager = offline_manager(dir.path());
        manager.initialize().await;
        let mut notices = manager.notices();

        manager.sign_up("new@b.com", "pw").await;

        let snapshot = manager.snapshot();
        assert!(!snapshot.loading);
        assert!(snapshot.session.is_none());
        assert!(snapshot.user.is_none());

        let notice = notices.try_recv().unwrap();
        assert_eq!(notice.level, NoticeLevel::Success);
        assert!(notice.message.contains("check your email"));
    }

    /// Test: sign-out twice ends in the same state with no second notice.
    #[tokio::test]
    async fn test_sign_out_idempotent() {
        let dir = tempdir().unwrap();
        let manager = offline_manager(dir.path());
        manager.initialize().await;
        manager.sign_in("a@b.com", "pw").await;
        let mut notices = manager.notices();

        manager.sign_out().await;
        let after_first = manager.snapshot();
        assert_eq!(after_first, Snapshot::default());
        assert!(!ClientStorage::at(dir.path()).is_guest());

        manager.sign_out().await;
        let after_second = manager.snapshot();
        assert_eq!(after_first, after_second);
        assert!(notices.try_recv().is_err());
    }

    /// Test: subscribers fire synchronously in registration order and
    /// detach on drop.
    #[tokio::test]
    async fn test_subscribers_ordered_and_disposable() {
        let dir = tempdir().unwrap();
        let manager = offline_manager(dir.path());

        let order = Arc::new(Mutex::new(Vec::new()));
        let order_a = Arc::clone(&order);
        let sub_a = manager.subscribe(move |_| order_a.lock().unwrap().push("a"));
        let order_b = Arc::clone(&order);
        let _sub_b = manager.subscribe(move |_| order_b.lock().unwrap().push("b"));

        manager.initialize().await;
        {
            let calls = order.lock().unwrap();
            assert_eq!(calls.chunks(2).next(), Some(["a", "b"].as_slice()));
        }

        drop(sub_a);
        order.lock().unwrap().clear();
        manager.sign_in("a@b.com", "pw").await;
        assert!(!order.lock().unwrap().contains(&"a"));
        assert!(order.lock().unwrap().contains(&"b"));
    }

    /// Test: loading is observable mid-operation via a subscriber and
    /// always resets afterwards.
    #[tokio::test]
    async fn test_loading_brackets_operations() {
        let dir = tempdir().unwrap();
        let manager = offline_manager(dir.path());
        manager.initialize().await;

        let saw_loading = Arc::new(Mutex::new(false));
        let saw = Arc::clone(&saw_loading);
        let _sub = manager.subscribe(move |snapshot| {
            if snapshot.loading {
                *saw.lock().unwrap() = true;
            }
        });

        manager.sign_in("a@b.com", "pw").await;
        assert!(*saw_loading.lock().unwrap());
        assert!(!manager.snapshot().loading);
    }
}
