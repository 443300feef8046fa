//! Application context.
//!
//! The explicitly constructed dependency graph owning the session core for
//! the process lifetime: identity provider, authorized transport, session
//! state manager. Built once at startup and passed down to command
//! handlers; nothing here is a global.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use liftlog_core::config::{self, Config};
use liftlog_core::identity::IdentityProvider;
use liftlog_core::session::{Notice, NoticeLevel, SessionManager};
use liftlog_core::storage::ClientStorage;
use liftlog_core::transport::{ApiClient, SessionInvalidated};
use tokio::sync::broadcast;
use tracing::debug;

pub struct AppContext {
    pub manager: Arc<SessionManager>,
    notices: broadcast::Receiver<Notice>,
    invalidated: broadcast::Receiver<SessionInvalidated>,
}

impl AppContext {
    /// Builds the dependency graph from configuration and runs the startup
    /// initialization, restoring any persisted session.
    pub async fn bootstrap() -> Result<Self> {
        let config = Config::load().context("load config")?;
        let provider = Arc::new(IdentityProvider::from_config(&config)?);
        let base_url = config::resolve_backend_url(&config)?;
        let api = Arc::new(ApiClient::new(base_url, Arc::clone(&provider)));
        let manager = SessionManager::new(provider, api, ClientStorage::new());

        let notices = manager.notices();
        let invalidated = manager.api().on_invalidated();
        manager.initialize().await;
        debug!(backend = %manager.api().base_url(), "application context ready");

        Ok(Self {
            manager,
            notices,
            invalidated,
        })
    }

    pub fn api(&self) -> &ApiClient {
        self.manager.api()
    }

    /// Fails unless the snapshot holds a user; authenticated commands gate
    /// on this before touching the backend.
    pub fn require_user(&self) -> Result<()> {
        if self.manager.snapshot().user.is_none() {
            anyhow::bail!("Not signed in. Run `liftlog login <email>` or `liftlog guest`.");
        }
        Ok(())
    }

    /// Prints pending notices to stderr, returning true when any reported
    /// an error.
    fn drain_notices(&mut self) -> bool {
        let mut saw_error = false;
        while let Ok(notice) = self.notices.try_recv() {
            match notice.level {
                NoticeLevel::Success => eprintln!("{}", notice.message),
                NoticeLevel::Error => {
                    saw_error = true;
                    eprintln!("error: {}", notice.message);
                }
            }
        }
        saw_error
    }

    /// End-of-command bookkeeping: prints notices and reacts to a rejected
    /// credential by completing the forced sign-out and returning to the
    /// entry point (a non-zero exit, which discards all in-memory state).
    pub async fn finish(mut self) -> Result<()> {
        let failed = self.drain_notices();

        if self.invalidated.try_recv().is_ok() {
            self.manager.force_sign_out().await;
            eprintln!("Session expired; please sign in again.");
            anyhow::bail!("session invalidated");
        }

        if failed {
            anyhow::bail!("command failed");
        }
        Ok(())
    }
}
