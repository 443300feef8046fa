//! Cached identity session storage.
//!
//! The remote provider persists its last known session to
//! `${LIFTLOG_HOME}/session.json` with restricted permissions (0600) so
//! `current_session()` survives restarts. Tokens are never logged in full.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::{Session, User};

/// Safety margin subtracted from the token lifetime so refresh happens
/// before the server-side expiry.
const EXPIRY_MARGIN_MS: u64 = 60 * 1000;

/// A session as persisted on disk, with an absolute expiry timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedSession {
    pub session: Session,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    /// Expiry timestamp in milliseconds since epoch, margin already applied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at_ms: Option<u64>,
}

impl CachedSession {
    /// Builds a cache entry, converting the session's relative `expires_in`
    /// into an absolute timestamp.
    pub fn new(session: Session, user: Option<User>) -> Self {
        let expires_at_ms = session.expires_in.map(expires_at_from);
        Self {
            session,
            user,
            expires_at_ms,
        }
    }

    /// Returns true if the access token is expired or about to expire.
    /// Sessions without a known expiry never report expired.
    pub fn is_expired(&self) -> bool {
        match self.expires_at_ms {
            Some(expires) => now_ms() >= expires,
            None => false,
        }
    }

    /// Milliseconds until the refresh deadline (zero when already due).
    pub fn ms_until_expiry(&self) -> Option<u64> {
        self.expires_at_ms.map(|e| e.saturating_sub(now_ms()))
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn expires_at_from(expires_in_secs: u64) -> u64 {
    now_ms() + (expires_in_secs * 1000).saturating_sub(EXPIRY_MARGIN_MS)
}

/// On-disk session cache.
pub(crate) struct SessionCache {
    path: PathBuf,
}

impl SessionCache {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Loads the cached session. Returns `None` if the file doesn't exist.
    pub fn load(&self) -> Result<Option<CachedSession>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read session cache from {}", self.path.display()))?;

        serde_json::from_str(&contents)
            .map(Some)
            .with_context(|| format!("Failed to parse session cache from {}", self.path.display()))
    }

    /// Saves the session to disk with restricted permissions (0600).
    pub fn save(&self, cached: &CachedSession) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let contents =
            serde_json::to_string_pretty(cached).context("Failed to serialize session cache")?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(&self.path)
                .with_context(|| {
                    format!("Failed to open {} for writing", self.path.display())
                })?;
            file.write_all(contents.as_bytes())
                .with_context(|| format!("Failed to write to {}", self.path.display()))?;
        }

        #[cfg(not(unix))]
        {
            fs::write(&self.path, contents)
                .with_context(|| format!("Failed to write to {}", self.path.display()))?;
        }

        Ok(())
    }

    /// Removes the cached session. Missing file is not an error.
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", self.path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn sample_session(expires_in: Option<u64>) -> Session {
        Session {
            access_token: "access-token".to_string(),
            refresh_token: Some("refresh-token".to_string()),
            expires_in,
            token_type: Some("bearer".to_string()),
        }
    }

    /// Test: save/load round-trips the session and user.
    #[test]
    fn test_session_cache_roundtrip() {
        let dir = tempdir().unwrap();
        let cache = SessionCache::new(dir.path().join("session.json"));

        let cached = CachedSession::new(
            sample_session(Some(3600)),
            Some(User {
                id: "user-1".to_string(),
                email: Some("a@b.com".to_string()),
            }),
        );
        cache.save(&cached).unwrap();

        let loaded = cache.load().unwrap().unwrap();
        assert_eq!(loaded.session.access_token, "access-token");
        assert!(loaded.expires_at_ms.is_some());
        assert!(!loaded.is_expired());
        assert_eq!(loaded.user.unwrap().id, "user-1");
    }

    /// Test: missing cache file loads as None; clear is idempotent.
    #[test]
    fn test_session_cache_missing_and_clear() {
        let dir = tempdir().unwrap();
        let cache = SessionCache::new(dir.path().join("session.json"));

        assert!(cache.load().unwrap().is_none());
        cache.clear().unwrap();

        cache
            .save(&CachedSession::new(sample_session(None), None))
            .unwrap();
        assert!(cache.load().unwrap().is_some());

        cache.clear().unwrap();
        assert!(cache.load().unwrap().is_none());
    }

    /// Test: sessions without expiry never report expired; past expiry does.
    #[test]
    fn test_cached_session_expiry() {
        let no_expiry = CachedSession::new(sample_session(None), None);
        assert!(!no_expiry.is_expired());

        let mut expired = CachedSession::new(sample_session(Some(3600)), None);
        expired.expires_at_ms = Some(1);
        assert!(expired.is_expired());
        assert_eq!(expired.ms_until_expiry(), Some(0));
    }
}
