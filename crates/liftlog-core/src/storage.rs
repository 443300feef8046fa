//! Durable client state.
//!
//! A small JSON key/value file at `${LIFTLOG_HOME}/state.json` holding the
//! flags that must survive restarts independently of the identity session.
//! The only key today is `isGuest`; the value `"true"` marks a guest
//! identity, anything else (including absence) reads as false.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::paths;

/// Key marking that the current identity came from the guest path.
pub const GUEST_FLAG_KEY: &str = "isGuest";

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    #[serde(flatten)]
    entries: HashMap<String, String>,
}

/// Durable key/value storage for client-side state.
pub struct ClientStorage {
    path: PathBuf,
}

impl ClientStorage {
    /// Storage at the default location under `LIFTLOG_HOME`.
    pub fn new() -> Self {
        Self {
            path: paths::state_path(),
        }
    }

    /// Storage rooted at an explicit directory (test injection).
    pub fn at(dir: &Path) -> Self {
        Self {
            path: dir.join("state.json"),
        }
    }

    /// Reads one key. Missing file reads as an empty store.
    pub fn get(&self, key: &str) -> Option<String> {
        self.load().entries.get(key).cloned()
    }

    /// Writes one key.
    ///
    /// # Errors
    /// Returns an error if the state file cannot be written.
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut state = self.load();
        state.entries.insert(key.to_string(), value.to_string());
        self.save(&state)
    }

    /// Removes one key. Removing an absent key is not an error.
    ///
    /// # Errors
    /// Returns an error if the state file cannot be written.
    pub fn remove(&self, key: &str) -> Result<()> {
        let mut state = self.load();
        if state.entries.remove(key).is_none() {
            return Ok(());
        }
        self.save(&state)
    }

    /// Returns true iff the guest flag is the exact string `"true"`.
    pub fn is_guest(&self) -> bool {
        self.get(GUEST_FLAG_KEY).as_deref() == Some("true")
    }

    /// Persists or clears the guest flag.
    ///
    /// # Errors
    /// Returns an error if the state file cannot be written.
    pub fn set_guest(&self, guest: bool) -> Result<()> {
        if guest {
            self.set(GUEST_FLAG_KEY, "true")
        } else {
            self.remove(GUEST_FLAG_KEY)
        }
    }

    fn load(&self) -> StateFile {
        let Ok(contents) = fs::read_to_string(&self.path) else {
            return StateFile::default();
        };
        serde_json::from_str(&contents).unwrap_or_default()
    }

    fn save(&self, state: &StateFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let contents =
            serde_json::to_string_pretty(state).context("Failed to serialize client state")?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(&self.path)
                .with_context(|| format!("Failed to open {} for writing", self.path.display()))?;
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
}

impl Default for ClientStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    /// Test: keys round-trip through the state file.
    #[test]
    fn test_set_get_remove_roundtrip() {
        let dir = tempdir().unwrap();
        let storage = ClientStorage::at(dir.path());

        assert!(storage.get("missing").is_none());
        storage.set("k", "v").unwrap();
        assert_eq!(storage.get("k").as_deref(), Some("v"));
        storage.remove("k").unwrap();
        assert!(storage.get("k").is_none());
        // Removing an absent key is fine.
        storage.remove("k").unwrap();
    }

    /// Test: guest flag reads true only for the exact string "true".
    #[test]
    fn test_guest_flag_strictness() {
        let dir = tempdir().unwrap();
        let storage = ClientStorage::at(dir.path());

        assert!(!storage.is_guest());
        storage.set(GUEST_FLAG_KEY, "TRUE").unwrap();
        assert!(!storage.is_guest());
        storage.set(GUEST_FLAG_KEY, "1").unwrap();
        assert!(!storage.is_guest());
        storage.set_guest(true).unwrap();
        assert!(storage.is_guest());
        storage.set_guest(false).unwrap();
        assert!(!storage.is_guest());
    }

    /// Test: the flag survives a new storage handle over the same directory.
    #[test]
    fn test_guest_flag_is_durable() {
        let dir = tempdir().unwrap();
        ClientStorage::at(dir.path()).set_guest(true).unwrap();
        assert!(ClientStorage::at(dir.path()).is_guest());
    }

    /// Test: a corrupt state file reads as empty instead of failing.
    #[test]
    fn test_corrupt_state_file_reads_empty() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("state.json"), "not json").unwrap();
        let storage = ClientStorage::at(dir.path());
        assert!(!storage.is_guest());
        assert!(storage.get("k").is_none());
    }
}
