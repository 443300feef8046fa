//! Configuration management for liftlog.
//!
//! Loads configuration from ${LIFTLOG_HOME}/config.toml with sensible defaults.
//! Settings resolve with env > config > default precedence.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Default base URL for the liftlog backend.
pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:8000";

/// Env var overriding the backend base URL.
pub const BACKEND_URL_ENV: &str = "LIFTLOG_BACKEND_URL";
/// Env var overriding the identity provider URL.
pub const IDENTITY_URL_ENV: &str = "LIFTLOG_IDENTITY_URL";
/// Env var overriding the identity provider anon key.
pub const IDENTITY_KEY_ENV: &str = "LIFTLOG_IDENTITY_KEY";

/// Backend API configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the liftlog backend.
    pub base_url: Option<String>,
}

/// Identity provider configuration.
///
/// When `url` or `anon_key` is missing from both config and env, the
/// offline substitute is selected instead of the remote provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Identity service URL (e.g. the project's auth endpoint).
    pub url: Option<String>,
    /// Public (anon) API key sent with every identity request.
    pub anon_key: Option<String>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backend API configuration.
    pub backend: BackendConfig,
    /// Identity provider configuration.
    pub identity: IdentityConfig,
}

impl Config {
    /// Loads configuration from the default config path.
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_path())
    }

    /// Loads configuration from a specific path.
    /// Returns defaults if file doesn't exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {}", path.display()))
        } else {
            Ok(Config::default())
        }
    }

    /// Creates a default config file at the given path.
    /// Returns an error if the file already exists.
    pub fn init(path: &Path) -> Result<()> {
        if path.exists() {
            anyhow::bail!("Config file already exists at {}", path.display());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        let contents =
            toml::to_string_pretty(&Config::default()).context("Failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }
}

/// Resolved identity provider endpoint (remote variant only).
#[derive(Debug, Clone)]
pub struct IdentityEndpoint {
    pub url: String,
    pub anon_key: String,
}

/// Resolves the backend base URL with precedence: env > config > default.
///
/// # Errors
/// Returns an error if the resolved URL is not well-formed.
pub fn resolve_backend_url(config: &Config) -> Result<String> {
    resolve_url_setting(
        config.backend.base_url.as_deref(),
        BACKEND_URL_ENV,
        DEFAULT_BACKEND_URL,
        "backend",
    )
}

/// Resolves the identity provider endpoint.
///
/// Returns `None` when the URL or anon key is absent from both env and
/// config; the caller then selects the offline substitute.
///
/// # Errors
/// Returns an error if a URL is configured but not well-formed.
pub fn resolve_identity_endpoint(config: &Config) -> Result<Option<IdentityEndpoint>> {
    let url = resolve_setting(config.identity.url.as_deref(), IDENTITY_URL_ENV);
    let anon_key = resolve_setting(config.identity.anon_key.as_deref(), IDENTITY_KEY_ENV);

    match (url, anon_key) {
        (Some(url), Some(anon_key)) => {
            validate_url(&url, "identity provider")?;
            Ok(Some(IdentityEndpoint { url, anon_key }))
        }
        _ => Ok(None),
    }
}

/// Resolves a single setting with precedence: env > config.
/// Empty or whitespace-only values are treated as absent.
fn resolve_setting(config_value: Option<&str>, env_var: &str) -> Option<String> {
    if let Ok(env_value) = std::env::var(env_var) {
        let trimmed = env_value.trim();
        if !trimmed.is_empty() {
            return Some(trimmed.to_string());
        }
    }

    config_value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}

/// Resolves a URL setting with precedence: env > config > default.
fn resolve_url_setting(
    config_value: Option<&str>,
    env_var: &str,
    default_url: &str,
    name: &str,
) -> Result<String> {
    if let Some(value) = resolve_setting(config_value, env_var) {
        validate_url(&value, name)?;
        return Ok(value);
    }
    Ok(default_url.to_string())
}

/// Validates that a URL is well-formed.
fn validate_url(url: &str, name: &str) -> Result<()> {
    url::Url::parse(url).with_context(|| format!("Invalid {name} base URL: {url}"))?;
    Ok(())
}

pub mod paths {
    //! Path resolution for liftlog configuration and data directories.
    //!
    //! LIFTLOG_HOME resolution order:
    //! 1. LIFTLOG_HOME environment variable (if set)
    //! 2. ~/.config/liftlog (default)

    use std::path::PathBuf;

    /// Returns the liftlog home directory.
    ///
    /// Checks LIFTLOG_HOME env var first, falls back to ~/.config/liftlog
    pub fn liftlog_home() -> PathBuf {
        if let Ok(home) = std::env::var("LIFTLOG_HOME") {
            return PathBuf::from(home);
        }

        dirs::home_dir()
            .map(|h| h.join(".config").join("liftlog"))
            .expect("Could not determine home directory")
    }

    /// Returns the path to the config.toml file.
    pub fn config_path() -> PathBuf {
        liftlog_home().join("config.toml")
    }

    /// Returns the path to the durable client state file.
    pub fn state_path() -> PathBuf {
        liftlog_home().join("state.json")
    }

    /// Returns the path to the cached identity session file.
    pub fn session_cache_path() -> PathBuf {
        liftlog_home().join("session.json")
    }

    /// Returns the directory for log files.
    pub fn logs_dir() -> PathBuf {
        liftlog_home().join("logs")
    }
}
