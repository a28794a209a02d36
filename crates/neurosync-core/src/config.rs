//! Client configuration management.
//!
//! This module handles loading and saving the client configuration: backend
//! URL, timeouts, retry backoff, auth wire options and cache TTL rules.
//!
//! Configuration is stored at `~/.config/neurosync/config.json`.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Application name used for config/cache directory paths
pub const APP_NAME: &str = "neurosync";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Default backend for local development.
const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Base delay before the single automatic retry of an idempotent request.
const DEFAULT_RETRY_BACKOFF_MS: u64 = 500;

/// Refresh this many seconds before a known expiry instead of waiting for a 401.
const DEFAULT_REFRESH_BUFFER_SECS: u64 = 300;

/// Default lifetime of a cached GET response.
const DEFAULT_CACHE_TTL_SECS: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoginEncoding {
    /// `{"username": .., "password": ..}` as JSON.
    #[default]
    Json,
    /// OAuth2 password form (`application/x-www-form-urlencoded`).
    Form,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub login_encoding: LoginEncoding,
    pub refresh_buffer_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            login_encoding: LoginEncoding::default(),
            refresh_buffer_secs: DEFAULT_REFRESH_BUFFER_SECS,
        }
    }
}

/// TTL override for reads under a path prefix. A ttl of 0 disables caching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheRule {
    pub prefix: String,
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub default_ttl_secs: u64,
    pub rules: Vec<CacheRule>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            rules: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub retry_backoff_ms: u64,
    pub keyring_service: String,
    /// Unauthenticated path polled by the reachability probe.
    pub health_path: String,
    pub auth: AuthConfig,
    pub cache: CacheConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            keyring_service: APP_NAME.to_string(),
            health_path: "/".to_string(),
            auth: AuthConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Configuration pointing at `base_url` with every other field defaulted.
    pub fn for_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply `NEUROSYNC_BASE_URL` / `NEUROSYNC_TIMEOUT_SECS` overrides.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("NEUROSYNC_BASE_URL") {
            self.base_url = url;
        }
        if let Ok(raw) = std::env::var("NEUROSYNC_TIMEOUT_SECS") {
            match raw.parse() {
                Ok(secs) => self.request_timeout_secs = secs,
                Err(_) => warn!(value = %raw, "Ignoring invalid NEUROSYNC_TIMEOUT_SECS"),
            }
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir() -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Absolute URL for an API path, tolerating a trailing slash on the base.
    pub fn url_for(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        if path.starts_with('/') {
            format!("{}{}", base, path)
        } else {
            format!("{}/{}", base, path)
        }
    }
}
