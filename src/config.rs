//! Runtime configuration for the state layer.
//!
//! Loaded from `~/.dashboard/config.json` when present. Every field has a serde
//! default so a partial file (or none) is valid. A few environment variables
//! override the file for deployment convenience.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

const DEFAULT_AUTH_URL: &str = "http://localhost:3000/api";
const DEFAULT_SESSION_TIMEOUT_MINS: u64 = 30;
const DEFAULT_CACHE_TTL_SECS: u64 = 5 * 60;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    /// Directory holding persisted container snapshots.
    /// Defaults to `~/.dashboard/state`.
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default = "default_session_timeout_mins")]
    pub session_timeout_mins: u64,
    #[serde(default = "default_cache_ttl_secs")]
    pub default_cache_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    #[serde(default = "default_auth_url")]
    pub base_url: String,
    #[serde(default = "default_login_path")]
    pub login_path: String,
    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_auth_url() -> String {
    DEFAULT_AUTH_URL.to_string()
}

fn default_login_path() -> String {
    "/auth/login".to_string()
}

fn default_refresh_path() -> String {
    "/auth/refresh".to_string()
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_max_attempts() -> u32 {
    3
}

fn default_session_timeout_mins() -> u64 {
    DEFAULT_SESSION_TIMEOUT_MINS
}

fn default_cache_ttl_secs() -> u64 {
    DEFAULT_CACHE_TTL_SECS
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            base_url: default_auth_url(),
            login_path: default_login_path(),
            refresh_path: default_refresh_path(),
            request_timeout_secs: default_request_timeout_secs(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            state_dir: None,
            auth: AuthConfig::default(),
            session_timeout_mins: DEFAULT_SESSION_TIMEOUT_MINS,
            default_cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
        }
    }
}

impl StoreConfig {
    /// Load from the default location, then apply env overrides.
    /// A missing file yields defaults.
    pub fn load() -> Result<Self, StoreError> {
        let path = config_path()?;
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            log::debug!("No config at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Parse a config file. The top level must be a JSON object.
    pub fn from_file(path: &Path) -> Result<Self, StoreError> {
        let content = std::fs::read_to_string(path).map_err(|e| StoreError::io(path, e))?;
        let parse_err =
            |e: serde_json::Error| StoreError::Config(format!("Failed to parse {}: {}", path.display(), e));
        let raw: serde_json::Value = serde_json::from_str(&content).map_err(parse_err)?;
        if !raw.is_object() {
            return Err(StoreError::Config(format!(
                "{} must contain a JSON object",
                path.display()
            )));
        }
        let config: Self = serde_json::from_value(raw).map_err(parse_err)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `DASHBOARD_*` overrides read through `lookup`.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), StoreError> {
        if let Some(url) = lookup("DASHBOARD_AUTH_URL").filter(|v| !v.trim().is_empty()) {
            self.auth.base_url = url;
        }
        if let Some(dir) = lookup("DASHBOARD_STATE_DIR").filter(|v| !v.trim().is_empty()) {
            self.state_dir = Some(PathBuf::from(dir));
        }
        if let Some(mins) = lookup("DASHBOARD_SESSION_TIMEOUT_MINS") {
            self.session_timeout_mins = mins.trim().parse().map_err(|_| {
                StoreError::Config(format!(
                    "DASHBOARD_SESSION_TIMEOUT_MINS must be a number, got '{}'",
                    mins
                ))
            })?;
        }
        self.validate()
    }

    /// Reject durations chrono cannot represent.
    pub fn validate(&self) -> Result<(), StoreError> {
        if minutes(self.session_timeout_mins).is_none() {
            return Err(StoreError::Config(format!(
                "sessionTimeoutMins out of range: {}",
                self.session_timeout_mins
            )));
        }
        if seconds(self.default_cache_ttl_secs).is_none() {
            return Err(StoreError::Config(format!(
                "defaultCacheTtlSecs out of range: {}",
                self.default_cache_ttl_secs
            )));
        }
        Ok(())
    }

    /// Resolved snapshot directory.
    pub fn resolved_state_dir(&self) -> Result<PathBuf, StoreError> {
        match &self.state_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(dashboard_home()?.join("state")),
        }
    }

    /// Saturates at `Duration::MAX` for values `validate` would reject.
    pub fn session_timeout(&self) -> chrono::Duration {
        minutes(self.session_timeout_mins).unwrap_or(chrono::Duration::MAX)
    }

    pub fn default_cache_ttl(&self) -> chrono::Duration {
        seconds(self.default_cache_ttl_secs).unwrap_or(chrono::Duration::MAX)
    }
}

fn minutes(value: u64) -> Option<chrono::Duration> {
    i64::try_from(value).ok().and_then(chrono::Duration::try_minutes)
}

fn seconds(value: u64) -> Option<chrono::Duration> {
    i64::try_from(value).ok().and_then(chrono::Duration::try_seconds)
}

fn dashboard_home() -> Result<PathBuf, StoreError> {
    let home = dirs::home_dir().ok_or(StoreError::HomeDirNotFound)?;
    Ok(home.join(".dashboard"))
}

/// Get the canonical config file path (~/.dashboard/config.json)
pub fn config_path() -> Result<PathBuf, StoreError> {
    Ok(dashboard_home()?.join("config.json"))
}
