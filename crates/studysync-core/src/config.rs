//! Engine configuration.
//!
//! Read from an optional JSON file, every field defaulted, with a handful of
//! environment overrides for the gateway credentials.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Name of the database file inside the data directory
pub const DATABASE_FILE: &str = "studysync.redb";

/// Default capacity for the engine event channel
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 30;

pub const ENV_GATEWAY_URL: &str = "STUDYSYNC_URL";
pub const ENV_ANON_KEY: &str = "STUDYSYNC_ANON_KEY";
pub const ENV_ACCESS_TOKEN: &str = "STUDYSYNC_ACCESS_TOKEN";

/// Connection settings for the hosted backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Project base URL, e.g. `https://abc.supabase.co`
    pub url: Option<String>,
    pub anon_key: Option<String>,
    /// Session token of the signed-in user
    pub access_token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: None,
            anon_key: None,
            access_token: None,
            timeout_secs: DEFAULT_GATEWAY_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub data_dir: PathBuf,
    pub event_channel_capacity: usize,
    /// Run a sync pass as soon as the connectivity listener starts online
    pub sync_on_start: bool,
    pub gateway: GatewayConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            sync_on_start: true,
            gateway: GatewayConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file; a missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SyncError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw)
            .map_err(|e| SyncError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Apply `STUDYSYNC_*` environment overrides.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary lookup (environment in production).
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        if let Some(url) = non_empty(ENV_GATEWAY_URL) {
            self.gateway.url = Some(url);
        }
        if let Some(key) = non_empty(ENV_ANON_KEY) {
            self.gateway.anon_key = Some(key);
        }
        if let Some(token) = non_empty(ENV_ACCESS_TOKEN) {
            self.gateway.access_token = Some(token);
        }
        self
    }

    /// Path of the redb file
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }
}

/// `~/.studysync/data`, or `./.studysync/data` without a home directory
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".studysync")
        .join("data")
}
