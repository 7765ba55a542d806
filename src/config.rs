//! Configuration handling
//!
//! Reads `outbox.toml` from a directory. A `.env` file next to it is loaded
//! first so the environment overrides below can live there.
//!
//! ## Environment Variables
//!
//! - `OUTBOX_BASE_URL` - origin that relative form actions resolve against
//! - `OUTBOX_DATA_DIR` - directory holding `outbox.db`
//! - `OUTBOX_CREDENTIALS` - cookie sent with every replayed request
//! - `OUTBOX_PROBE_URL` - URL polled by the connectivity probe
//! - `OUTBOX_SYNC_INTERVAL` - periodic sync interval in seconds
//! - `OUTBOX_REPLAY_TIMEOUT` - per-replay timeout in seconds (`0` disables it)

use crate::cache::CacheSettings;
use crate::capture::FormConfig;
use crate::sync::{EngineConfig, OutboxOptions};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration file name
pub const CONFIG_FILE_NAME: &str = "outbox.toml";

/// Database file name inside the data directory
pub const DATABASE_FILE_NAME: &str = "outbox.db";

pub const ENV_BASE_URL: &str = "OUTBOX_BASE_URL";
pub const ENV_DATA_DIR: &str = "OUTBOX_DATA_DIR";
pub const ENV_CREDENTIALS: &str = "OUTBOX_CREDENTIALS";
pub const ENV_PROBE_URL: &str = "OUTBOX_PROBE_URL";
pub const ENV_SYNC_INTERVAL: &str = "OUTBOX_SYNC_INTERVAL";
pub const ENV_REPLAY_TIMEOUT: &str = "OUTBOX_REPLAY_TIMEOUT";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server origin, e.g. `https://school.example`
    #[serde(default)]
    pub base_url: Option<String>,
    /// Defaults to `<user data dir>/outbox`
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    /// Session cookie replayed requests carry
    #[serde(default)]
    pub credentials: Option<String>,
    /// Defaults to the base URL
    #[serde(default)]
    pub probe_url: Option<String>,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    /// Per-action form configuration, keyed by form action
    #[serde(default)]
    pub forms: BTreeMap<String, FormConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub interval_secs: u64,
    pub replay_timeout_secs: Option<u64>,
    pub probe_interval_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            replay_timeout_secs: Some(30),
            probe_interval_secs: 10,
        }
    }
}

impl Config {
    /// Load configuration from a directory, failing if the file is missing.
    pub fn load(dir: &Path) -> anyhow::Result<Self> {
        load_env_file(dir);

        let config_path = dir.join(CONFIG_FILE_NAME);
        if !config_path.exists() {
            anyhow::bail!("Configuration file not found: {}", config_path.display());
        }

        let mut config = Self::parse(&std::fs::read_to_string(&config_path)?)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Like `load`, but a missing file yields defaults.
    pub fn load_or_default(dir: &Path) -> anyhow::Result<Self> {
        if dir.join(CONFIG_FILE_NAME).exists() {
            return Self::load(dir);
        }
        load_env_file(dir);
        let mut config = Self::default();
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(base_url) = var(ENV_BASE_URL) {
            self.base_url = Some(base_url);
        }
        if let Some(data_dir) = var(ENV_DATA_DIR) {
            self.data_dir = Some(PathBuf::from(data_dir));
        }
        if let Some(credentials) = var(ENV_CREDENTIALS) {
            self.credentials = Some(credentials);
        }
        if let Some(probe_url) = var(ENV_PROBE_URL) {
            self.probe_url = Some(probe_url);
        }
        if let Some(secs) = var(ENV_SYNC_INTERVAL).and_then(|v| v.parse().ok()) {
            self.sync.interval_secs = secs;
        }
        if let Some(secs) = var(ENV_REPLAY_TIMEOUT).and_then(|v| v.parse::<u64>().ok()) {
            self.sync.replay_timeout_secs = (secs > 0).then_some(secs);
        }
    }

    /// Configuration for a form action. Undeclared forms are not sync-eligible.
    pub fn form_config(&self, action: &str) -> FormConfig {
        self.forms.get(action).cloned().unwrap_or_default()
    }

    pub fn database_path(&self) -> PathBuf {
        let dir = self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("outbox")
        });
        dir.join(DATABASE_FILE_NAME)
    }

    pub fn replay_timeout(&self) -> Option<Duration> {
        self.sync.replay_timeout_secs.map(Duration::from_secs)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync.interval_secs.max(1))
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.sync.probe_interval_secs.max(1))
    }

    pub fn probe_url(&self) -> Option<&str> {
        self.probe_url.as_deref().or(self.base_url.as_deref())
    }

    pub fn outbox_options(&self, initially_online: bool) -> OutboxOptions {
        OutboxOptions {
            initially_online,
            sync_interval: self.sync_interval(),
            engine: EngineConfig {
                replay_timeout: self.replay_timeout(),
            },
        }
    }
}

fn load_env_file(dir: &Path) {
    let env_path = dir.join(".env");
    if env_path.exists() {
        let _ = dotenvy::from_path(&env_path);
    }
}
