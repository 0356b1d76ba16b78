use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use valgsync_core::SftpConfig;

use crate::sync::retry::RetryPolicy;
use crate::sync::scheduler::{DEFAULT_WORKERS, MAX_WORKERS};
use crate::sync::task::SyncOptions;

const ENV_HOST: &str = "VALGSYNC_HOST";
const ENV_USERNAME: &str = "VALGSYNC_USERNAME";
const ENV_PASSWORD: &str = "VALGSYNC_PASSWORD";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("config declares no [[groups]]")]
    NoGroups,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub remote: SftpConfig,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
}

/// One top-level dataset to mirror: a remote root with a list of subfolders.
/// Groups run sequentially; files inside each folder run in parallel.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupConfig {
    pub name: String,
    pub remote_root: String,
    pub local_root: PathBuf,
    pub folders: Vec<String>,
    /// Per-group worker override; capped at MAX_WORKERS.
    pub workers: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    pub probe_attempts: u32,
    pub probe_interval_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_delay_secs: 3,
            probe_attempts: 5,
            probe_interval_secs: 2,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.apply_env_overrides();
        if config.groups.is_empty() {
            return Err(ConfigError::NoGroups);
        }
        Ok(config)
    }

    fn from_toml(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var(ENV_HOST) {
            self.remote.host = host;
        }
        if let Ok(username) = std::env::var(ENV_USERNAME) {
            self.remote.username = username;
        }
        if let Ok(password) = std::env::var(ENV_PASSWORD) {
            self.remote.password = password;
        }
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            retry: RetryPolicy::new(
                self.sync.max_retries,
                Duration::from_secs(self.sync.retry_delay_secs),
            ),
            probe_attempts: self.sync.probe_attempts,
            probe_interval: Duration::from_secs(self.sync.probe_interval_secs),
        }
    }
}

impl GroupConfig {
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or(DEFAULT_WORKERS).clamp(1, MAX_WORKERS)
    }
}
