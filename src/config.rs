//! Configuration file.
//!
//! Looked up at `--config`, then `$TOOLDECK_CONFIG`, then
//! [`DEFAULT_CONFIG_FILE`]. A missing file means defaults; every key is
//! optional.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use log::debug;
use serde::Deserialize;

use crate::keystore::DEFAULT_KEY_TIMEOUT;
use crate::plugin::DEFAULT_PLUGIN_DIR;
use crate::repository::{BackupRetention, DEFAULT_COMMAND_TIMEOUT, DEFAULT_SOURCES_FILE};
use crate::runtime::Runtime;
use crate::source::DEFAULT_KEYSERVER;

pub const DEFAULT_CONFIG_FILE: &str = "/etc/tooldeck/config.toml";
pub const CONFIG_ENV: &str = "TOOLDECK_CONFIG";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Packages processed at once; CPU count when unset.
    pub parallelism: Option<usize>,
    /// Seconds allowed for fetching a signing key.
    pub key_timeout: u64,
    /// Seconds allowed for each package manager invocation.
    pub command_timeout: u64,
    pub backup_retention: BackupRetention,
    pub default_keyserver: String,
    pub sources_file: PathBuf,
    pub keyring_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub plugin_dir: PathBuf,
    pub state_dir: PathBuf,
    pub checksum_dir: PathBuf,
    pub install_root: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            parallelism: None,
            key_timeout: DEFAULT_KEY_TIMEOUT.as_secs(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT.as_secs(),
            backup_retention: BackupRetention::default(),
            default_keyserver: DEFAULT_KEYSERVER.to_string(),
            sources_file: PathBuf::from(DEFAULT_SOURCES_FILE),
            keyring_dir: PathBuf::from("/etc/apt/keyrings"),
            backup_dir: PathBuf::from("/var/backups/tooldeck"),
            plugin_dir: PathBuf::from(DEFAULT_PLUGIN_DIR),
            state_dir: PathBuf::from("/var/lib/tooldeck"),
            checksum_dir: PathBuf::from("/var/lib/tooldeck/checksums"),
            install_root: PathBuf::from("/"),
        }
    }
}

impl Config {
    /// Resolves the config path and loads it.
    pub fn load<R: Runtime>(runtime: &R, explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => runtime
                .env_var(CONFIG_ENV)
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE)),
        };
        Self::from_file(runtime, &path)
    }

    pub fn from_file<R: Runtime>(runtime: &R, path: &Path) -> Result<Self> {
        if !runtime.exists(path) {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = runtime.read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for (key, value) in [
            ("key_timeout", self.key_timeout),
            ("command_timeout", self.command_timeout),
        ] {
            if value == 0 {
                bail!("{} must be at least 1 second", key);
            }
        }
        Ok(())
    }

    pub fn key_timeout(&self) -> Duration {
        Duration::from_secs(self.key_timeout)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout)
    }
}
