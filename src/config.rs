// src/config.rs

//! Configuration file loading
//!
//! ghpm reads an optional YAML config file (default `/etc/ghpm/config.yaml`)
//! that relocates the packages/state/cache directories and tunes network
//! behaviour. A missing file yields the built-in defaults; a present but
//! malformed file is an error.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Network tuning knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkConfig {
    /// HTTP timeout in seconds; values <= 0 fall back to 30
    pub timeout_seconds: i64,
    /// Retry attempts for transient download failures
    pub retries: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            retries: 2,
        }
    }
}

/// Top-level ghpm configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Directory holding one subdirectory per package manifest
    pub packages_dir: String,
    /// Directory holding the installed index, receipts and work dirs
    pub state_dir: String,
    /// Directory holding the download cache
    pub cache_dir: String,
    pub network: NetworkConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            packages_dir: "/var/lib/ghpm/packages".to_string(),
            state_dir: "/var/lib/ghpm/state".to_string(),
            cache_dir: "/var/cache/ghpm".to_string(),
            network: NetworkConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, falling back to defaults when the
    /// file does not exist
    pub fn load(path: &Path) -> Result<Config> {
        let data = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no config at {}, using defaults", path.display());
                return Ok(Config::default());
            }
            Err(e) => return Err(e.into()),
        };
        let cfg: Config = serde_yaml::from_str(&data)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Ok(cfg)
    }

    /// Effective HTTP timeout
    pub fn http_timeout(&self) -> Duration {
        if self.network.timeout_seconds <= 0 {
            return Duration::from_secs(30);
        }
        Duration::from_secs(self.network.timeout_seconds as u64)
    }

    /// Create the directory skeleton under `root` (packages, state,
    /// state/work, state/receipts, cache/downloads). Idempotent.
    pub fn ensure_dirs(&self, root: &Path) -> Result<()> {
        let state = crate::fsops::join_root(root, &self.state_dir);
        let dirs = [
            crate::fsops::join_root(root, &self.packages_dir),
            state.join("work"),
            state.join("receipts"),
            crate::fsops::join_root(root, &self.cache_dir).join("downloads"),
            state,
        ];
        for dir in &dirs {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}
