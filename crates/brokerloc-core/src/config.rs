//! Application configuration management.
//!
//! Configuration is stored at `~/.config/brokerloc/config.json` and covers
//! auto-detection, cache lifetime, provider timeouts and an optional fixed
//! device position.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::cache::LOCATION_CACHE_TTL_MINUTES;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "brokerloc";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable overriding `device_coords`
pub const COORDS_ENV: &str = "BROKERLOC_COORDS";

fn default_cache_ttl_minutes() -> i64 {
    LOCATION_CACHE_TTL_MINUTES
}

fn default_request_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub auto_detect: bool,
    #[serde(default = "default_cache_ttl_minutes")]
    pub cache_ttl_minutes: i64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// "lat,lng[,accuracy]" reported as the device fix
    #[serde(default)]
    pub device_coords: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auto_detect: false,
            cache_ttl_minutes: default_cache_ttl_minutes(),
            request_timeout_secs: default_request_timeout_secs(),
            device_coords: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config: {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply environment overrides.
    pub fn with_env(mut self) -> Self {
        if let Ok(coords) = std::env::var(COORDS_ENV) {
            if !coords.trim().is_empty() {
                self.device_coords = Some(coords);
            }
        }
        self
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.cache_ttl_minutes.max(0))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}
