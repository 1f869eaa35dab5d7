//! Application configuration management.
//!
//! This module handles loading and saving the client configuration: the
//! server root URL, the talk application path under it, and a few behaviour
//! switches for the session client.
//!
//! Configuration is stored at `~/.config/geocam-talk/config.json`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "geocam-talk";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// File name used for downloaded audio when the caller does not pick one
const DEFAULT_DOWNLOAD_FILE: &str = "tempfile.mp4";

const DEFAULT_SERVER_ROOT: &str = "http://localhost:8000";
const DEFAULT_APP_PATH: &str = "talk";

/// HTTP request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

pub const SERVER_ROOT_ENV: &str = "GEOCAM_TALK_SERVER_ROOT";
pub const APP_PATH_ENV: &str = "GEOCAM_TALK_APP_PATH";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server_root: String,
    pub app_path: String,
    pub download_dir: Option<PathBuf>,
    pub request_timeout_secs: u64,
    /// Drop the session when the server answers 401/403 so the next call logs in again.
    pub invalidate_on_auth_failure: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_root: DEFAULT_SERVER_ROOT.to_string(),
            app_path: DEFAULT_APP_PATH.to_string(),
            download_dir: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            invalidate_on_auth_failure: false,
        }
    }
}

impl Config {
    pub fn new(server_root: impl Into<String>, app_path: impl Into<String>) -> Self {
        Self {
            server_root: server_root.into(),
            app_path: app_path.into(),
            ..Self::default()
        }
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;
        Ok(())
    }

    /// Override fields from `GEOCAM_TALK_*` environment variables.
    pub fn apply_env(&mut self) {
        self.apply_overrides(
            std::env::var(SERVER_ROOT_ENV).ok(),
            std::env::var(APP_PATH_ENV).ok(),
        );
    }

    fn apply_overrides(&mut self, server_root: Option<String>, app_path: Option<String>) {
        if let Some(root) = server_root.filter(|s| !s.trim().is_empty()) {
            self.server_root = root;
        }
        if let Some(path) = app_path.filter(|s| !s.trim().is_empty()) {
            self.app_path = path;
        }
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

    /// Where fetched audio goes unless the caller says otherwise
    pub fn default_download_path(&self) -> Result<PathBuf> {
        let dir = match self.download_dir {
            Some(ref dir) => dir.clone(),
            None => self.cache_dir()?,
        };
        Ok(dir.join(DEFAULT_DOWNLOAD_FILE))
    }
}
