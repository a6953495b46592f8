//! Configuration storage

use anyhow::{bail, Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::chat::pagination::DEFAULT_PAGE_SIZE;
use crate::chat::presence::DEFAULT_TYPING_DEBOUNCE;
use crate::chat::store::DEFAULT_LIVE_WINDOW;

const DEFAULT_PREVIEW_CHARS: usize = 30;

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Local user id used when `chat` is run without `--user`
    pub user: Option<String>,
    /// Messages fetched per older page
    pub page_size: usize,
    /// Size of the live recent-messages subscription
    pub live_window: usize,
    /// Quiet period before "typing" is cleared
    pub typing_debounce_ms: u64,
    /// Display columns of a peer's last-message preview
    pub preview_chars: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            user: None,
            page_size: DEFAULT_PAGE_SIZE,
            live_window: DEFAULT_LIVE_WINDOW,
            typing_debounce_ms: DEFAULT_TYPING_DEBOUNCE.as_millis() as u64,
            preview_chars: DEFAULT_PREVIEW_CHARS,
        }
    }
}

impl Config {
    /// Get config directory path
    fn config_dir() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "pairchat", "pairchat")
            .context("Could not determine config directory")?;
        Ok(proj_dirs.config_dir().to_path_buf())
    }

    /// Get config file path
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from disk
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load from `path`; a missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).context("Failed to read config file")?;
        let config: Self = toml::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            bail!("page_size must be at least 1");
        }
        if self.live_window == 0 {
            bail!("live_window must be at least 1");
        }
        if self.preview_chars == 0 {
            bail!("preview_chars must be at least 1");
        }
        Ok(())
    }

    pub fn typing_debounce(&self) -> Duration {
        Duration::from_millis(self.typing_debounce_ms)
    }
}
