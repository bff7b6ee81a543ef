use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use toml::{Table, Value};

use crate::error::ConfigError;

const DEFAULT_CONFIG: &str = include_str!("../../../config/default.toml");

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub feed: FeedConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub filter: FilterConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    pub url: String,
    /// Seconds between polls.
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_interval() -> u64 {
    900
}

fn default_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Accepted torrent URLs are appended here, one per line.
    pub links_file: Option<PathBuf>,
    /// When set, torrent payloads are downloaded into this directory.
    pub torrent_dir: Option<PathBuf>,
    /// Ids already handed to the sink.
    pub ledger_file: Option<PathBuf>,
}

impl OutputConfig {
    pub fn links_path(&self) -> PathBuf {
        self.links_file
            .clone()
            .unwrap_or_else(|| AppConfig::data_path("links.txt"))
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.ledger_file
            .clone()
            .unwrap_or_else(|| AppConfig::data_path("accepted.txt"))
    }
}

/// The rule DSL as decoded from TOML. Compiled by [`crate::RuleSet::compile`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Info keys ranking same-episode releases, most significant first.
    #[serde(default)]
    pub tie_break: Vec<String>,
    #[serde(default)]
    pub macros: Table,
    #[serde(default)]
    pub deny: Vec<Value>,
    #[serde(default)]
    pub accept: Vec<Value>,
}

impl AppConfig {
    /// Load config: user file (if exists) or the built-in defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let user_path = Self::config_path();
        if user_path.exists() {
            Self::load_from(&user_path)
        } else {
            Self::from_toml(DEFAULT_CONFIG)
        }
    }

    /// Load from an explicit path. The file must exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Path to user config file (XDG on Linux, AppData on Windows).
    pub fn config_path() -> PathBuf {
        Self::project_dirs()
            .map(|d| d.config_dir().join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("config.toml"))
    }

    /// Path of a file in the data directory.
    pub fn data_path(name: &str) -> PathBuf {
        Self::project_dirs()
            .map(|d| d.data_dir().join(name))
            .unwrap_or_else(|| PathBuf::from(name))
    }

    fn project_dirs() -> Option<ProjectDirs> {
        ProjectDirs::from("", "", "senbetsu")
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        toml::from_str(DEFAULT_CONFIG).expect("built-in default config is valid TOML")
    }
}
