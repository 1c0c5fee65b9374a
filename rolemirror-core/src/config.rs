//! YAML configuration with environment overrides.
//!
//! # Storage layout
//!
//! ```text
//! ~/.rolemirror/
//!   config.yaml      (default config location; `--config` overrides)
//!   roles.json       (file-backed sink, under `state_dir`)
//!   rolemirror.sock  (continuous-mode control socket, under `state_dir`)
//! ```
//!
//! # API pattern
//!
//! Loading has two forms, mirroring the rest of the workspace:
//! - `load_at(home, …)`: explicit home; used in tests with `TempDir`
//! - `load(…)`: derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! Environment variables are applied after the file is parsed and before
//! validation, so a config file may omit anything the environment provides.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::GroupId;

pub const ENV_GROUPS: &str = "ROLEMIRROR_GROUPS";
pub const ENV_MODE: &str = "ROLEMIRROR_MODE";
pub const ENV_SOURCE_URL: &str = "ROLEMIRROR_SOURCE_URL";
pub const ENV_SOURCE_TOKEN: &str = "ROLEMIRROR_SOURCE_TOKEN";
pub const ENV_STATE_DIR: &str = "ROLEMIRROR_STATE_DIR";

/// Largest page the member-listing API serves; also the end-of-data sentinel.
pub const DEFAULT_PAGE_SIZE: usize = 1000;
pub const DEFAULT_SYNC_CONCURRENCY: usize = 16;
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_AUTH_SCHEME: &str = "Bot";

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// What the process does once every group has been reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Reconcile each group once, then exit 0.
    #[default]
    Batch,
    /// Reconcile, then keep serving live notifications.
    Continuous,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Batch => write!(f, "batch"),
            RunMode::Continuous => write!(f, "continuous"),
        }
    }
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "batch" => Ok(Self::Batch),
            "continuous" => Ok(Self::Continuous),
            other => Err(format!(
                "unknown mode '{other}'; expected: batch, continuous"
            )),
        }
    }
}

/// Log line format for the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

// ---------------------------------------------------------------------------
// Config structs
// ---------------------------------------------------------------------------

/// Connection settings for the member-listing API.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default = "default_auth_scheme")]
    pub auth_scheme: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token: None,
            auth_scheme: default_auth_scheme(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

// Keeps the token out of logs and error output.
impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("auth_scheme", &self.auth_scheme)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

/// Root of the rolemirror YAML config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub groups: Vec<GroupId>,
    #[serde(default)]
    pub mode: RunMode,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_sync_concurrency")]
    pub sync_concurrency: usize,
    /// Continuous mode only; `0` disables periodic reconciliation.
    #[serde(default)]
    pub reconcile_interval_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,
    #[serde(default)]
    pub log_format: LogFormat,
    #[serde(default)]
    pub source: SourceConfig,
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_sync_concurrency() -> usize {
    DEFAULT_SYNC_CONCURRENCY
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_auth_scheme() -> String {
    DEFAULT_AUTH_SCHEME.to_string()
}

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.rolemirror/`
pub fn rolemirror_root(home: &Path) -> PathBuf {
    home.join(".rolemirror")
}

/// `<home>/.rolemirror/config.yaml`: pure, no I/O.
pub fn default_config_path_at(home: &Path) -> PathBuf {
    rolemirror_root(home).join("config.yaml")
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

impl Config {
    /// Parse a config document without touching the environment or validating.
    pub fn from_yaml(contents: &str, path: &Path) -> Result<Self, ConfigError> {
        serde_yaml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overlay `ROLEMIRROR_*` values obtained through `lookup`.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(groups) = lookup(ENV_GROUPS) {
            self.groups = groups
                .split(',')
                .map(str::trim)
                .filter(|g| !g.is_empty())
                .map(GroupId::from)
                .collect();
        }
        if let Some(mode) = lookup(ENV_MODE) {
            self.mode = mode.parse().map_err(|reason| ConfigError::Invalid {
                field: "mode",
                reason,
            })?;
        }
        if let Some(url) = lookup(ENV_SOURCE_URL) {
            self.source.base_url = url;
        }
        if let Some(token) = lookup(ENV_SOURCE_TOKEN) {
            self.source.token = Some(token);
        }
        if let Some(dir) = lookup(ENV_STATE_DIR) {
            self.state_dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    /// Check every setting the engine depends on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.groups.is_empty() {
            return Err(ConfigError::Missing("groups"));
        }
        if self.groups.iter().any(|g| g.as_str().trim().is_empty()) {
            return Err(ConfigError::Invalid {
                field: "groups",
                reason: "group ids must be non-empty".to_string(),
            });
        }
        if self.page_size == 0 {
            return Err(ConfigError::Invalid {
                field: "page_size",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.sync_concurrency == 0 {
            return Err(ConfigError::Invalid {
                field: "sync_concurrency",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.source.base_url.trim().is_empty() {
            return Err(ConfigError::Missing("source.base_url"));
        }
        match self.source.token.as_deref() {
            None => return Err(ConfigError::Missing("source.token")),
            Some(token) if token.trim().is_empty() => {
                return Err(ConfigError::Missing("source.token"))
            }
            Some(_) => {}
        }
        if self.source.timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "source.timeout_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Effective state directory; falls back to `<home>/.rolemirror`.
    pub fn state_dir_or(&self, home: &Path) -> PathBuf {
        self.state_dir
            .clone()
            .unwrap_or_else(|| rolemirror_root(home))
    }
}

/// Load, overlay environment via `lookup`, and validate.
///
/// `path` defaults to `<home>/.rolemirror/config.yaml`. A missing default file
/// reads as an empty document so the environment alone can configure a run;
/// an explicit `path` must exist. A missing `state_dir` is resolved against
/// `home` so callers always see a concrete directory.
pub fn load_with_env_at<F>(
    home: &Path,
    path: Option<&Path>,
    lookup: F,
) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let explicit = path.is_some();
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_config_path_at(home));
    let contents = if path.exists() {
        std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?
    } else if explicit {
        return Err(ConfigError::NotFound { path });
    } else {
        "{}".to_string()
    };

    let mut config = Config::from_yaml(&contents, &path)?;
    config.apply_env_with(lookup)?;
    if config.state_dir.is_none() {
        config.state_dir = Some(rolemirror_root(home));
    }
    config.validate()?;
    Ok(config)
}

/// `load_with_env_at` using the process environment.
pub fn load_at(home: &Path, path: Option<&Path>) -> Result<Config, ConfigError> {
    load_with_env_at(home, path, |key| std::env::var(key).ok())
}

/// `load_at` convenience wrapper; home from `dirs::home_dir()`.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    load_at(&home()?, path)
}

fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
