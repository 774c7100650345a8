//! Module configuration, read from the `modules:` section of the Ship config file

use crate::modules::types::SourceKind;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {}: {error}", path.display())]
    Io { path: PathBuf, error: String },

    #[error("failed to parse config file {}: {error}", path.display())]
    Parse { path: PathBuf, error: String },
}

/// A git repository that contributes modules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitRepository {
    pub url: String,
    /// Branch, tag or commit; the remote's default branch when absent
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    /// Subdirectory of the checkout holding module directories
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleConfig {
    pub allow_untrusted: bool,
    pub trusted_modules: Vec<String>,
    pub repositories: Vec<GitRepository>,
    /// Extra user-level module roots, scanned after the user directory
    pub directories: Vec<PathBuf>,
    pub user_dir: Option<PathBuf>,
    pub project_dir: Option<PathBuf>,
    /// Project root checked for a `dagger.json`
    pub project_root: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    /// Accepts `update_interval: 24h` style durations as well as plain seconds
    #[serde(alias = "update_interval", deserialize_with = "deserialize_interval")]
    pub update_interval_secs: Option<u64>,
    pub sandbox: bool,
    pub precedence: Vec<SourceKind>,
    pub include_builtin: bool,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            allow_untrusted: false,
            trusted_modules: Vec::new(),
            repositories: Vec::new(),
            directories: Vec::new(),
            user_dir: None,
            project_dir: None,
            project_root: None,
            cache_dir: None,
            update_interval_secs: None,
            sandbox: true,
            precedence: Vec::new(),
            include_builtin: true,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawInterval {
    Seconds(u64),
    Text(String),
}

fn deserialize_interval<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<RawInterval>::deserialize(deserializer)? {
        None => Ok(None),
        Some(RawInterval::Seconds(secs)) => Ok(Some(secs)),
        Some(RawInterval::Text(text)) => parse_duration(&text)
            .map(|d| Some(d.as_secs()))
            .map_err(serde::de::Error::custom),
    }
}

/// Parse `90`, `45s`, `30m`, `24h` or combinations such as `1h30m`
pub fn parse_duration(text: &str) -> Result<Duration, String> {
    let text = text.trim();
    if text.is_empty() {
        return Err("duration is empty".to_string());
    }
    if let Ok(secs) = text.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total: u64 = 0;
    let mut digits = String::new();
    for c in text.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let unit = match c {
            'h' => 3600,
            'm' => 60,
            's' => 1,
            other => return Err(format!("invalid duration '{text}': unknown unit '{other}'")),
        };
        let value: u64 = digits
            .parse()
            .map_err(|_| format!("invalid duration '{text}': missing number before '{c}'"))?;
        total = value
            .checked_mul(unit)
            .and_then(|secs| total.checked_add(secs))
            .ok_or_else(|| format!("duration '{text}' is too large"))?;
        digits.clear();
    }
    if !digits.is_empty() {
        return Err(format!("invalid duration '{text}': missing unit after '{digits}'"));
    }
    Ok(Duration::from_secs(total))
}

#[derive(Debug, Default, Deserialize)]
struct ShipConfigFile {
    #[serde(default)]
    modules: ModuleConfig,
}

impl ModuleConfig {
    /// Default location of the Ship config file (`~/.ship/config.yaml`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".ship").join("config.yaml"))
    }

    /// Load the `modules:` section from a config file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        Self::from_yaml(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })
    }

    /// Load the explicit config file, or the default one when it exists
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Self::load_from_file(path),
            None => match Self::default_path() {
                Some(path) if path.is_file() => Self::load_from_file(&path),
                _ => {
                    debug!("No Ship config file found, using module defaults");
                    Ok(Self::default())
                }
            },
        }
    }

    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let file: ShipConfigFile = serde_yaml::from_str(text)?;
        Ok(file.modules)
    }

    /// `~/.ship/modules` unless overridden
    pub fn user_modules_dir(&self) -> Option<PathBuf> {
        self.user_dir
            .clone()
            .or_else(|| dirs::home_dir().map(|home| home.join(".ship").join("modules")))
    }

    /// `./.ship/modules` unless overridden
    pub fn project_modules_dir(&self) -> PathBuf {
        self.project_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(".ship").join("modules"))
    }

    /// The current directory unless overridden
    pub fn project_root_dir(&self) -> PathBuf {
        self.project_root
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Where git sources are checked out
    pub fn git_cache_dir(&self) -> PathBuf {
        if let Some(dir) = &self.cache_dir {
            return dir.clone();
        }
        match dirs::home_dir() {
            Some(home) => home.join(".ship").join("cache").join("modules"),
            None => std::env::temp_dir().join("ship").join("cache").join("modules"),
        }
    }

    pub fn update_interval(&self) -> Option<Duration> {
        self.update_interval_secs.map(Duration::from_secs)
    }
}
