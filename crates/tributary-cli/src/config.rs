//! Configuration management for the tributary shell

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default output format
    pub output_format: OutputFormat,

    /// Enable colored output
    pub colored: bool,

    /// Directory holding the command log (default: ~/.tributary/data)
    pub data_dir: Option<PathBuf>,

    /// Node configuration file with server-wide property overrides
    pub node_config: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Tabular,
    Json,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Tabular => f.write_str("TABULAR"),
            OutputFormat::Json => f.write_str("JSON"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "TABULAR" => Ok(OutputFormat::Tabular),
            "JSON" => Ok(OutputFormat::Json),
            other => anyhow::bail!("Invalid output format: '{}' (expected TABULAR or JSON)", other),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_format: OutputFormat::Tabular,
            colored: true,
            data_dir: None,
            node_config: None,
        }
    }
}

impl Config {
    /// Load config from `path`, or the default when the file does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("Invalid config file {}", path.display()))?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Command log directory, falling back to ~/.tributary/data
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| home_dir().join("data"))
    }

    /// Get config file path (~/.tributary/config.toml)
    pub fn default_path() -> PathBuf {
        home_dir().join("config.toml")
    }
}

/// ~/.tributary
pub fn home_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".tributary")
}
