// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Configuration for kubelua
//!
//! All kubelua data is stored under ~/.kubelua/:
//! - ~/.kubelua/config.json - user configuration
//! - ~/.kubelua/history - REPL command history
//! - ~/.kubelua/log/ - log files
//!
//! The config file is only read; session state is never written back.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::bridge::NumberMode;

/// Get the base kubelua directory (~/.kubelua/)
pub fn base_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|p| p.join(".kubelua"))
        .context("Could not determine home directory")
}

fn default_history_size() -> usize {
    1000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Initial session namespace
    #[serde(default)]
    pub namespace: Option<String>,

    /// How numbers in resource objects reach scripts
    #[serde(default)]
    pub number_mode: NumberMode,

    /// Maximum REPL history entries
    #[serde(default = "default_history_size")]
    pub history_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: None,
            number_mode: NumberMode::default(),
            history_size: default_history_size(),
        }
    }
}

impl Config {
    /// Load config from disk, or return default if not found
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Get the config file path (~/.kubelua/config.json)
    pub fn config_path() -> Result<PathBuf> {
        Ok(base_dir()?.join("config.json"))
    }

    /// Get the history file path (~/.kubelua/history)
    pub fn history_path() -> Result<PathBuf> {
        Ok(base_dir()?.join("history"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert!(config.namespace.is_none());
        assert_eq!(config.number_mode, NumberMode::Native);
        assert_eq!(config.history_size, 1000);
    }

    #[test]
    fn test_config_deserialize() {
        let json = r#"{"namespace": "kube-system", "number_mode": "decimal_string", "history_size": 50}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.namespace.as_deref(), Some("kube-system"));
        assert_eq!(config.number_mode, NumberMode::DecimalString);
        assert_eq!(config.history_size, 50);
    }

    #[test]
    fn test_config_deserialize_empty() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert!(config.namespace.is_none());
        assert_eq!(config.history_size, 1000);
    }

    #[test]
    fn test_load_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::load_from(&temp_dir.path().join("config.json")).unwrap();
        assert_eq!(config.history_size, 1000);
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");
        fs::write(&config_path, r#"{"namespace": "shop"}"#).unwrap();

        let loaded = Config::load_from(&config_path).unwrap();
        assert_eq!(loaded.namespace.as_deref(), Some("shop"));
        assert_eq!(loaded.number_mode, NumberMode::Native);
    }

    #[test]
    fn test_load_invalid_file_names_path() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");
        fs::write(&config_path, "{ not json").unwrap();

        let err = Config::load_from(&config_path).unwrap_err();
        assert!(format!("{}", err).contains("config.json"));
    }
}
