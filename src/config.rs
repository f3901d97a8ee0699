//! Configuration Management
//!
//! Persistent defaults for cloudcheck, stored as JSON in the user config
//! directory. Command-line flags override every value here.

use crate::runner::RunOptions;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const APP_NAME: &str = "cloudcheck";
pub const DEFAULT_ZONE: &str = "us-central1-a";

/// User configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// GCP project for live resource types
    #[serde(default)]
    pub project_id: Option<String>,
    /// GCP zone, or `all`
    #[serde(default)]
    pub zone: Option<String>,
    /// Inventory file loaded on every run
    #[serde(default)]
    pub inventory: Option<PathBuf>,
    /// Assertions resolved at once within a control
    #[serde(default)]
    pub concurrency: Option<usize>,
    /// Run deadline in seconds
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Config {
    /// Directory holding the config file and the log file
    pub fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join(APP_NAME))
    }

    fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// Load configuration from disk; a missing or unreadable file yields defaults
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };

        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(&path) {
            Ok(content) => Self::from_json_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring invalid config {:?}: {}", path, e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Failed to parse config JSON")
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let Some(path) = Self::config_path() else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, content)?;

        Ok(())
    }

    /// Effective project (config > gcloud default)
    pub fn effective_project(&self) -> Option<String> {
        self.project_id
            .clone()
            .or_else(crate::gcp::auth::get_default_project)
    }

    /// Effective zone (config > gcloud default > us-central1-a)
    pub fn effective_zone(&self) -> String {
        self.zone
            .clone()
            .or_else(crate::gcp::auth::get_default_zone)
            .unwrap_or_else(|| DEFAULT_ZONE.to_string())
    }

    pub fn run_options(&self) -> RunOptions {
        let defaults = RunOptions::default();
        RunOptions {
            concurrency: self.concurrency.unwrap_or(defaults.concurrency).max(1),
            timeout: self.timeout_secs.map(Duration::from_secs).or(defaults.timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = Config::from_json_str(r#"{"zone": "europe-west1-b"}"#).unwrap();
        assert_eq!(config.zone.as_deref(), Some("europe-west1-b"));
        assert_eq!(config.effective_zone(), "europe-west1-b");
        assert!(config.inventory.is_none());
        assert_eq!(config.run_options(), RunOptions::default());
    }

    #[test]
    fn test_run_options() {
        let config = Config {
            concurrency: Some(0),
            timeout_secs: Some(90),
            ..Default::default()
        };
        let options = config.run_options();
        assert_eq!(options.concurrency, 1);
        assert_eq!(options.timeout, Some(Duration::from_secs(90)));
    }

    #[test]
    fn test_round_trip_pretty() {
        let config = Config {
            project_id: Some("audit-project".into()),
            inventory: Some(PathBuf::from("/tmp/inventory.yaml")),
            ..Default::default()
        };
        let json = serde_json::to_string_pretty(&config).unwrap();
        assert_eq!(Config::from_json_str(&json).unwrap(), config);
    }

    #[test]
    fn test_invalid_json_is_error() {
        assert!(Config::from_json_str("{ not json").is_err());
    }
}
