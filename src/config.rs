//! Configuration management for Octobridge
//!
//! This module handles loading, validation, and management of the application
//! configuration from YAML files.

use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_true() -> bool {
    true
}

fn default_poll_interval_minutes() -> u64 {
    // The upstream rate limit is 100 calls per hour shared with the vendor app
    2
}

fn default_pending_timeout_minutes() -> u64 {
    5
}

fn default_state_file() -> String {
    "/data/octobridge_state.json".to_string()
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Upstream API connection configuration
    pub api: ApiConfig,

    /// Pre-discovered account numbers; discovered at setup when empty
    #[serde(default)]
    pub accounts: Vec<String>,

    /// Refresh interval in minutes
    #[serde(default = "default_poll_interval_minutes")]
    pub poll_interval_minutes: u64,

    /// Grace period for optimistic switch state before reverting, in minutes
    #[serde(default = "default_pending_timeout_minutes")]
    pub pending_timeout_minutes: u64,

    /// Path of the JSON state file (discovered accounts)
    #[serde(default = "default_state_file")]
    pub state_file: String,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Upstream API connection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Account email address
    pub email: String,

    /// Account password
    pub password: String,

    /// GraphQL endpoint URL
    #[serde(default = "ApiConfig::default_endpoint")]
    pub endpoint: String,

    /// Per-request timeout in seconds
    #[serde(default = "ApiConfig::default_timeout_secs")]
    pub timeout_secs: u64,
}

impl ApiConfig {
    fn default_endpoint() -> String {
        "https://api.oeg-kraken.energy/v1/graphql/".to_string()
    }

    fn default_timeout_secs() -> u64 {
        30
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Path to log file (or directory for rotated files)
    pub file: String,

    /// Number of rotated files to keep
    pub backup_count: u32,

    /// Whether to log to console
    #[serde(default = "default_true")]
    pub console_output: bool,

    /// Whether to use JSON format
    #[serde(default)]
    pub json_format: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            email: String::new(),
            password: String::new(),
            endpoint: Self::default_endpoint(),
            timeout_secs: Self::default_timeout_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            file: "/tmp/octobridge.log".to_string(),
            backup_count: 5,
            console_output: true,
            json_format: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            accounts: Vec::new(),
            poll_interval_minutes: default_poll_interval_minutes(),
            pending_timeout_minutes: default_pending_timeout_minutes(),
            state_file: default_state_file(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        let default_paths = [
            "octobridge_config.yaml",
            "/data/octobridge_config.yaml",
            "/etc/octobridge/config.yaml",
        ];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        // Fall back to default configuration
        Ok(Config::default())
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.api.email.is_empty() {
            return Err(BridgeError::validation(
                "api.email",
                "Email cannot be empty",
            ));
        }

        if self.api.password.is_empty() {
            return Err(BridgeError::validation(
                "api.password",
                "Password cannot be empty",
            ));
        }

        if self.api.endpoint.is_empty() {
            return Err(BridgeError::validation(
                "api.endpoint",
                "Endpoint cannot be empty",
            ));
        }

        if self.poll_interval_minutes == 0 {
            return Err(BridgeError::validation(
                "poll_interval_minutes",
                "Must be greater than 0",
            ));
        }

        if self.pending_timeout_minutes == 0 {
            return Err(BridgeError::validation(
                "pending_timeout_minutes",
                "Must be greater than 0",
            ));
        }

        Ok(())
    }
}
