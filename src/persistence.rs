//! Persistence layer for discovered state
//!
//! Stores the account numbers found during setup so a restart does not need
//! a discovery round-trip before the first refresh.

use crate::error::Result;
use crate::logging::get_logger;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Persistent state structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistentState {
    /// Account numbers discovered for the configured credentials
    pub accounts: Vec<String>,

    /// When discovery last ran
    pub discovered_at: Option<DateTime<Utc>>,
}

/// Persistence manager
pub struct PersistenceManager {
    file_path: String,
    state: PersistentState,
    logger: crate::logging::StructuredLogger,
}

impl PersistenceManager {
    /// Create a new persistence manager
    pub fn new(file_path: &str) -> Self {
        let logger = get_logger("persistence");

        Self {
            file_path: file_path.to_string(),
            state: PersistentState::default(),
            logger,
        }
    }

    /// Load state from disk
    pub fn load(&mut self) -> Result<()> {
        let path = Path::new(&self.file_path);

        if !path.exists() {
            self.logger
                .info("No persistent state file found, using defaults");
            return Ok(());
        }

        let contents = std::fs::read_to_string(path)?;
        self.state = serde_json::from_str(&contents)?;
        self.logger.info("Loaded persistent state from disk");

        Ok(())
    }

    /// Save state to disk
    pub fn save(&self) -> Result<()> {
        let contents = serde_json::to_string_pretty(&self.state)?;
        std::fs::write(&self.file_path, contents)?;
        self.logger.debug("Saved persistent state to disk");

        Ok(())
    }

    /// Previously discovered account numbers
    pub fn accounts(&self) -> &[String] {
        &self.state.accounts
    }

    /// Record a fresh discovery result
    pub fn set_accounts(&mut self, accounts: Vec<String>) {
        self.state.accounts = accounts;
        self.state.discovered_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut manager = PersistenceManager::new(path.to_str().unwrap());
        manager.load().unwrap();
        assert!(manager.accounts().is_empty());
    }

    #[test]
    fn save_and_reload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let mut manager = PersistenceManager::new(path.to_str().unwrap());
        manager.set_accounts(vec!["A-1".to_string(), "A-2".to_string()]);
        manager.save().unwrap();

        let mut reloaded = PersistenceManager::new(path.to_str().unwrap());
        reloaded.load().unwrap();
        assert_eq!(reloaded.accounts(), ["A-1", "A-2"]);
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "not json").unwrap();

        let mut manager = PersistenceManager::new(path.to_str().unwrap());
        assert!(manager.load().is_err());
    }
}
