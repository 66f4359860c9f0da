//! Task queue configuration
//!
//! Loaded from (later sources win):
//! 1. Built-in defaults
//! 2. `queue.json` in the config directory
//! 3. Environment variables

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Config filename in the config directory
pub const QUEUE_CONFIG_FILE: &str = "queue.json";

const MAX_CONCURRENT_ENV: &str = "MAILTASK_MAX_CONCURRENT_LOCAL";
const DATABASE_ENV: &str = "MAILTASK_DATABASE";

/// Settings for the task queue and its local store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Upper bound on local applies running at the same time
    pub max_concurrent_local: usize,
    /// SQLite database; relative paths resolve against the data directory
    pub database_file: PathBuf,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent_local: 4,
            database_file: PathBuf::from("mail.db"),
        }
    }
}

impl QueueConfig {
    /// Load the config file (if any) and apply environment overrides
    pub fn load() -> Result<Self> {
        let base: Self = config::load_json_or_default(QUEUE_CONFIG_FILE)?;
        base.with_overrides(|key| std::env::var(key).ok())
    }

    /// Write this config to `queue.json` in the config directory
    pub fn save(&self) -> Result<PathBuf> {
        self.validate()?;
        config::save_json(QUEUE_CONFIG_FILE, self)?;
        config::config_path(QUEUE_CONFIG_FILE).context("Could not determine config directory")
    }

    /// Write this config to an explicit path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        self.validate()?;
        config::save_json_file(path, self)
    }

    /// Read a config from an explicit path, without environment overrides
    pub fn load_from(path: &Path) -> Result<Self> {
        let parsed: Self = config::load_json_file(path)?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Parse a config from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let parsed: Self = serde_json::from_str(json).context("Failed to parse queue config")?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Apply overrides looked up by environment variable name
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(value) = lookup(MAX_CONCURRENT_ENV) {
            self.max_concurrent_local = value
                .trim()
                .parse()
                .with_context(|| format!("{MAX_CONCURRENT_ENV} is not a number: {value}"))?;
        }
        if let Some(value) = lookup(DATABASE_ENV).filter(|v| !v.is_empty()) {
            self.database_file = PathBuf::from(value);
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.max_concurrent_local >= 1,
            "max_concurrent_local must be at least 1"
        );
        Ok(())
    }

    /// Resolved database location
    pub fn database_path(&self) -> Option<PathBuf> {
        if self.database_file.is_absolute() {
            Some(self.database_file.clone())
        } else {
            config::data_dir().map(|dir| dir.join(&self.database_file))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = QueueConfig::from_json(r#"{ "max_concurrent_local": 2 }"#).unwrap();
        assert_eq!(config.max_concurrent_local, 2);
        assert_eq!(config.database_file, PathBuf::from("mail.db"));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        assert!(QueueConfig::from_json(r#"{ "max_concurrent_local": 0 }"#).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            (MAX_CONCURRENT_ENV, "8"),
            (DATABASE_ENV, "/tmp/tasks.db"),
        ]);
        let config = QueueConfig::default()
            .with_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.max_concurrent_local, 8);
        assert_eq!(config.database_path(), Some(PathBuf::from("/tmp/tasks.db")));
    }

    #[test]
    fn test_bad_env_override_is_an_error() {
        let result = QueueConfig::default().with_overrides(|key| {
            (key == MAX_CONCURRENT_ENV).then(|| "lots".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_saved_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(QUEUE_CONFIG_FILE);
        let config = QueueConfig {
            max_concurrent_local: 2,
            database_file: PathBuf::from("tasks.db"),
        };

        config.save_to(&path).unwrap();
        assert_eq!(QueueConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_invalid_config_is_not_saved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(QUEUE_CONFIG_FILE);
        let config = QueueConfig {
            max_concurrent_local: 0,
            ..QueueConfig::default()
        };

        assert!(config.save_to(&path).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_relative_database_resolves_under_data_dir() {
        let config = QueueConfig::default();
        if let Some(path) = config.database_path() {
            assert!(path.ends_with("mailtask/mail.db"));
        }
    }
}
