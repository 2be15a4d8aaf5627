//! Configuration management for crm-notify.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "crm-notify";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "store.db";

/// Placeholder in [`RelayConfig::detail_path`] replaced by the entity id.
pub const ID_PLACEHOLDER: &str = "{id}";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `CRM_NOTIFY_`, sections split on `__`)
/// 2. TOML config file at `~/.config/crm-notify/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Relay configuration.
    pub relay: RelayConfig,
    /// Notification log configuration.
    pub notifications: NotificationsConfig,
}

/// Storage-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the store database file.
    /// Defaults to `~/.local/share/crm-notify/store.db`
    pub database_path: Option<PathBuf>,
    /// Maximum bytes held by keys and values together.
    /// Set to 0 for unlimited.
    pub quota_bytes: u64,
    /// Maximum number of change records kept for the change feed.
    /// Set to 0 for unlimited.
    pub max_changes: usize,
    /// How long a writer waits on a locked database, in milliseconds.
    pub busy_timeout_ms: u64,
}

/// Relay-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Store key carrying the pending "entity added" event.
    pub key: String,
    /// Detail view path template; `{id}` is replaced by the entity id.
    pub detail_path: String,
    /// Label used when an announcement carries no display name.
    pub fallback_label: String,
    /// Label of the acknowledgment's navigation action.
    pub action_label: String,
    /// Interval between change feed polls in milliseconds.
    pub poll_interval_ms: u64,
}

/// Notification log configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    /// Store key holding the notification log.
    pub key: String,
    /// Maximum entries kept, oldest dropped first.
    /// Set to 0 for unlimited.
    pub max_entries: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: None, // Will be resolved to default at runtime
            quota_bytes: 5 * 1024 * 1024,
            max_changes: 10_000,
            busy_timeout_ms: 5_000,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            key: "entityAdded".to_string(),
            detail_path: "/customers/{id}".to_string(),
            fallback_label: "New customer".to_string(),
            action_label: "View".to_string(),
            poll_interval_ms: 250,
        }
    }
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            key: "notifications".to_string(),
            max_entries: 0,
        }
    }
}

impl RelayConfig {
    /// Build the detail view path for an entity.
    #[must_use]
    pub fn detail_path_for(&self, entity_id: &str) -> String {
        self.detail_path.replace(ID_PLACEHOLDER, entity_id)
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed("CRM_NOTIFY_").split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.relay.key.is_empty() {
            return Err(Error::config_validation("relay.key must not be empty"));
        }

        if self.notifications.key.is_empty() {
            return Err(Error::config_validation(
                "notifications.key must not be empty",
            ));
        }

        if self.relay.key == self.notifications.key {
            return Err(Error::config_validation(format!(
                "relay.key and notifications.key must differ (both are '{}')",
                self.relay.key
            )));
        }

        if !self.relay.detail_path.contains(ID_PLACEHOLDER) {
            return Err(Error::config_validation(format!(
                "relay.detail_path must contain {ID_PLACEHOLDER}: {}",
                self.relay.detail_path
            )));
        }

        if self.relay.fallback_label.trim().is_empty() {
            return Err(Error::config_validation(
                "relay.fallback_label must not be empty",
            ));
        }

        if self.relay.poll_interval_ms == 0 {
            return Err(Error::config_validation(
                "relay.poll_interval_ms must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Get the storage quota, `None` when unlimited.
    #[must_use]
    pub fn quota(&self) -> Option<u64> {
        (self.storage.quota_bytes > 0).then_some(self.storage.quota_bytes)
    }

    /// Get the busy timeout as a Duration.
    #[must_use]
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.storage.busy_timeout_ms)
    }

    /// Get the change feed poll interval as a Duration.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.relay.poll_interval_ms)
    }
}
