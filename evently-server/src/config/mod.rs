//! Configuration module for evently-server.
//!
//! Handles loading configuration from TOML files, CLI arguments,
//! and environment variables.

pub mod file;

use crate::config::file::FileConfig;
use evently_core::config::{NotificationTemplates, PushConfig, SchedulerConfig};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("DATABASE_URL environment variable not set")]
    MissingDatabaseUrl,

    #[error("PUSH_ACCESS_TOKEN environment variable not set")]
    MissingPushAccessToken,
}

/// Server settings that only take effect on restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub listen: SocketAddr,
}

/// Pool and transaction settings. Restart required.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub max_connections: u32,
    pub transaction_attempts: u32,
    pub outbox_drain_interval: Duration,
}

/// Loaded configuration result containing all parts.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub push: PushConfig,
    /// Reloadable.
    pub scheduler: SchedulerConfig,
    /// Reloadable.
    pub templates: NotificationTemplates,
}

/// Configuration loader that handles the complete loading process.
pub struct ConfigLoader {
    config_path: PathBuf,
    listen_override: Option<SocketAddr>,
}

impl ConfigLoader {
    /// Create a new config loader.
    pub fn new(config_path: impl AsRef<Path>, listen_override: Option<SocketAddr>) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            listen_override,
        }
    }

    /// Load and process the configuration.
    ///
    /// This will:
    /// 1. Read the TOML file
    /// 2. Apply CLI overrides
    /// 3. Validate the configuration
    /// 4. Read the push access token from the environment
    pub fn load(&self) -> Result<LoadedConfig, ConfigError> {
        let config_content = std::fs::read_to_string(&self.config_path)?;
        let mut file_config: FileConfig = toml::from_str(&config_content)?;

        if let Some(listen) = self.listen_override {
            file_config.server.listen = listen;
        }

        validate(&file_config)?;
        Ok(build_loaded_config(file_config, get_push_access_token()?))
    }

    /// Reload the configuration (used during SIGHUP).
    pub fn reload(&self) -> Result<LoadedConfig, ConfigError> {
        self.load()
    }
}

fn validate(config: &FileConfig) -> Result<(), ConfigError> {
    if config.scheduler.interval_secs == 0 {
        return Err(ConfigError::ValidationError(
            "scheduler.interval_secs must be at least 1".to_string(),
        ));
    }
    if config.store.transaction_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "store.transaction_attempts must be at least 1".to_string(),
        ));
    }
    if config.store.max_connections == 0 {
        return Err(ConfigError::ValidationError(
            "store.max_connections must be at least 1".to_string(),
        ));
    }
    if config.store.outbox_drain_secs == 0 {
        return Err(ConfigError::ValidationError(
            "store.outbox_drain_secs must be at least 1".to_string(),
        ));
    }
    if config
        .notifications
        .winners_title
        .as_deref()
        .is_some_and(|title| title.trim().is_empty())
    {
        return Err(ConfigError::ValidationError(
            "notifications.winners_title must not be empty".to_string(),
        ));
    }
    if !matches!(config.push.endpoint.scheme(), "http" | "https") {
        return Err(ConfigError::ValidationError(format!(
            "push.endpoint must be an http(s) URL, got {}",
            config.push.endpoint
        )));
    }
    Ok(())
}

fn build_loaded_config(file_config: FileConfig, push_access_token: String) -> LoadedConfig {
    let defaults = NotificationTemplates::default();
    LoadedConfig {
        server: ServerConfig {
            listen: file_config.server.listen,
        },
        store: StoreConfig {
            max_connections: file_config.store.max_connections,
            transaction_attempts: file_config.store.transaction_attempts,
            outbox_drain_interval: Duration::from_secs(file_config.store.outbox_drain_secs),
        },
        push: PushConfig {
            endpoint: file_config.push.endpoint,
            access_token: push_access_token,
            request_timeout: Duration::from_secs(file_config.push.timeout_secs),
        },
        scheduler: SchedulerConfig {
            interval: Duration::from_secs(file_config.scheduler.interval_secs),
            sweep_on_start: file_config.scheduler.sweep_on_start,
        },
        templates: NotificationTemplates {
            winners_title: file_config
                .notifications
                .winners_title
                .unwrap_or(defaults.winners_title),
            winners_description: file_config
                .notifications
                .winners_description
                .unwrap_or(defaults.winners_description),
        },
    }
}

/// Get the database URL from the environment.
pub fn get_database_url() -> Result<String, ConfigError> {
    std::env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)
}

/// Get the push transport's bearer token from the environment.
pub fn get_push_access_token() -> Result<String, ConfigError> {
    std::env::var("PUSH_ACCESS_TOKEN").map_err(|_| ConfigError::MissingPushAccessToken)
}
