//! TOML file configuration structures.
//!
//! These structs directly map to the `evently-config.toml` file format.
//! Every section except `[push]` may be omitted.

use serde::Deserialize;
use std::net::{Ipv4Addr, SocketAddr};
use url::Url;

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    pub push: PushConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
}

/// Server configuration section.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// The address and port to listen on (e.g., "0.0.0.0:8080").
    #[serde(default = "default_listen_addr")]
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080))
}

/// Initial-draw sweep timing.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_true")]
    pub sweep_on_start: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            sweep_on_start: true,
        }
    }
}

fn default_interval_secs() -> u64 {
    24 * 60 * 60
}

fn default_true() -> bool {
    true
}

/// Database pool and transaction settings.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Attempts per transaction before a conflict is reported as a failure.
    #[serde(default = "default_transaction_attempts")]
    pub transaction_attempts: u32,
    /// Seconds between sweeps of the entrant change outbox.
    #[serde(default = "default_outbox_drain_secs")]
    pub outbox_drain_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            transaction_attempts: default_transaction_attempts(),
            outbox_drain_secs: default_outbox_drain_secs(),
        }
    }
}

fn default_max_connections() -> u32 {
    10
}

fn default_transaction_attempts() -> u32 {
    evently_core::store::DEFAULT_TRANSACTION_ATTEMPTS
}

fn default_outbox_drain_secs() -> u64 {
    60
}

/// Push transport. The access token comes from `PUSH_ACCESS_TOKEN`.
#[derive(Debug, Clone, Deserialize)]
pub struct PushConfig {
    /// FCM HTTP v1 send endpoint.
    pub endpoint: Url,
    #[serde(default = "default_push_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_push_timeout_secs() -> u64 {
    30
}

/// Text of the winners notification. Falls back to built-in wording.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationsConfig {
    pub winners_title: Option<String>,
    pub winners_description: Option<String>,
}
