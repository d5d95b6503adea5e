//! Runtime configuration types.
//!
//! These are the validated values the processors consume. Loading and
//! parsing the TOML file is handled by the server crate.

mod config_store;

pub use config_store::{ConfigStore, ConfigWatcher};

use std::time::Duration;
use url::Url;

/// Timing of the periodic initial-draw sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Time between sweeps. Daily by default.
    pub interval: Duration,
    /// Sweep once immediately on startup instead of waiting a full interval.
    pub sweep_on_start: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(24 * 60 * 60),
            sweep_on_start: true,
        }
    }
}

/// Text of the notification created for each selection episode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationTemplates {
    pub winners_title: String,
    pub winners_description: String,
}

impl Default for NotificationTemplates {
    fn default() -> Self {
        Self {
            winners_title: "You've been selected!".to_string(),
            winners_description:
                "You were drawn in the lottery. Open the app to accept or decline your spot."
                    .to_string(),
        }
    }
}

/// Where and how push messages are sent.
#[derive(Debug, Clone)]
pub struct PushConfig {
    /// FCM HTTP v1 send endpoint, e.g.
    /// `https://fcm.googleapis.com/v1/projects/<project>/messages:send`.
    pub endpoint: Url,
    /// OAuth bearer token for the endpoint.
    pub access_token: String,
    pub request_timeout: Duration,
}
