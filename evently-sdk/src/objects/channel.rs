//! Notification audiences.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Audience selector for notifications and push messages.
///
/// This is the API/DTO version without sqlx::Type.
/// For database operations, use `NotificationChannel` in `evently-core::entities`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    /// Everyone enrolled in the event.
    All,
    /// Currently selected entrants.
    Winners,
    /// Enrolled entrants that were never selected.
    Losers,
    /// Selected entrants that declined.
    Cancelled,
}

impl Channel {
    pub const ALL: [Channel; 4] = [
        Channel::All,
        Channel::Winners,
        Channel::Losers,
        Channel::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::All => "All",
            Channel::Winners => "Winners",
            Channel::Losers => "Losers",
            Channel::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown notification channel: {0}")]
pub struct ParseChannelError(pub String);

impl FromStr for Channel {
    type Err = ParseChannelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Channel::ALL
            .into_iter()
            .find(|channel| channel.as_str() == s)
            .ok_or_else(|| ParseChannelError(s.to_string()))
    }
}
