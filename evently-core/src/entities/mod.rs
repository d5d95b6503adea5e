pub mod entrant_change;
pub mod event;
pub mod event_entrants;
pub mod notification;
pub mod push_token;

pub use entrant_change::EntrantChange;
pub use event::{Event, EventStatus};
pub use event_entrants::{EventEntrants, SelectionProjection};
pub use notification::Notification;
pub use push_token::PushToken;

use evently_sdk::objects::{Channel as SdkChannel, ParticipantId};
use std::collections::BTreeSet;

/// A set of participants. Ordered so that stored arrays and logs are stable.
pub type EntrantSet = BTreeSet<ParticipantId>;

/// Notification channel for database operations.
///
/// This is the sqlx::Type version. For API/DTO use, see `evently_sdk::objects::Channel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(type_name = "notification_channel")]
pub enum NotificationChannel {
    All,
    Winners,
    Losers,
    Cancelled,
}

impl From<NotificationChannel> for SdkChannel {
    fn from(value: NotificationChannel) -> Self {
        match value {
            NotificationChannel::All => SdkChannel::All,
            NotificationChannel::Winners => SdkChannel::Winners,
            NotificationChannel::Losers => SdkChannel::Losers,
            NotificationChannel::Cancelled => SdkChannel::Cancelled,
        }
    }
}

impl From<SdkChannel> for NotificationChannel {
    fn from(value: SdkChannel) -> Self {
        match value {
            SdkChannel::All => NotificationChannel::All,
            SdkChannel::Winners => NotificationChannel::Winners,
            SdkChannel::Losers => NotificationChannel::Losers,
            SdkChannel::Cancelled => NotificationChannel::Cancelled,
        }
    }
}

impl std::fmt::Display for NotificationChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        SdkChannel::from(*self).fmt(f)
    }
}

/// Convert a stored text array into a participant set.
pub(crate) fn entrant_set(raw: Vec<String>) -> EntrantSet {
    raw.into_iter().map(ParticipantId::new).collect()
}

/// Convert a participant set into a text array for storage, keeping each
/// address as written.
pub(crate) fn entrant_array(set: &EntrantSet) -> Vec<String> {
    set.iter().map(|p| p.as_str().to_string()).collect()
}

/// Normalized addresses, as stored in `seen_by`.
pub(crate) fn entrant_keys(set: &EntrantSet) -> Vec<String> {
    set.iter().map(|p| p.key().to_string()).collect()
}
