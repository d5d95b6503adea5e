//! Event channel factories and handles.

use super::types::{EntrantsChanged, NotificationCreated, SelectionSweepRequested};
use tokio::sync::mpsc;

/// Default buffer size for event channels.
pub const DEFAULT_CHANNEL_BUFFER: usize = 256;

/// Sender handle for EntrantsChanged events.
pub type EntrantsChangedSender = mpsc::Sender<EntrantsChanged>;
/// Receiver handle for EntrantsChanged events.
pub type EntrantsChangedReceiver = mpsc::Receiver<EntrantsChanged>;

/// Sender handle for NotificationCreated events.
pub type NotificationCreatedSender = mpsc::Sender<NotificationCreated>;
/// Receiver handle for NotificationCreated events.
pub type NotificationCreatedReceiver = mpsc::Receiver<NotificationCreated>;

/// Sender handle for manual sweep requests.
pub type SelectionSweepSender = mpsc::Sender<SelectionSweepRequested>;
/// Receiver handle for manual sweep requests.
pub type SelectionSweepReceiver = mpsc::Receiver<SelectionSweepRequested>;

/// Create a new EntrantsChanged channel.
pub fn entrants_changed_channel() -> (EntrantsChangedSender, EntrantsChangedReceiver) {
    mpsc::channel(DEFAULT_CHANNEL_BUFFER)
}

/// Create a new NotificationCreated channel.
pub fn notification_created_channel() -> (NotificationCreatedSender, NotificationCreatedReceiver) {
    mpsc::channel(DEFAULT_CHANNEL_BUFFER)
}

/// Create a new manual sweep channel.
pub fn selection_sweep_channel() -> (SelectionSweepSender, SelectionSweepReceiver) {
    mpsc::channel(DEFAULT_CHANNEL_BUFFER)
}

/// Senders for the store change feed.
///
/// Handed to whatever observes committed writes (the in-process store,
/// or the PostgreSQL listener) so it can emit trigger events.
#[derive(Clone)]
pub struct EventSenders {
    /// Sender for EntrantsChanged events
    pub entrants_changed: EntrantsChangedSender,
    /// Sender for NotificationCreated events
    pub notification_created: NotificationCreatedSender,
}

impl EventSenders {
    /// Create a new EventSenders container.
    pub fn new(
        entrants_changed: EntrantsChangedSender,
        notification_created: NotificationCreatedSender,
    ) -> Self {
        Self {
            entrants_changed,
            notification_created,
        }
    }
}
