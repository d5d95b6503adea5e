//! Event system for the change-driven pipeline.
//!
//! # Event Flow
//!
//! 1. The store commits an entrant-document update -> `EntrantsChanged` -> `EventChangeRouter`
//! 2. `EventChangeRouter` runs `RedrawCoordinator` and/or `NotificationDispatcher`
//! 3. A notification insert -> `NotificationCreated` -> `PushFanout`
//! 4. A timer or manual trigger -> `SelectionSweepRequested` -> `SelectionScheduler`
//!
//! Delivery is at-least-once; every consumer is idempotent.

pub mod channels;
pub mod types;

pub use channels::{
    DEFAULT_CHANNEL_BUFFER, EntrantsChangedReceiver, EntrantsChangedSender, EventSenders,
    NotificationCreatedReceiver, NotificationCreatedSender, SelectionSweepReceiver,
    SelectionSweepSender, entrants_changed_channel, notification_created_channel,
    selection_sweep_channel,
};

pub use types::{EntrantsChanged, NotificationCreated, SelectionSweepRequested};
