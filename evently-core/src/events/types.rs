//! Event type definitions.

use crate::entities::EventEntrants;
use evently_sdk::objects::EventId;
use time::OffsetDateTime;
use uuid::Uuid;

/// An entrant document was updated.
///
/// Carries both snapshots so consumers can tell which sets grew.
#[derive(Debug, Clone)]
pub struct EntrantsChanged {
    pub event_id: EventId,
    pub before: EventEntrants,
    pub after: EventEntrants,
}

/// A notification document was created.
///
/// Carries only the id; consumers re-fetch the document.
#[derive(Debug, Clone, Copy)]
pub struct NotificationCreated {
    pub notification_id: Uuid,
}

/// Ask the scheduler to sweep now instead of waiting for the next interval.
#[derive(Debug, Clone, Copy)]
pub struct SelectionSweepRequested {
    pub requested_at: OffsetDateTime,
}

impl SelectionSweepRequested {
    pub fn now() -> Self {
        Self {
            requested_at: OffsetDateTime::now_utc(),
        }
    }
}
