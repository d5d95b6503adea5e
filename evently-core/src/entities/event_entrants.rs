use crate::entities::{EntrantSet, entrant_array, entrant_set};
use crate::framework::DatabaseProcessor;
use evently_sdk::objects::{Channel, EventId};
use kanau::processor::Processor;
use serde::{Deserialize, Serialize};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

/// Entrant lists for one event, keyed by the event id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEntrants {
    pub event_id: EventId,
    pub enrolled_entrants: EntrantSet,
    /// Intended subset of `enrolled_entrants`, at most `selection_limit` long.
    pub selected_entrants: EntrantSet,
    /// Subset of `selected_entrants`. Never written here.
    pub accepted_entrants: EntrantSet,
    /// Only ever grows.
    pub cancelled_entrants: EntrantSet,
}

/// The three fields a selection transaction reads.
///
/// `accepted_entrants` is left out so that accepting an invitation does not
/// conflict with a concurrent redraw.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionProjection {
    pub enrolled: EntrantSet,
    pub selected: EntrantSet,
    pub cancelled: EntrantSet,
}

impl SelectionProjection {
    /// `selected - cancelled`
    pub fn eligible_winners(&self) -> EntrantSet {
        self.selected.difference(&self.cancelled).cloned().collect()
    }

    /// `enrolled - (selected ∪ cancelled)`: nobody who ever won is drawn again.
    pub fn eligible_pool(&self) -> EntrantSet {
        self.enrolled
            .iter()
            .filter(|p| !self.selected.contains(*p) && !self.cancelled.contains(*p))
            .cloned()
            .collect()
    }
}

impl EventEntrants {
    pub fn new(event_id: EventId) -> Self {
        Self {
            event_id,
            enrolled_entrants: EntrantSet::new(),
            selected_entrants: EntrantSet::new(),
            accepted_entrants: EntrantSet::new(),
            cancelled_entrants: EntrantSet::new(),
        }
    }

    pub fn projection(&self) -> SelectionProjection {
        SelectionProjection {
            enrolled: self.enrolled_entrants.clone(),
            selected: self.selected_entrants.clone(),
            cancelled: self.cancelled_entrants.clone(),
        }
    }

    /// Entrants cancelled in `self` but not in `before`.
    ///
    /// A shrinking cancelled set yields an empty difference rather than an error.
    pub fn cancelled_since(&self, before: &EventEntrants) -> EntrantSet {
        self.cancelled_entrants
            .difference(&before.cancelled_entrants)
            .cloned()
            .collect()
    }

    /// Entrants selected in `self` but not in `before`.
    pub fn selected_since(&self, before: &EventEntrants) -> EntrantSet {
        self.selected_entrants
            .difference(&before.selected_entrants)
            .cloned()
            .collect()
    }

    /// Resolve the audience of a channel.
    pub fn recipients(&self, channel: Channel) -> EntrantSet {
        match channel {
            Channel::All => self.enrolled_entrants.clone(),
            Channel::Winners => self.selected_entrants.clone(),
            // Cancelled entrants were winners at one point, not losers.
            Channel::Losers => self.projection().eligible_pool(),
            Channel::Cancelled => self.cancelled_entrants.clone(),
        }
    }
}

/// Row shape shared by `SELECT *` and the `row_to_json` change-feed payload.
#[derive(Debug, Clone, sqlx::FromRow, Deserialize)]
pub(crate) struct EventEntrantsRow {
    pub event_id: Uuid,
    pub enrolled_entrants: Vec<String>,
    pub selected_entrants: Vec<String>,
    pub accepted_entrants: Vec<String>,
    pub cancelled_entrants: Vec<String>,
}

impl From<EventEntrantsRow> for EventEntrants {
    fn from(row: EventEntrantsRow) -> Self {
        Self {
            event_id: EventId(row.event_id),
            enrolled_entrants: entrant_set(row.enrolled_entrants),
            selected_entrants: entrant_set(row.selected_entrants),
            accepted_entrants: entrant_set(row.accepted_entrants),
            cancelled_entrants: entrant_set(row.cancelled_entrants),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct SelectionProjectionRow {
    enrolled_entrants: Vec<String>,
    selected_entrants: Vec<String>,
    cancelled_entrants: Vec<String>,
}

/// Point read of one entrant document.
#[derive(Debug, Clone)]
pub struct GetEventEntrants {
    pub event_id: EventId,
}

impl Processor<GetEventEntrants> for DatabaseProcessor {
    type Output = Option<EventEntrants>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetEventEntrants")]
    async fn process(&self, query: GetEventEntrants) -> Result<Option<EventEntrants>, sqlx::Error> {
        let row = sqlx::query_as::<_, EventEntrantsRow>(
            r#"
            SELECT event_id, enrolled_entrants, selected_entrants, accepted_entrants, cancelled_entrants
            FROM event_entrants
            WHERE event_id = $1
            "#,
        )
        .bind(query.event_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(EventEntrants::from))
    }
}

impl EventEntrants {
    /// Read only the selection projection inside a transaction.
    #[tracing::instrument(skip_all, err, name = "SQL:SelectSelectionProjection")]
    pub async fn select_projection_tx(
        tx: &mut Transaction<'_, Postgres>,
        event_id: EventId,
    ) -> Result<Option<SelectionProjection>, sqlx::Error> {
        let row = sqlx::query_as::<_, SelectionProjectionRow>(
            r#"
            SELECT enrolled_entrants, selected_entrants, cancelled_entrants
            FROM event_entrants
            WHERE event_id = $1
            "#,
        )
        .bind(event_id.as_uuid())
        .fetch_optional(&mut **tx)
        .await?;
        Ok(row.map(|row| SelectionProjection {
            enrolled: entrant_set(row.enrolled_entrants),
            selected: entrant_set(row.selected_entrants),
            cancelled: entrant_set(row.cancelled_entrants),
        }))
    }

    /// Overwrite `selected_entrants` inside a transaction.
    #[tracing::instrument(skip_all, err, name = "SQL:UpdateSelectedEntrants")]
    pub async fn update_selected_tx(
        tx: &mut Transaction<'_, Postgres>,
        event_id: EventId,
        selected: &EntrantSet,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE event_entrants
            SET selected_entrants = $2
            WHERE event_id = $1
            "#,
        )
        .bind(event_id.as_uuid())
        .bind(entrant_array(selected))
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evently_sdk::objects::ParticipantId;

    fn set(ids: &[&str]) -> EntrantSet {
        ids.iter().map(|id| ParticipantId::new(id)).collect()
    }

    fn entrants() -> EventEntrants {
        EventEntrants {
            event_id: EventId::new(),
            enrolled_entrants: set(&["a", "b", "c", "d", "e"]),
            selected_entrants: set(&["a", "c"]),
            accepted_entrants: set(&["a"]),
            cancelled_entrants: set(&["b"]),
        }
    }

    #[test]
    fn test_channel_recipients() {
        let e = entrants();
        assert_eq!(e.recipients(Channel::All), set(&["a", "b", "c", "d", "e"]));
        assert_eq!(e.recipients(Channel::Winners), set(&["a", "c"]));
        assert_eq!(e.recipients(Channel::Losers), set(&["d", "e"]));
        assert_eq!(e.recipients(Channel::Cancelled), set(&["b"]));
    }

    #[test]
    fn test_losers_exclude_every_past_winner() {
        let e = entrants();
        let losers = e.recipients(Channel::Losers);
        assert!(losers.is_disjoint(&e.selected_entrants));
        assert!(losers.is_disjoint(&e.cancelled_entrants));
        assert!(losers.is_subset(&e.enrolled_entrants));
    }

    #[test]
    fn test_projection_arithmetic() {
        let projection = SelectionProjection {
            enrolled: set(&["a", "b", "c", "d", "e"]),
            selected: set(&["a", "b"]),
            cancelled: set(&["b"]),
        };
        assert_eq!(projection.eligible_winners(), set(&["a"]));
        assert_eq!(projection.eligible_pool(), set(&["c", "d", "e"]));
    }

    #[test]
    fn test_diffs_between_snapshots() {
        let before = entrants();
        let mut after = before.clone();
        after.cancelled_entrants.insert(ParticipantId::new("c"));
        after.selected_entrants.insert(ParticipantId::new("d"));

        assert_eq!(after.cancelled_since(&before), set(&["c"]));
        assert_eq!(after.selected_since(&before), set(&["d"]));
        // Shrinking sets are "nothing new", not an error.
        assert!(before.cancelled_since(&after).is_empty());
    }

    #[test]
    fn test_document_field_names() {
        let json = serde_json::to_value(entrants()).unwrap();
        for field in [
            "eventId",
            "enrolledEntrants",
            "selectedEntrants",
            "acceptedEntrants",
            "cancelledEntrants",
        ] {
            assert!(json.get(field).is_some(), "missing {field}");
        }
    }
}
