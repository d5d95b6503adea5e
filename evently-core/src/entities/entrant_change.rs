//! Outbox of committed entrant document updates.
//!
//! A trigger on `event_entrants` copies the old and new row into
//! `event_entrant_changes` and notifies the row id, keeping the NOTIFY
//! payload small however large the entrant lists grow. The listener takes
//! each row exactly once; rows left behind while no listener was running
//! are drained at startup.

use crate::entities::EventEntrants;
use crate::entities::event_entrants::EventEntrantsRow;
use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;
use sqlx::types::Json;

/// One committed update, as captured by the trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrantChange {
    pub id: i64,
    pub before: EventEntrants,
    pub after: EventEntrants,
}

#[derive(Debug, sqlx::FromRow)]
struct EntrantChangeRow {
    id: i64,
    before: Json<EventEntrantsRow>,
    after: Json<EventEntrantsRow>,
}

impl From<EntrantChangeRow> for EntrantChange {
    fn from(row: EntrantChangeRow) -> Self {
        Self {
            id: row.id,
            before: row.before.0.into(),
            after: row.after.0.into(),
        }
    }
}

/// Remove and return one change. `None` if another listener took it first.
#[derive(Debug, Clone, Copy)]
pub struct TakeEntrantChange {
    pub id: i64,
}

impl Processor<TakeEntrantChange> for DatabaseProcessor {
    type Output = Option<EntrantChange>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:TakeEntrantChange")]
    async fn process(&self, query: TakeEntrantChange) -> Result<Option<EntrantChange>, sqlx::Error> {
        let row = sqlx::query_as::<_, EntrantChangeRow>(
            r#"
            DELETE FROM event_entrant_changes
            WHERE id = $1
            RETURNING id, before, after
            "#,
        )
        .bind(query.id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(EntrantChange::from))
    }
}

/// Ids of changes not yet taken, oldest first.
#[derive(Debug, Clone, Copy)]
pub struct ListPendingEntrantChanges;

impl Processor<ListPendingEntrantChanges> for DatabaseProcessor {
    type Output = Vec<i64>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ListPendingEntrantChanges")]
    async fn process(&self, _query: ListPendingEntrantChanges) -> Result<Vec<i64>, sqlx::Error> {
        sqlx::query_scalar::<_, i64>("SELECT id FROM event_entrant_changes ORDER BY id")
            .fetch_all(&self.pool)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evently_sdk::objects::ParticipantId;

    #[test]
    fn test_trigger_row_json_decodes() {
        // Shape produced by `to_jsonb(OLD)` for an entrant row.
        let json = r#"{
            "event_id": "0192e4a0-7b1a-7cc3-9a51-4c1f2a0b9e10",
            "enrolled_entrants": ["a@example.com", "B@Example.com"],
            "selected_entrants": ["a@example.com"],
            "accepted_entrants": [],
            "cancelled_entrants": [],
            "updated_at": "2026-10-19T09:00:00+00:00"
        }"#;
        let row: EventEntrantsRow = serde_json::from_str(json).unwrap();
        let entrants = EventEntrants::from(row);

        assert_eq!(entrants.enrolled_entrants.len(), 2);
        assert!(entrants
            .enrolled_entrants
            .contains(&ParticipantId::new("b@example.com")));
        assert_eq!(
            entrants.event_id.to_string(),
            "0192e4a0-7b1a-7cc3-9a51-4c1f2a0b9e10"
        );
    }
}
