use crate::framework::DatabaseProcessor;
use evently_sdk::objects::EventId;
use kanau::processor::Processor;
use time::OffsetDateTime;
use uuid::Uuid;

/// The lottery-relevant view of an event. Read, never written, by this crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub id: EventId,
    /// Enrollment closes and the initial draw happens after this instant.
    pub selection_time: OffsetDateTime,
    /// When the event itself takes place. No re-selection happens afterwards.
    pub event_time: Option<OffsetDateTime>,
    /// Capacity: the number of entrants that may be selected.
    pub selection_limit: u32,
}

/// Enrollment status derived from the clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventStatus {
    /// Waitlist still open: now < selection_time.
    Open,
    /// Waitlist closed: now >= selection_time.
    Closed,
}

impl Event {
    pub fn status(&self, now: OffsetDateTime) -> EventStatus {
        if now < self.selection_time {
            EventStatus::Open
        } else {
            EventStatus::Closed
        }
    }

    pub fn has_started(&self, now: OffsetDateTime) -> bool {
        self.event_time.is_some_and(|t| now >= t)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct EventRow {
    pub id: Uuid,
    pub selection_time: OffsetDateTime,
    pub event_time: Option<OffsetDateTime>,
    pub selection_limit: i32,
}

impl TryFrom<EventRow> for Event {
    type Error = sqlx::Error;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let selection_limit = u32::try_from(row.selection_limit).map_err(|_| {
            sqlx::Error::Decode(
                format!(
                    "event {} has negative selection_limit {}",
                    row.id, row.selection_limit
                )
                .into(),
            )
        })?;
        Ok(Event {
            id: EventId(row.id),
            selection_time: row.selection_time,
            event_time: row.event_time,
            selection_limit,
        })
    }
}

/// Point read of one event.
#[derive(Debug, Clone)]
pub struct GetEvent {
    pub event_id: EventId,
}

impl Processor<GetEvent> for DatabaseProcessor {
    type Output = Option<Event>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetEvent")]
    async fn process(&self, query: GetEvent) -> Result<Option<Event>, sqlx::Error> {
        let row = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT id, selection_time, event_time, selection_limit
            FROM events
            WHERE id = $1
            "#,
        )
        .bind(query.event_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Event::try_from).transpose()
    }
}

/// Events whose selection time has passed, that still have no winners
/// and have at least one enrolled entrant.
#[derive(Debug, Clone)]
pub struct ListEventsAwaitingSelection {
    pub now: OffsetDateTime,
}

impl Processor<ListEventsAwaitingSelection> for DatabaseProcessor {
    type Output = Vec<Event>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ListEventsAwaitingSelection")]
    async fn process(&self, query: ListEventsAwaitingSelection) -> Result<Vec<Event>, sqlx::Error> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT e.id, e.selection_time, e.event_time, e.selection_limit
            FROM events e
            JOIN event_entrants ee ON ee.event_id = e.id
            WHERE e.selection_time <= $1
              AND cardinality(ee.selected_entrants) = 0
              AND cardinality(ee.enrolled_entrants) > 0
            ORDER BY e.selection_time
            "#,
        )
        .bind(query.now)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Event::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn event_at(selection_time: OffsetDateTime, event_time: Option<OffsetDateTime>) -> Event {
        Event {
            id: EventId::new(),
            selection_time,
            event_time,
            selection_limit: 2,
        }
    }

    #[test]
    fn test_status_flips_at_selection_time() {
        let now = OffsetDateTime::now_utc();
        assert_eq!(
            event_at(now + Duration::hours(1), None).status(now),
            EventStatus::Open
        );
        assert_eq!(event_at(now, None).status(now), EventStatus::Closed);
    }

    #[test]
    fn test_has_started() {
        let now = OffsetDateTime::now_utc();
        assert!(!event_at(now, None).has_started(now));
        assert!(!event_at(now, Some(now + Duration::days(1))).has_started(now));
        assert!(event_at(now, Some(now - Duration::minutes(1))).has_started(now));
    }

    #[test]
    fn test_negative_limit_rejected() {
        let row = EventRow {
            id: Uuid::now_v7(),
            selection_time: OffsetDateTime::now_utc(),
            event_time: None,
            selection_limit: -1,
        };
        assert!(Event::try_from(row).is_err());
    }
}
