use crate::entities::{EntrantSet, NotificationChannel, entrant_keys, entrant_set};
use crate::framework::DatabaseProcessor;
use evently_sdk::objects::EventId;
use kanau::processor::Processor;
use sqlx::{Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

/// A logged notification. Its creation triggers the push fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Also sent as the push correlation id.
    pub id: Uuid,
    pub event_id: EventId,
    pub channel: NotificationChannel,
    pub title: String,
    pub description: String,
    pub creation_time: OffsetDateTime,
    /// Participants that have already been shown this content. Stored
    /// normalized.
    pub seen_by: EntrantSet,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct NotificationRow {
    id: Uuid,
    event_id: Uuid,
    channel: NotificationChannel,
    title: String,
    description: String,
    creation_time: OffsetDateTime,
    seen_by: Vec<String>,
}

impl From<NotificationRow> for Notification {
    fn from(row: NotificationRow) -> Self {
        Self {
            id: row.id,
            event_id: EventId(row.event_id),
            channel: row.channel,
            title: row.title,
            description: row.description,
            creation_time: row.creation_time,
            seen_by: entrant_set(row.seen_by),
        }
    }
}

/// Point read of one notification.
#[derive(Debug, Clone)]
pub struct GetNotification {
    pub id: Uuid,
}

impl Processor<GetNotification> for DatabaseProcessor {
    type Output = Option<Notification>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetNotification")]
    async fn process(&self, query: GetNotification) -> Result<Option<Notification>, sqlx::Error> {
        let row = sqlx::query_as::<_, NotificationRow>(
            r#"
            SELECT id, event_id, channel, title, description, creation_time, seen_by
            FROM notifications
            WHERE id = $1
            "#,
        )
        .bind(query.id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Notification::from))
    }
}

impl Notification {
    /// First `limit` notifications of `(event_id, channel)`, oldest first.
    #[tracing::instrument(skip_all, err, name = "SQL:ListChannelNotificationsTx")]
    pub async fn list_for_channel_tx(
        tx: &mut Transaction<'_, Postgres>,
        event_id: EventId,
        channel: NotificationChannel,
        limit: i64,
    ) -> Result<Vec<Notification>, sqlx::Error> {
        let rows = sqlx::query_as::<_, NotificationRow>(
            r#"
            SELECT id, event_id, channel, title, description, creation_time, seen_by
            FROM notifications
            WHERE event_id = $1 AND channel = $2
            ORDER BY creation_time
            LIMIT $3
            "#,
        )
        .bind(event_id.as_uuid())
        .bind(channel)
        .bind(limit)
        .fetch_all(&mut **tx)
        .await?;
        Ok(rows.into_iter().map(Notification::from).collect())
    }

    #[tracing::instrument(skip_all, err, name = "SQL:InsertNotification")]
    pub async fn insert_tx(
        tx: &mut Transaction<'_, Postgres>,
        notification: &Notification,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO notifications (id, event_id, channel, title, description, creation_time, seen_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(notification.id)
        .bind(notification.event_id.as_uuid())
        .bind(notification.channel)
        .bind(&notification.title)
        .bind(&notification.description)
        .bind(notification.creation_time)
        .bind(entrant_keys(&notification.seen_by))
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}
