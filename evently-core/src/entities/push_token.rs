use crate::framework::DatabaseProcessor;
use evently_sdk::objects::ParticipantId;
use kanau::processor::Processor;
use time::OffsetDateTime;

/// The device registration token of one participant. Last write wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushToken {
    pub participant_id: ParticipantId,
    pub token: String,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct PushTokenRow {
    participant_id: String,
    token: String,
    created_at: OffsetDateTime,
}

/// Point read of one participant's token.
#[derive(Debug, Clone)]
pub struct GetPushToken {
    pub participant_id: ParticipantId,
}

impl Processor<GetPushToken> for DatabaseProcessor {
    type Output = Option<PushToken>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetPushToken")]
    async fn process(&self, query: GetPushToken) -> Result<Option<PushToken>, sqlx::Error> {
        let row = sqlx::query_as::<_, PushTokenRow>(
            r#"
            SELECT participant_id, token, created_at
            FROM push_tokens
            WHERE participant_id = $1
            "#,
        )
        .bind(query.participant_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|row| PushToken {
            participant_id: ParticipantId::new(row.participant_id),
            token: row.token,
            created_at: row.created_at,
        }))
    }
}
