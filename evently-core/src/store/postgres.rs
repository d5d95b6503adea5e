//! PostgreSQL-backed document store.
//!
//! Optimistic concurrency comes from SERIALIZABLE isolation: two transactions
//! that read and write the same entrant row (or race on the same
//! `(event_id, channel)` existence query) cannot both commit. The loser gets
//! a serialization failure and its body is run again from scratch.

use crate::entities::event::{GetEvent, ListEventsAwaitingSelection};
use crate::entities::event_entrants::GetEventEntrants;
use crate::entities::notification::GetNotification;
use crate::entities::push_token::GetPushToken;
use crate::entities::{
    EntrantSet, Event, EventEntrants, Notification, NotificationChannel, PushToken,
    SelectionProjection,
};
use crate::framework::DatabaseProcessor;
use crate::store::{
    DEFAULT_TRANSACTION_ATTEMPTS, DocumentStore, StoreError, TransactionOutcome, TxDecision,
};
use async_trait::async_trait;
use evently_sdk::objects::{EventId, ParticipantId};
use kanau::processor::Processor;
use sqlx::{PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use tracing::{debug, warn};
use uuid::Uuid;

const EVENT_ENTRANTS_COLLECTION: &str = "event_entrants";

/// Document store over the tables created by `migrations/`.
#[derive(Clone)]
pub struct PgDocumentStore {
    db: DatabaseProcessor,
    max_attempts: u32,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            db: DatabaseProcessor::new(pool),
            max_attempts: DEFAULT_TRANSACTION_ATTEMPTS,
        }
    }

    /// Set how many conflicting attempts a transaction makes before giving up.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.db.pool
    }

    async fn begin_serializable(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        let mut tx = self.db.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }

    async fn try_selection(
        &self,
        event_id: EventId,
        body: &mut (dyn for<'a> FnMut(&'a SelectionProjection) -> TxDecision<EntrantSet> + Send),
    ) -> Result<TransactionOutcome, StoreError> {
        let mut tx = self.begin_serializable().await?;

        let Some(projection) = EventEntrants::select_projection_tx(&mut tx, event_id).await? else {
            return Err(StoreError::NotFound {
                collection: EVENT_ENTRANTS_COLLECTION,
                key: event_id.to_string(),
            });
        };

        match body(&projection) {
            TxDecision::Abort => {
                tx.rollback().await?;
                Ok(TransactionOutcome::AbortedBenign)
            }
            TxDecision::Commit(selected) => {
                EventEntrants::update_selected_tx(&mut tx, event_id, &selected).await?;
                tx.commit().await?;
                Ok(TransactionOutcome::Committed)
            }
        }
    }

    async fn try_notification(
        &self,
        event_id: EventId,
        channel: NotificationChannel,
        body: &mut (dyn for<'a> FnMut(&'a [Notification]) -> TxDecision<Notification> + Send),
    ) -> Result<TransactionOutcome, StoreError> {
        let mut tx = self.begin_serializable().await?;

        let existing = Notification::list_for_channel_tx(&mut tx, event_id, channel, 1).await?;

        match body(existing.as_slice()) {
            TxDecision::Abort => {
                tx.rollback().await?;
                Ok(TransactionOutcome::AbortedBenign)
            }
            TxDecision::Commit(notification) => {
                Notification::insert_tx(&mut tx, &notification).await?;
                tx.commit().await?;
                Ok(TransactionOutcome::Committed)
            }
        }
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn event(&self, event_id: EventId) -> Result<Option<Event>, StoreError> {
        Ok(self.db.process(GetEvent { event_id }).await?)
    }

    async fn event_entrants(&self, event_id: EventId) -> Result<Option<EventEntrants>, StoreError> {
        Ok(self.db.process(GetEventEntrants { event_id }).await?)
    }

    async fn events_awaiting_selection(
        &self,
        now: OffsetDateTime,
    ) -> Result<Vec<Event>, StoreError> {
        Ok(self.db.process(ListEventsAwaitingSelection { now }).await?)
    }

    async fn notification(&self, id: Uuid) -> Result<Option<Notification>, StoreError> {
        Ok(self.db.process(GetNotification { id }).await?)
    }

    async fn push_token(&self, participant: &ParticipantId) -> Result<Option<PushToken>, StoreError> {
        Ok(self
            .db
            .process(GetPushToken {
                participant_id: participant.clone(),
            })
            .await?)
    }

    async fn transact_selection(
        &self,
        event_id: EventId,
        body: &mut (dyn for<'a> FnMut(&'a SelectionProjection) -> TxDecision<EntrantSet> + Send),
    ) -> TransactionOutcome {
        for attempt in 1..=self.max_attempts {
            match self.try_selection(event_id, &mut *body).await {
                Ok(outcome) => return outcome,
                Err(e) if e.is_retryable() => {
                    debug!(%event_id, attempt, error = %e, "Selection transaction conflicted, retrying");
                }
                Err(e) => return TransactionOutcome::Failed(e),
            }
        }

        warn!(%event_id, attempts = self.max_attempts, "Selection transaction retries exhausted");
        TransactionOutcome::Failed(StoreError::RetryExhausted {
            attempts: self.max_attempts,
        })
    }

    async fn transact_notification(
        &self,
        event_id: EventId,
        channel: NotificationChannel,
        body: &mut (dyn for<'a> FnMut(&'a [Notification]) -> TxDecision<Notification> + Send),
    ) -> TransactionOutcome {
        for attempt in 1..=self.max_attempts {
            match self.try_notification(event_id, channel, &mut *body).await {
                Ok(outcome) => return outcome,
                Err(e) if e.is_retryable() => {
                    debug!(%event_id, %channel, attempt, error = %e, "Notification transaction conflicted, retrying");
                }
                Err(e) => return TransactionOutcome::Failed(e),
            }
        }

        warn!(%event_id, %channel, attempts = self.max_attempts, "Notification transaction retries exhausted");
        TransactionOutcome::Failed(StoreError::RetryExhausted {
            attempts: self.max_attempts,
        })
    }
}
