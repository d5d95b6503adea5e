//! NotificationDispatcher processor.
//!
//! Creates the Winners notification for an event the first time its
//! selected set grows. A notification already existing on the Winners
//! channel means this episode has been handled; later growths (redraws)
//! reach the newly drawn entrants through the same notification, since
//! their client reads the channel rather than a per-user copy.
//!
//! The existence check and the insert run in one store transaction, so two
//! dispatches racing for the same event produce exactly one notification.

use crate::config::{ConfigStore, NotificationTemplates};
use crate::entities::{EntrantSet, Notification, NotificationChannel};
use crate::store::{DocumentStore, StoreError, TransactionOutcome, TxDecision};
use evently_sdk::objects::EventId;
use kanau::processor::Processor;
use std::sync::Arc;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{error, info};
use uuid::Uuid;

/// Announce the winners of `event_id`.
#[derive(Debug, Clone)]
pub struct WinnersNotificationRequest {
    pub event_id: EventId,
    /// The selected set before the growth. These entrants already heard
    /// about their selection and are recorded as having seen it.
    pub previous_selected: EntrantSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Created { notification_id: Uuid },
    AlreadyNotified,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl DispatchError {
    /// Whether dispatching again later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            DispatchError::Store(e) => e.is_transient(),
        }
    }
}

pub struct NotificationDispatcher<S> {
    store: Arc<S>,
    templates: ConfigStore<NotificationTemplates>,
}

impl<S: DocumentStore> NotificationDispatcher<S> {
    pub fn new(store: Arc<S>, templates: ConfigStore<NotificationTemplates>) -> Self {
        Self { store, templates }
    }

    pub async fn dispatch_winners(
        &self,
        request: WinnersNotificationRequest,
    ) -> Result<DispatchOutcome, DispatchError> {
        let WinnersNotificationRequest {
            event_id,
            previous_selected,
        } = request;
        let templates = self.templates.snapshot();

        let notification = Notification {
            id: Uuid::now_v7(),
            event_id,
            channel: NotificationChannel::Winners,
            title: templates.winners_title.clone(),
            description: templates.winners_description.clone(),
            creation_time: OffsetDateTime::now_utc(),
            seen_by: previous_selected,
        };
        let notification_id = notification.id;

        let mut body = |existing: &[Notification]| {
            if existing.is_empty() {
                TxDecision::Commit(notification.clone())
            } else {
                TxDecision::Abort
            }
        };

        match self
            .store
            .transact_notification(event_id, NotificationChannel::Winners, &mut body)
            .await
        {
            TransactionOutcome::Committed => {
                info!(%event_id, %notification_id, "Created winners notification");
                Ok(DispatchOutcome::Created { notification_id })
            }
            TransactionOutcome::AbortedBenign => {
                info!(%event_id, "Winners already notified for this event");
                Ok(DispatchOutcome::AlreadyNotified)
            }
            TransactionOutcome::Failed(e) => {
                error!(%event_id, error = %e, "Winners notification transaction failed");
                Err(e.into())
            }
        }
    }
}

impl<S: DocumentStore> Processor<WinnersNotificationRequest> for NotificationDispatcher<S> {
    type Output = DispatchOutcome;
    type Error = DispatchError;

    async fn process(
        &self,
        request: WinnersNotificationRequest,
    ) -> Result<DispatchOutcome, DispatchError> {
        self.dispatch_winners(request).await
    }
}
