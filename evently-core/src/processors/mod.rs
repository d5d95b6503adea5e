//! Processors for the change-driven pipeline.
//!
//! - `SelectionScheduler`: on a timer or manual request, performs the initial draw
//! - `EventChangeRouter`: Receives `EntrantsChanged`, runs the two processors below
//! - `RedrawCoordinator`: refills winner slots vacated by cancellations
//! - `NotificationDispatcher`: creates the one Winners notification per episode
//! - `PushFanout`: Receives `NotificationCreated`, delivers push messages
//! - `PgChangeListener`: turns PostgreSQL notifications into change-feed events

pub mod change_listener;
pub mod event_change_router;
pub mod notification_dispatcher;
pub mod push_fanout;
pub mod redraw_coordinator;
pub mod selection_scheduler;

pub use change_listener::{ChangeListenerError, PgChangeListener};
pub use event_change_router::{EventChangeRouter, RoutePlan, RouteReport};
pub use notification_dispatcher::{
    DispatchError, DispatchOutcome, NotificationDispatcher, WinnersNotificationRequest,
};
pub use push_fanout::{FanoutError, FanoutReport, FanoutRequest, PushFanout};
pub use redraw_coordinator::{RedrawCoordinator, RedrawError, RedrawOutcome, RedrawRequest};
pub use selection_scheduler::{
    InitialDrawOutcome, SelectionError, SelectionScheduler, SelectionSweep, SweepReport,
};

#[cfg(test)]
pub(crate) mod test_support {
    use crate::entities::{
        EntrantSet, Event, EventEntrants, Notification, NotificationChannel, PushToken,
        SelectionProjection,
    };
    use crate::push::{MulticastMessage, MulticastResponse, PushTransport, SendResult, TransportError};
    use crate::store::{DocumentStore, MemoryDocumentStore, StoreError, TransactionOutcome, TxDecision};
    use crate::utils::retry::RetryPolicy;
    use async_trait::async_trait;
    use evently_sdk::objects::{EventId, ParticipantId};
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use time::{Duration, OffsetDateTime};
    use uuid::Uuid;

    pub fn participants(ids: &[&str]) -> EntrantSet {
        ids.iter().map(|id| ParticipantId::new(id)).collect()
    }

    /// An event whose enrollment closed an hour ago.
    pub async fn seed_event(
        store: &MemoryDocumentStore,
        enrolled: &[&str],
        selected: &[&str],
        selection_limit: u32,
    ) -> EventId {
        let event_id = EventId::new();
        store
            .insert_event(Event {
                id: event_id,
                selection_time: OffsetDateTime::now_utc() - Duration::hours(1),
                event_time: None,
                selection_limit,
            })
            .await;
        let mut entrants = EventEntrants::new(event_id);
        entrants.enrolled_entrants = participants(enrolled);
        entrants.selected_entrants = participants(selected);
        store.insert_event_entrants(entrants).await;
        event_id
    }

    pub async fn cancel(store: &MemoryDocumentStore, event_id: EventId, who: &str) {
        store
            .update_event_entrants(event_id, |e| {
                e.cancelled_entrants.insert(ParticipantId::new(who));
            })
            .await
            .unwrap();
    }

    /// Records every multicast; tokens in `reject` fail.
    #[derive(Default)]
    pub struct RecordingTransport {
        pub sent: Mutex<Vec<MulticastMessage>>,
        pub reject: HashSet<String>,
    }

    impl RecordingTransport {
        pub fn sent(&self) -> Vec<MulticastMessage> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PushTransport for RecordingTransport {
        async fn send_multicast(
            &self,
            message: &MulticastMessage,
        ) -> Result<MulticastResponse, TransportError> {
            self.sent.lock().unwrap().push(message.clone());
            let responses = message
                .tokens
                .iter()
                .map(|token| SendResult {
                    token: token.clone(),
                    result: if self.reject.contains(token) {
                        Err("registration-token-not-registered".to_string())
                    } else {
                        Ok(format!("projects/test/messages/{token}"))
                    },
                })
                .collect();
            Ok(MulticastResponse { responses })
        }
    }

    /// Millisecond backoff so retry paths finish quickly.
    pub fn quick_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: std::time::Duration::from_millis(1),
            max_delay: std::time::Duration::from_millis(4),
        }
    }

    /// Remaining injected failures and total calls for one store operation.
    #[derive(Default)]
    pub struct Faults {
        pub remaining: AtomicU32,
        pub calls: AtomicU32,
    }

    impl Faults {
        pub fn fail_next(&self, count: u32) {
            self.remaining.store(count, Ordering::SeqCst);
        }

        pub fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }

        fn hit(&self) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        }
    }

    /// Delegates to a [`MemoryDocumentStore`], failing the next calls of an
    /// operation as an unavailable database would.
    #[derive(Default)]
    pub struct FailingStore {
        pub inner: MemoryDocumentStore,
        pub selection: Faults,
        pub notification: Faults,
        pub tokens: Faults,
    }

    impl FailingStore {
        pub fn new(inner: MemoryDocumentStore) -> Self {
            Self {
                inner,
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl DocumentStore for FailingStore {
        async fn event(&self, event_id: EventId) -> Result<Option<Event>, StoreError> {
            self.inner.event(event_id).await
        }

        async fn event_entrants(
            &self,
            event_id: EventId,
        ) -> Result<Option<EventEntrants>, StoreError> {
            self.inner.event_entrants(event_id).await
        }

        async fn events_awaiting_selection(
            &self,
            now: OffsetDateTime,
        ) -> Result<Vec<Event>, StoreError> {
            self.inner.events_awaiting_selection(now).await
        }

        async fn notification(&self, id: Uuid) -> Result<Option<Notification>, StoreError> {
            self.inner.notification(id).await
        }

        async fn push_token(
            &self,
            participant: &ParticipantId,
        ) -> Result<Option<PushToken>, StoreError> {
            if self.tokens.hit() {
                return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
            }
            self.inner.push_token(participant).await
        }

        async fn transact_selection(
            &self,
            event_id: EventId,
            body: &mut (dyn for<'a> FnMut(&'a SelectionProjection) -> TxDecision<EntrantSet> + Send),
        ) -> TransactionOutcome {
            if self.selection.hit() {
                return TransactionOutcome::Failed(StoreError::RetryExhausted { attempts: 5 });
            }
            self.inner.transact_selection(event_id, body).await
        }

        async fn transact_notification(
            &self,
            event_id: EventId,
            channel: NotificationChannel,
            body: &mut (dyn for<'a> FnMut(&'a [Notification]) -> TxDecision<Notification> + Send),
        ) -> TransactionOutcome {
            if self.notification.hit() {
                return TransactionOutcome::Failed(StoreError::Database(sqlx::Error::PoolTimedOut));
            }
            self.inner.transact_notification(event_id, channel, body).await
        }
    }
}
