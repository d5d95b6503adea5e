//! PushFanout processor.
//!
//! Delivers a notification to the devices of a channel's audience:
//!
//! 1. Resolve the channel against an entrant snapshot
//! 2. Drop recipients that already saw the content
//! 3. Look up one device token per recipient (missing tokens are logged and
//!    dropped, a token shared by several recipients is addressed once)
//! 4. Send one multicast; per-token failures are logged, never fatal
//!
//! The run loop consumes `NotificationCreated`, re-fetching the notification
//! and the current entrant document before fanning out. A fan-out that fails
//! before anything was sent is tried again with capped exponential backoff.

use crate::entities::{EntrantSet, EventEntrants};
use crate::events::{NotificationCreated, NotificationCreatedReceiver};
use crate::push::{MulticastMessage, PushTransport, TransportError};
use crate::store::{DocumentStore, StoreError};
use crate::utils::retry::RetryPolicy;
use evently_sdk::objects::{Channel, EventId};
use futures_util::future::try_join_all;
use kanau::processor::Processor;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Deliver one message to a channel's audience.
#[derive(Debug, Clone)]
pub struct FanoutRequest {
    pub channel: Channel,
    pub entrants: EventEntrants,
    pub title: String,
    pub body: String,
    pub correlation_id: String,
    /// Recipients to leave out.
    pub skip: EntrantSet,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanoutReport {
    /// Audience size after `skip`.
    pub recipients: usize,
    /// Distinct device tokens addressed.
    pub tokens: usize,
    pub delivered: usize,
    pub failed_tokens: Vec<String>,
}

#[derive(Debug, Error)]
pub enum FanoutError {
    #[error("notification not found: {0}")]
    NotificationNotFound(Uuid),

    #[error("event entrants not found: {0}")]
    EntrantsNotFound(EventId),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl FanoutError {
    /// Whether a later attempt may succeed. Every variant stops before a
    /// message is sent, so a retry never double-delivers.
    pub fn is_transient(&self) -> bool {
        match self {
            FanoutError::Store(e) => e.is_transient(),
            FanoutError::Transport(_) => true,
            FanoutError::NotificationNotFound(_) | FanoutError::EntrantsNotFound(_) => false,
        }
    }
}

pub struct PushFanout<S, T> {
    store: Arc<S>,
    transport: Arc<T>,
    retry: RetryPolicy,
}

impl<S, T> PushFanout<S, T>
where
    S: DocumentStore + 'static,
    T: PushTransport + 'static,
{
    pub fn new(store: Arc<S>, transport: Arc<T>) -> Self {
        Self {
            store,
            transport,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn fanout(&self, request: FanoutRequest) -> Result<FanoutReport, FanoutError> {
        let FanoutRequest {
            channel,
            entrants,
            title,
            body,
            correlation_id,
            skip,
        } = request;
        let event_id = entrants.event_id;

        let recipients: EntrantSet = entrants
            .recipients(channel)
            .difference(&skip)
            .cloned()
            .collect();
        let tokens = self.tokens_for(&recipients).await?;

        let mut report = FanoutReport {
            recipients: recipients.len(),
            tokens: tokens.len(),
            ..Default::default()
        };
        if tokens.is_empty() {
            debug!(%event_id, %channel, recipients = report.recipients, "No devices to notify");
            return Ok(report);
        }

        let message = MulticastMessage {
            tokens,
            title,
            body,
            correlation_id,
        };
        let response = self.transport.send_multicast(&message).await?;

        report.delivered = response.success_count();
        report.failed_tokens = response.failed_tokens();
        if report.failed_tokens.is_empty() {
            info!(%event_id, %channel, delivered = report.delivered, "Push fan-out complete");
        } else {
            error!(
                %event_id,
                %channel,
                delivered = report.delivered,
                failed = response.failure_count(),
                failed_tokens = ?report.failed_tokens,
                "Some push messages failed"
            );
        }
        Ok(report)
    }

    /// Fan out a stored notification to its channel, skipping `seen_by`.
    pub async fn fanout_notification(
        &self,
        notification_id: Uuid,
    ) -> Result<FanoutReport, FanoutError> {
        let Some(notification) = self.store.notification(notification_id).await? else {
            error!(%notification_id, "Notification not found");
            return Err(FanoutError::NotificationNotFound(notification_id));
        };
        let event_id = notification.event_id;
        let Some(entrants) = self.store.event_entrants(event_id).await? else {
            error!(%notification_id, %event_id, "Notification references missing event entrants");
            return Err(FanoutError::EntrantsNotFound(event_id));
        };

        self.fanout(FanoutRequest {
            channel: notification.channel.into(),
            entrants,
            title: notification.title,
            body: notification.description,
            correlation_id: notification.id.to_string(),
            skip: notification.seen_by,
        })
        .await
    }

    async fn tokens_for(&self, recipients: &EntrantSet) -> Result<Vec<String>, StoreError> {
        let lookups = recipients.iter().map(|participant| async move {
            self.store
                .push_token(participant)
                .await
                .map(|token| (participant, token))
        });

        let mut seen = HashSet::new();
        let mut tokens = Vec::with_capacity(recipients.len());
        for (participant, token) in try_join_all(lookups).await? {
            match token {
                Some(token) if seen.insert(token.token.clone()) => tokens.push(token.token),
                Some(_) => debug!(participant = %participant, "Device token shared with another recipient"),
                None => error!(participant = %participant, "No push token found for participant"),
            }
        }
        Ok(tokens)
    }

    /// Run the fan-out loop, one task per created notification.
    pub async fn run(
        self: Arc<Self>,
        mut shutdown_rx: watch::Receiver<bool>,
        mut created_rx: NotificationCreatedReceiver,
    ) {
        info!("PushFanout started");

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("PushFanout received shutdown signal");
                        break;
                    }
                }

                Some(created) = created_rx.recv() => {
                    let fanout = self.clone();
                    tokio::spawn(async move {
                        let _ = fanout.handle_created(created).await;
                    });
                }

                else => {
                    warn!("NotificationCreated channel closed");
                    break;
                }
            }
        }

        info!("PushFanout stopped");
    }

    async fn handle_created(
        &self,
        created: NotificationCreated,
    ) -> Result<FanoutReport, FanoutError> {
        let notification_id = created.notification_id;
        let mut attempts = 1;
        loop {
            match self.fanout_notification(notification_id).await {
                Ok(report) => {
                    debug!(%notification_id, attempts, ?report, "Handled NotificationCreated");
                    return Ok(report);
                }
                Err(e) if e.is_transient() && self.retry.allows_another(attempts) => {
                    let delay = self.retry.delay(attempts);
                    warn!(%notification_id, attempt = attempts, ?delay, error = %e, "Push fan-out failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempts += 1;
                }
                Err(e) => {
                    error!(%notification_id, attempts, error = %e, "Push fan-out failed");
                    return Err(e);
                }
            }
        }
    }
}

impl<S, T> Processor<FanoutRequest> for PushFanout<S, T>
where
    S: DocumentStore + 'static,
    T: PushTransport + 'static,
{
    type Output = FanoutReport;
    type Error = FanoutError;

    async fn process(&self, request: FanoutRequest) -> Result<FanoutReport, FanoutError> {
        self.fanout(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Notification, NotificationChannel};
    use crate::events::{EventSenders, entrants_changed_channel, notification_created_channel};
    use crate::processors::test_support::{
        FailingStore, RecordingTransport, participants, quick_retry,
    };
    use crate::store::MemoryDocumentStore;
    use evently_sdk::objects::ParticipantId;
    use std::time::Duration;
    use time::OffsetDateTime;

    fn entrants() -> EventEntrants {
        let mut entrants = EventEntrants::new(EventId::new());
        entrants.enrolled_entrants = participants(&["a", "b", "c", "d", "e"]);
        entrants.selected_entrants = participants(&["a", "b"]);
        entrants.accepted_entrants = participants(&["a"]);
        entrants.cancelled_entrants = participants(&["b"]);
        entrants
    }

    async fn store_with_tokens(ids: &[&str]) -> Arc<MemoryDocumentStore> {
        let store = Arc::new(MemoryDocumentStore::new());
        for id in ids {
            store
                .put_push_token(ParticipantId::new(id), format!("token-{id}"))
                .await;
        }
        store
    }

    fn request(channel: Channel, entrants: EventEntrants) -> FanoutRequest {
        FanoutRequest {
            channel,
            entrants,
            title: "Update".to_string(),
            body: "Something happened".to_string(),
            correlation_id: "n-1".to_string(),
            skip: EntrantSet::new(),
        }
    }

    fn sent_tokens(transport: &RecordingTransport) -> Vec<String> {
        let mut tokens: Vec<String> = transport
            .sent()
            .into_iter()
            .flat_map(|message| message.tokens)
            .collect();
        tokens.sort();
        tokens
    }

    #[tokio::test]
    async fn test_channel_audiences() {
        let cases = [
            (Channel::All, vec!["token-a", "token-b", "token-c", "token-d", "token-e"]),
            (Channel::Winners, vec!["token-a", "token-b"]),
            (Channel::Losers, vec!["token-c", "token-d", "token-e"]),
            (Channel::Cancelled, vec!["token-b"]),
        ];

        for (channel, expected) in cases {
            let store = store_with_tokens(&["a", "b", "c", "d", "e"]).await;
            let transport = Arc::new(RecordingTransport::default());
            let fanout = PushFanout::new(store, transport.clone());

            let report = fanout.process(request(channel, entrants())).await.unwrap();
            assert_eq!(report.delivered, expected.len(), "{channel}");
            assert_eq!(sent_tokens(&transport), expected, "{channel}");
        }
    }

    #[tokio::test]
    async fn test_missing_tokens_are_dropped() {
        let store = store_with_tokens(&["c"]).await;
        let transport = Arc::new(RecordingTransport::default());
        let fanout = PushFanout::new(store, transport.clone());

        let report = fanout
            .fanout(request(Channel::Losers, entrants()))
            .await
            .unwrap();
        assert_eq!(report.recipients, 3);
        assert_eq!(report.tokens, 1);
        assert_eq!(sent_tokens(&transport), vec!["token-c"]);
    }

    #[tokio::test]
    async fn test_no_tokens_skips_send() {
        let store = store_with_tokens(&[]).await;
        let transport = Arc::new(RecordingTransport::default());
        let fanout = PushFanout::new(store, transport.clone());

        let report = fanout
            .fanout(request(Channel::All, entrants()))
            .await
            .unwrap();
        assert_eq!(report.tokens, 0);
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_partial_failure_is_not_an_error() {
        let store = store_with_tokens(&["a", "b"]).await;
        let transport = Arc::new(RecordingTransport {
            reject: ["token-b".to_string()].into_iter().collect(),
            ..Default::default()
        });
        let fanout = PushFanout::new(store, transport);

        let report = fanout
            .fanout(request(Channel::Winners, entrants()))
            .await
            .unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed_tokens, vec!["token-b"]);
    }

    #[tokio::test]
    async fn test_stored_notification_skips_seen_by() {
        let store = store_with_tokens(&["a", "b", "c"]).await;
        let mut doc = EventEntrants::new(EventId::new());
        doc.enrolled_entrants = participants(&["a", "b", "c"]);
        doc.selected_entrants = participants(&["a", "c"]);
        let event_id = doc.event_id;
        store.insert_event_entrants(doc).await;

        let notification = Notification {
            id: Uuid::now_v7(),
            event_id,
            channel: NotificationChannel::Winners,
            title: "You're in".to_string(),
            description: "Open the app".to_string(),
            creation_time: OffsetDateTime::now_utc(),
            seen_by: participants(&["a"]),
        };
        let notification_id = notification.id;
        store.insert_notification(notification).await;

        let transport = Arc::new(RecordingTransport::default());
        let fanout = PushFanout::new(store, transport.clone());
        fanout.fanout_notification(notification_id).await.unwrap();

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].tokens, vec!["token-c"]);
        assert_eq!(sent[0].title, "You're in");
        assert_eq!(sent[0].body, "Open the app");
        assert_eq!(sent[0].correlation_id, notification_id.to_string());
    }

    #[tokio::test]
    async fn test_unknown_notification_fails() {
        let store = store_with_tokens(&[]).await;
        let fanout = PushFanout::new(store, Arc::new(RecordingTransport::default()));
        let missing = Uuid::now_v7();
        assert!(matches!(
            fanout.fanout_notification(missing).await,
            Err(FanoutError::NotificationNotFound(id)) if id == missing
        ));
    }

    #[tokio::test]
    async fn test_run_loop_handles_created_notifications() {
        let (entrants_tx, _entrants_rx) = entrants_changed_channel();
        let (created_tx, created_rx) = notification_created_channel();
        let store = Arc::new(MemoryDocumentStore::with_change_feed(EventSenders::new(
            entrants_tx,
            created_tx,
        )));
        store.put_push_token(ParticipantId::new("a"), "token-a").await;
        let mut doc = EventEntrants::new(EventId::new());
        doc.enrolled_entrants = participants(&["a", "b"]);
        let event_id = doc.event_id;
        store.insert_event_entrants(doc).await;

        let transport = Arc::new(RecordingTransport::default());
        let fanout = Arc::new(PushFanout::new(store.clone(), transport.clone()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(fanout.run(shutdown_rx, created_rx));

        store
            .insert_notification(Notification {
                id: Uuid::now_v7(),
                event_id,
                channel: NotificationChannel::All,
                title: "Venue changed".to_string(),
                description: "Hall B".to_string(),
                creation_time: OffsetDateTime::now_utc(),
                seen_by: EntrantSet::new(),
            })
            .await;

        for _ in 0..100 {
            if !transport.sent().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(sent_tokens(&transport), vec!["token-a"]);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_shared_token_is_addressed_once() {
        let store = Arc::new(MemoryDocumentStore::new());
        store.put_push_token(ParticipantId::new("a"), "family-tablet").await;
        store.put_push_token(ParticipantId::new("b"), "family-tablet").await;
        store.put_push_token(ParticipantId::new("c"), "token-c").await;
        let transport = Arc::new(RecordingTransport::default());
        let fanout = PushFanout::new(store, transport.clone());

        let mut doc = EventEntrants::new(EventId::new());
        doc.enrolled_entrants = participants(&["a", "b", "c"]);
        let report = fanout.fanout(request(Channel::All, doc)).await.unwrap();

        assert_eq!(report.recipients, 3);
        assert_eq!(report.tokens, 2);
        assert_eq!(report.delivered, 2);
        assert_eq!(sent_tokens(&transport), vec!["family-tablet", "token-c"]);
    }

    async fn stored_notification(store: &MemoryDocumentStore) -> Uuid {
        store.put_push_token(ParticipantId::new("a"), "token-a").await;
        let mut doc = EventEntrants::new(EventId::new());
        doc.enrolled_entrants = participants(&["a"]);
        let event_id = doc.event_id;
        store.insert_event_entrants(doc).await;

        let notification = Notification {
            id: Uuid::now_v7(),
            event_id,
            channel: NotificationChannel::All,
            title: "Doors open at 7".to_string(),
            description: String::new(),
            creation_time: OffsetDateTime::now_utc(),
            seen_by: EntrantSet::new(),
        };
        let id = notification.id;
        store.insert_notification(notification).await;
        id
    }

    #[tokio::test]
    async fn test_unavailable_store_is_retried() {
        let memory = MemoryDocumentStore::new();
        let notification_id = stored_notification(&memory).await;
        let store = Arc::new(FailingStore::new(memory));
        store.tokens.fail_next(2);
        let transport = Arc::new(RecordingTransport::default());
        let fanout =
            PushFanout::new(store.clone(), transport.clone()).with_retry_policy(quick_retry(4));

        let report = fanout
            .handle_created(NotificationCreated { notification_id })
            .await
            .unwrap();

        assert_eq!(report.delivered, 1);
        assert_eq!(store.tokens.calls(), 3);
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_retry_gives_up_and_missing_notification_is_final() {
        let memory = MemoryDocumentStore::new();
        let notification_id = stored_notification(&memory).await;
        let store = Arc::new(FailingStore::new(memory));
        store.tokens.fail_next(10);
        let transport = Arc::new(RecordingTransport::default());
        let fanout =
            PushFanout::new(store.clone(), transport.clone()).with_retry_policy(quick_retry(3));

        let result = fanout
            .handle_created(NotificationCreated { notification_id })
            .await;
        assert!(matches!(result, Err(FanoutError::Store(_))));
        assert_eq!(store.tokens.calls(), 3);
        assert!(transport.sent().is_empty());

        let calls_before = store.tokens.calls();
        let result = fanout
            .handle_created(NotificationCreated {
                notification_id: Uuid::now_v7(),
            })
            .await;
        assert!(matches!(result, Err(FanoutError::NotificationNotFound(_))));
        assert_eq!(store.tokens.calls(), calls_before);
    }
}
