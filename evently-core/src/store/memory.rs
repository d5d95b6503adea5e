//! In-process document store with optimistic, versioned documents.
//!
//! Each entrant document carries a projection version that is bumped only
//! when `enrolled`, `selected` or `cancelled` change, and each
//! `(event_id, channel)` notification query carries its own version. A
//! transaction remembers the versions it read and commits only if they are
//! unchanged; otherwise it re-reads and re-runs the body.
//!
//! Every committed entrant update and notification insert is published on
//! the change feed, mirroring the triggers installed in PostgreSQL.

use crate::entities::{
    EntrantSet, Event, EventEntrants, Notification, NotificationChannel, PushToken,
    SelectionProjection,
};
use crate::events::{EntrantsChanged, EventSenders, NotificationCreated};
use crate::store::{
    DEFAULT_TRANSACTION_ATTEMPTS, DocumentStore, StoreError, TransactionOutcome, TxDecision,
};
use async_trait::async_trait;
use evently_sdk::objects::{EventId, ParticipantId};
use std::collections::HashMap;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

const EVENT_ENTRANTS_COLLECTION: &str = "event_entrants";

struct Versioned<T> {
    version: u64,
    doc: T,
}

#[derive(Default)]
struct State {
    events: HashMap<EventId, Event>,
    entrants: HashMap<EventId, Versioned<EventEntrants>>,
    /// Insertion order doubles as creation order.
    notifications: Vec<Notification>,
    channel_versions: HashMap<(EventId, NotificationChannel), u64>,
    /// Keyed by the address exactly as registered.
    push_tokens: HashMap<String, PushToken>,
}

impl State {
    fn channel_notifications(
        &self,
        event_id: EventId,
        channel: NotificationChannel,
        limit: usize,
    ) -> Vec<Notification> {
        self.notifications
            .iter()
            .filter(|n| n.event_id == event_id && n.channel == channel)
            .take(limit)
            .cloned()
            .collect()
    }

    fn channel_version(&self, event_id: EventId, channel: NotificationChannel) -> u64 {
        self.channel_versions
            .get(&(event_id, channel))
            .copied()
            .unwrap_or(0)
    }

    fn push_notification(&mut self, notification: Notification) {
        *self
            .channel_versions
            .entry((notification.event_id, notification.channel))
            .or_default() += 1;
        self.notifications.push(notification);
    }
}

/// Shared, cloneable in-process store.
#[derive(Clone)]
pub struct MemoryDocumentStore {
    state: Arc<RwLock<State>>,
    feed: Option<EventSenders>,
    max_attempts: u32,
}

impl MemoryDocumentStore {
    /// A store without a change feed.
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
            feed: None,
            max_attempts: DEFAULT_TRANSACTION_ATTEMPTS,
        }
    }

    /// A store that publishes committed changes to `feed`.
    pub fn with_change_feed(feed: EventSenders) -> Self {
        Self {
            feed: Some(feed),
            ..Self::new()
        }
    }

    /// Set how many conflicting attempts a transaction makes before giving up.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub async fn insert_event(&self, event: Event) {
        self.state.write().await.events.insert(event.id, event);
    }

    /// Create an entrant document. Creation is not an update, so nothing is published.
    pub async fn insert_event_entrants(&self, entrants: EventEntrants) {
        self.state.write().await.entrants.insert(
            entrants.event_id,
            Versioned {
                version: 0,
                doc: entrants,
            },
        );
    }

    /// Apply an external update to an entrant document (an entrant joining,
    /// accepting or cancelling) and publish it.
    pub async fn update_event_entrants<F>(&self, event_id: EventId, update: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut EventEntrants),
    {
        let change = {
            let mut state = self.state.write().await;
            let Some(entry) = state.entrants.get_mut(&event_id) else {
                return Err(StoreError::NotFound {
                    collection: EVENT_ENTRANTS_COLLECTION,
                    key: event_id.to_string(),
                });
            };
            let before = entry.doc.clone();
            update(&mut entry.doc);
            if entry.doc == before {
                return Ok(());
            }
            if entry.doc.projection() != before.projection() {
                entry.version += 1;
            }
            EntrantsChanged {
                event_id,
                before,
                after: entry.doc.clone(),
            }
        };
        self.publish_entrants_changed(change).await;
        Ok(())
    }

    /// Insert a notification written by someone other than this engine
    /// (e.g. an organizer messaging the Losers channel) and publish it.
    pub async fn insert_notification(&self, notification: Notification) {
        let created = NotificationCreated {
            notification_id: notification.id,
        };
        self.state.write().await.push_notification(notification);
        self.publish_notification_created(created).await;
    }

    /// Register a device token. Last write wins.
    pub async fn put_push_token(&self, participant: ParticipantId, token: impl Into<String>) {
        let key = participant.as_str().to_string();
        let token = PushToken {
            participant_id: participant,
            token: token.into(),
            created_at: OffsetDateTime::now_utc(),
        };
        self.state.write().await.push_tokens.insert(key, token);
    }

    /// Every stored notification in creation order.
    pub async fn notifications(&self) -> Vec<Notification> {
        self.state.read().await.notifications.clone()
    }

    async fn publish_entrants_changed(&self, change: EntrantsChanged) {
        if let Some(feed) = &self.feed {
            let event_id = change.event_id;
            if let Err(e) = feed.entrants_changed.send(change).await {
                warn!(%event_id, error = %e, "Failed to publish EntrantsChanged, receiver dropped");
            }
        }
    }

    async fn publish_notification_created(&self, created: NotificationCreated) {
        if let Some(feed) = &self.feed {
            if let Err(e) = feed.notification_created.send(created).await {
                warn!(
                    notification_id = %created.notification_id,
                    error = %e,
                    "Failed to publish NotificationCreated, receiver dropped"
                );
            }
        }
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn event(&self, event_id: EventId) -> Result<Option<Event>, StoreError> {
        Ok(self.state.read().await.events.get(&event_id).cloned())
    }

    async fn event_entrants(&self, event_id: EventId) -> Result<Option<EventEntrants>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .entrants
            .get(&event_id)
            .map(|entry| entry.doc.clone()))
    }

    async fn events_awaiting_selection(
        &self,
        now: OffsetDateTime,
    ) -> Result<Vec<Event>, StoreError> {
        let state = self.state.read().await;
        let mut due: Vec<Event> = state
            .events
            .values()
            .filter(|event| event.selection_time <= now)
            .filter(|event| {
                state.entrants.get(&event.id).is_some_and(|entry| {
                    entry.doc.selected_entrants.is_empty()
                        && !entry.doc.enrolled_entrants.is_empty()
                })
            })
            .cloned()
            .collect();
        due.sort_by_key(|event| event.selection_time);
        Ok(due)
    }

    async fn notification(&self, id: Uuid) -> Result<Option<Notification>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .notifications
            .iter()
            .find(|n| n.id == id)
            .cloned())
    }

    async fn push_token(&self, participant: &ParticipantId) -> Result<Option<PushToken>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .push_tokens
            .get(participant.as_str())
            .cloned())
    }

    async fn transact_selection(
        &self,
        event_id: EventId,
        body: &mut (dyn for<'a> FnMut(&'a SelectionProjection) -> TxDecision<EntrantSet> + Send),
    ) -> TransactionOutcome {
        for attempt in 1..=self.max_attempts {
            let (read_version, projection) = {
                let state = self.state.read().await;
                match state.entrants.get(&event_id) {
                    Some(entry) => (entry.version, entry.doc.projection()),
                    None => {
                        return TransactionOutcome::Failed(StoreError::NotFound {
                            collection: EVENT_ENTRANTS_COLLECTION,
                            key: event_id.to_string(),
                        });
                    }
                }
            };

            let selected = match body(&projection) {
                TxDecision::Abort => return TransactionOutcome::AbortedBenign,
                TxDecision::Commit(selected) => selected,
            };

            // Let concurrent writers in between read and commit.
            tokio::task::yield_now().await;

            let change = {
                let mut state = self.state.write().await;
                let Some(entry) = state.entrants.get_mut(&event_id) else {
                    return TransactionOutcome::Failed(StoreError::NotFound {
                        collection: EVENT_ENTRANTS_COLLECTION,
                        key: event_id.to_string(),
                    });
                };
                if entry.version != read_version {
                    debug!(%event_id, attempt, "Selection transaction conflicted, retrying");
                    continue;
                }
                let before = entry.doc.clone();
                entry.doc.selected_entrants = selected;
                entry.version += 1;
                EntrantsChanged {
                    event_id,
                    before,
                    after: entry.doc.clone(),
                }
            };

            self.publish_entrants_changed(change).await;
            return TransactionOutcome::Committed;
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
            let (read_version, existing) = {
                let state = self.state.read().await;
                (
                    state.channel_version(event_id, channel),
                    state.channel_notifications(event_id, channel, 1),
                )
            };

            let notification = match body(existing.as_slice()) {
                TxDecision::Abort => return TransactionOutcome::AbortedBenign,
                TxDecision::Commit(notification) => notification,
            };

            tokio::task::yield_now().await;

            let created = {
                let mut state = self.state.write().await;
                if state.channel_version(event_id, channel) != read_version {
                    debug!(%event_id, %channel, attempt, "Notification transaction conflicted, retrying");
                    continue;
                }
                let created = NotificationCreated {
                    notification_id: notification.id,
                };
                state.push_notification(notification);
                created
            };

            self.publish_notification_created(created).await;
            return TransactionOutcome::Committed;
        }

        warn!(%event_id, %channel, attempts = self.max_attempts, "Notification transaction retries exhausted");
        TransactionOutcome::Failed(StoreError::RetryExhausted {
            attempts: self.max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{entrants_changed_channel, notification_created_channel};

    fn set(ids: &[&str]) -> EntrantSet {
        ids.iter().map(|id| ParticipantId::new(id)).collect()
    }

    async fn seeded(store: &MemoryDocumentStore) -> EventId {
        let event_id = EventId::new();
        let mut entrants = EventEntrants::new(event_id);
        entrants.enrolled_entrants = set(&["a", "b", "c"]);
        entrants.selected_entrants = set(&["a"]);
        store.insert_event_entrants(entrants).await;
        event_id
    }

    #[tokio::test]
    async fn test_accept_does_not_bump_projection_version() {
        let store = MemoryDocumentStore::new();
        let event_id = seeded(&store).await;

        store
            .update_event_entrants(event_id, |e| {
                e.accepted_entrants.insert(ParticipantId::new("a"));
            })
            .await
            .unwrap();
        assert_eq!(store.state.read().await.entrants[&event_id].version, 0);

        store
            .update_event_entrants(event_id, |e| {
                e.cancelled_entrants.insert(ParticipantId::new("a"));
            })
            .await
            .unwrap();
        assert_eq!(store.state.read().await.entrants[&event_id].version, 1);
    }

    #[tokio::test]
    async fn test_committed_selection_is_published() {
        let (entrants_tx, mut entrants_rx) = entrants_changed_channel();
        let (notif_tx, _notif_rx) = notification_created_channel();
        let store = MemoryDocumentStore::with_change_feed(EventSenders::new(entrants_tx, notif_tx));
        let event_id = seeded(&store).await;

        let outcome = store
            .transact_selection(event_id, &mut |p: &SelectionProjection| {
                TxDecision::Commit(p.enrolled.clone())
            })
            .await;
        assert!(matches!(outcome, TransactionOutcome::Committed));

        let change = entrants_rx.recv().await.unwrap();
        assert_eq!(change.before.selected_entrants, set(&["a"]));
        assert_eq!(change.after.selected_entrants, set(&["a", "b", "c"]));
    }

    #[tokio::test]
    async fn test_abort_writes_nothing() {
        let store = MemoryDocumentStore::new();
        let event_id = seeded(&store).await;

        let outcome = store
            .transact_selection(event_id, &mut |_: &SelectionProjection| TxDecision::Abort)
            .await;
        assert!(matches!(outcome, TransactionOutcome::AbortedBenign));

        let entrants = store.event_entrants(event_id).await.unwrap().unwrap();
        assert_eq!(entrants.selected_entrants, set(&["a"]));
    }

    #[tokio::test]
    async fn test_missing_document_fails() {
        let store = MemoryDocumentStore::new();
        let outcome = store
            .transact_selection(EventId::new(), &mut |_: &SelectionProjection| TxDecision::Abort)
            .await;
        assert!(matches!(
            outcome,
            TransactionOutcome::Failed(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_conflicting_writer_forces_rerun() {
        let store = MemoryDocumentStore::new();
        let event_id = seeded(&store).await;

        let mut runs = 0;
        let racer = store.clone();
        let outcome = store
            .transact_selection(event_id, &mut |p: &SelectionProjection| {
                runs += 1;
                if runs == 1 {
                    // Simulate a concurrent commit landing after our read.
                    let racer = racer.clone();
                    tokio::spawn(async move {
                        racer
                            .update_event_entrants(event_id, |e| {
                                e.cancelled_entrants.insert(ParticipantId::new("a"));
                            })
                            .await
                    });
                }
                TxDecision::Commit(p.eligible_winners())
            })
            .await;
        assert!(matches!(outcome, TransactionOutcome::Committed));
        assert_eq!(runs, 2);

        let entrants = store.event_entrants(event_id).await.unwrap().unwrap();
        assert!(entrants.selected_entrants.is_empty());
        assert_eq!(entrants.cancelled_entrants, set(&["a"]));
    }

    #[tokio::test]
    async fn test_conflicts_beyond_budget_give_up() {
        let store = MemoryDocumentStore::new().with_max_attempts(1);
        let event_id = seeded(&store).await;

        let racer = store.clone();
        let outcome = store
            .transact_selection(event_id, &mut |p: &SelectionProjection| {
                let racer = racer.clone();
                tokio::spawn(async move {
                    racer
                        .update_event_entrants(event_id, |e| {
                            e.cancelled_entrants.insert(ParticipantId::new("b"));
                        })
                        .await
                });
                TxDecision::Commit(p.eligible_winners())
            })
            .await;
        assert!(matches!(
            outcome,
            TransactionOutcome::Failed(StoreError::RetryExhausted { attempts: 1 })
        ));

        let entrants = store.event_entrants(event_id).await.unwrap().unwrap();
        assert_eq!(entrants.selected_entrants, set(&["a"]));
        assert_eq!(entrants.cancelled_entrants, set(&["b"]));
    }

    #[tokio::test]
    async fn test_token_lookup_uses_registered_spelling() {
        let store = MemoryDocumentStore::new();
        store
            .put_push_token(ParticipantId::new("Ann@Example.com"), "token-ann")
            .await;

        let found = store
            .push_token(&ParticipantId::new("Ann@Example.com"))
            .await
            .unwrap();
        assert_eq!(found.map(|t| t.token).as_deref(), Some("token-ann"));
        assert!(
            store
                .push_token(&ParticipantId::new("ann@example.com"))
                .await
                .unwrap()
                .is_none()
        );
    }
}
