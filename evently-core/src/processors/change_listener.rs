//! PgChangeListener.
//!
//! Bridges PostgreSQL NOTIFY to the in-process change feed:
//!
//! - `event_entrants_changed` carries an outbox row id; the row is taken and
//!   published as `EntrantsChanged`
//! - `notification_created` carries a notification id, published as
//!   `NotificationCreated`
//!
//! Malformed payloads are logged and skipped. The outbox is drained once
//! LISTEN is in place, again whenever the LISTEN connection drops, and on a
//! fixed interval, which picks up rows whose NOTIFY was sent while the
//! connection was being re-established.

use crate::entities::entrant_change::{ListPendingEntrantChanges, TakeEntrantChange};
use crate::events::{EntrantsChanged, EventSenders, NotificationCreated};
use crate::framework::DatabaseProcessor;
use crate::utils::retry::RetryPolicy;
use kanau::processor::Processor;
use sqlx::PgPool;
use sqlx::postgres::PgListener;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Channel notified with an `event_entrant_changes` row id.
pub const ENTRANTS_CHANGED_CHANNEL: &str = "event_entrants_changed";
/// Channel notified with a new notification id.
pub const NOTIFICATION_CREATED_CHANNEL: &str = "notification_created";

const DEFAULT_DRAIN_INTERVAL: Duration = Duration::from_secs(60);

/// Pause between failed reconnects. Attempts are unbounded.
const RECONNECT_BACKOFF: RetryPolicy = RetryPolicy {
    max_attempts: u32::MAX,
    base_delay: Duration::from_millis(500),
    max_delay: Duration::from_secs(10),
};

#[derive(Debug, Error)]
pub enum ChangeListenerError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// A parsed NOTIFY.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ChangeSignal {
    EntrantsChanged { change_id: i64 },
    NotificationCreated { notification_id: Uuid },
}

/// What the loop does with one `PgListener::try_recv` result.
#[derive(Debug, PartialEq, Eq)]
enum ListenStep<N, E> {
    Deliver(N),
    /// The connection dropped and is re-established on the next receive.
    /// Notifications sent meanwhile are lost, the outbox is not.
    Resync,
    /// Reconnecting failed.
    Backoff(E),
}

impl<N, E> From<Result<Option<N>, E>> for ListenStep<N, E> {
    fn from(received: Result<Option<N>, E>) -> Self {
        match received {
            Ok(Some(notification)) => ListenStep::Deliver(notification),
            Ok(None) => ListenStep::Resync,
            Err(e) => ListenStep::Backoff(e),
        }
    }
}

fn parse_signal(channel: &str, payload: &str) -> Option<ChangeSignal> {
    match channel {
        ENTRANTS_CHANGED_CHANNEL => payload
            .trim()
            .parse()
            .ok()
            .map(|change_id| ChangeSignal::EntrantsChanged { change_id }),
        NOTIFICATION_CREATED_CHANNEL => Uuid::parse_str(payload.trim())
            .ok()
            .map(|notification_id| ChangeSignal::NotificationCreated { notification_id }),
        _ => None,
    }
}

pub struct PgChangeListener {
    db: DatabaseProcessor,
    senders: EventSenders,
    drain_interval: Duration,
}

impl PgChangeListener {
    pub fn new(pool: PgPool, senders: EventSenders) -> Self {
        Self {
            db: DatabaseProcessor::new(pool),
            senders,
            drain_interval: DEFAULT_DRAIN_INTERVAL,
        }
    }

    /// How often the outbox is drained regardless of notifications.
    pub fn with_drain_interval(mut self, drain_interval: Duration) -> Self {
        self.drain_interval = drain_interval.max(Duration::from_secs(1));
        self
    }

    /// Listen until shutdown. Fails only if LISTEN cannot be set up.
    pub async fn run(
        self,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<(), ChangeListenerError> {
        let mut listener = PgListener::connect_with(&self.db.pool).await?;
        listener
            .listen_all([ENTRANTS_CHANGED_CHANNEL, NOTIFICATION_CREATED_CHANNEL])
            .await?;
        info!("PgChangeListener started");

        self.drain_pending().await;
        let mut drain_tick = tokio::time::interval(self.drain_interval);
        drain_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        drain_tick.reset();
        let mut reconnect_failures: u32 = 0;

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("PgChangeListener received shutdown signal");
                        break;
                    }
                }

                received = listener.try_recv() => {
                    match ListenStep::from(received) {
                        ListenStep::Deliver(notification) => {
                            reconnect_failures = 0;
                            self.handle(notification.channel(), notification.payload()).await;
                        }
                        ListenStep::Resync => {
                            reconnect_failures = 0;
                            warn!("Lost LISTEN connection, draining outbox before reconnecting");
                            self.drain_pending().await;
                        }
                        ListenStep::Backoff(e) => {
                            reconnect_failures = reconnect_failures.saturating_add(1);
                            let delay = RECONNECT_BACKOFF.delay(reconnect_failures);
                            warn!(error = %e, attempt = reconnect_failures, ?delay, "Failed to re-establish LISTEN connection");
                            tokio::time::sleep(delay).await;
                        }
                    }
                }

                _ = drain_tick.tick() => {
                    self.drain_pending().await;
                }
            }
        }

        info!("PgChangeListener stopped");
        Ok(())
    }

    async fn handle(&self, channel: &str, payload: &str) {
        match parse_signal(channel, payload) {
            Some(ChangeSignal::EntrantsChanged { change_id }) => {
                self.publish_change(change_id).await;
            }
            Some(ChangeSignal::NotificationCreated { notification_id }) => {
                let created = NotificationCreated { notification_id };
                if let Err(e) = self.senders.notification_created.send(created).await {
                    warn!(%notification_id, error = %e, "Failed to publish NotificationCreated, receiver dropped");
                }
            }
            None => {
                error!(channel, payload, "Malformed change notification, skipping");
            }
        }
    }

    async fn publish_change(&self, change_id: i64) {
        let change = match self.db.process(TakeEntrantChange { id: change_id }).await {
            Ok(Some(change)) => change,
            Ok(None) => {
                debug!(change_id, "Entrant change already taken");
                return;
            }
            Err(e) => {
                error!(change_id, error = %e, "Failed to load entrant change");
                return;
            }
        };

        let event_id = change.after.event_id;
        let changed = EntrantsChanged {
            event_id,
            before: change.before,
            after: change.after,
        };
        if let Err(e) = self.senders.entrants_changed.send(changed).await {
            warn!(%event_id, error = %e, "Failed to publish EntrantsChanged, receiver dropped");
        }
    }

    async fn drain_pending(&self) {
        match self.db.process(ListPendingEntrantChanges).await {
            Ok(pending) => {
                if !pending.is_empty() {
                    info!(count = pending.len(), "Draining pending entrant changes");
                }
                for change_id in pending {
                    self.publish_change(change_id).await;
                }
            }
            Err(e) => error!(error = %e, "Failed to list pending entrant changes"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_signals() {
        assert_eq!(
            parse_signal(ENTRANTS_CHANGED_CHANNEL, "42"),
            Some(ChangeSignal::EntrantsChanged { change_id: 42 })
        );

        let id = Uuid::now_v7();
        assert_eq!(
            parse_signal(NOTIFICATION_CREATED_CHANNEL, &format!(" {id}\n")),
            Some(ChangeSignal::NotificationCreated { notification_id: id })
        );
    }

    #[test]
    fn test_receive_results_map_to_steps() {
        assert_eq!(
            ListenStep::from(Ok::<_, &str>(Some(7))),
            ListenStep::Deliver(7)
        );
        assert_eq!(ListenStep::from(Ok::<Option<i32>, &str>(None)), ListenStep::Resync);
        assert_eq!(
            ListenStep::from(Err::<Option<i32>, _>("connection refused")),
            ListenStep::Backoff("connection refused")
        );
    }

    #[test]
    fn test_reconnect_backoff_is_capped() {
        assert_eq!(RECONNECT_BACKOFF.delay(1), Duration::from_millis(500));
        assert_eq!(RECONNECT_BACKOFF.delay(3), Duration::from_secs(2));
        assert_eq!(RECONNECT_BACKOFF.delay(100), Duration::from_secs(10));
        assert!(RECONNECT_BACKOFF.allows_another(1_000_000));
    }

    #[test]
    fn test_malformed_payloads_are_rejected() {
        assert_eq!(parse_signal(ENTRANTS_CHANGED_CHANNEL, "{\"id\":1}"), None);
        assert_eq!(parse_signal(NOTIFICATION_CREATED_CHANNEL, "not-a-uuid"), None);
        assert_eq!(parse_signal("orders_changed", "1"), None);
    }
}
