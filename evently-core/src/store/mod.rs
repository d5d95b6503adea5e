//! The transactional document store this engine runs against.
//!
//! Two implementations are provided:
//!
//! - [`PgDocumentStore`]: PostgreSQL, SERIALIZABLE transactions retried on
//!   serialization failure.
//! - [`MemoryDocumentStore`]: in-process, optimistic versioned documents.
//!   It publishes the change feed itself.
//!
//! Transaction bodies are synchronous: the store performs the reads, hands
//! the snapshot to the body, and applies the body's write only if nothing it
//! read has changed in between. On conflict the body runs again against a
//! fresh snapshot, so a body must be free of side effects.

pub mod memory;
pub mod postgres;

pub use memory::MemoryDocumentStore;
pub use postgres::PgDocumentStore;

use crate::entities::{
    EntrantSet, Event, EventEntrants, Notification, NotificationChannel, PushToken,
    SelectionProjection,
};
use async_trait::async_trait;
use evently_sdk::objects::{EventId, ParticipantId};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

/// Default number of attempts before a conflicting transaction gives up.
pub const DEFAULT_TRANSACTION_ATTEMPTS: u32 = 5;

/// Errors surfaced by a document store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A document read inside a transaction does not exist
    #[error("document not found: {collection}/{key}")]
    NotFound {
        collection: &'static str,
        key: String,
    },

    /// Every attempt conflicted with a concurrent commit
    #[error("transaction gave up after {attempts} conflicting attempts")]
    RetryExhausted { attempts: u32 },
}

impl StoreError {
    /// Optimistic-conflict errors that a fresh attempt may resolve.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Database(sqlx::Error::Database(db_err)) => matches!(
                db_err.code().as_deref(),
                // serialization_failure, deadlock_detected
                Some("40001") | Some("40P01")
            ),
            _ => false,
        }
    }

    /// Failures that may clear up if the whole operation runs again later.
    /// A missing document stays missing.
    pub fn is_transient(&self) -> bool {
        !matches!(self, StoreError::NotFound { .. })
    }
}

/// What a transaction body decided after looking at its snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxDecision<W> {
    /// Apply this write and commit.
    Commit(W),
    /// Write nothing. The desired state already holds.
    Abort,
}

/// Result of running a transaction, returned by value.
#[derive(Debug)]
pub enum TransactionOutcome {
    /// The body's write was committed.
    Committed,
    /// The body aborted. Nothing was written and this is not an error.
    AbortedBenign,
    /// The store failed or gave up.
    Failed(StoreError),
}

/// Transactional key-value document store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Point read of an event.
    async fn event(&self, event_id: EventId) -> Result<Option<Event>, StoreError>;

    /// Point read of an entrant document.
    async fn event_entrants(&self, event_id: EventId) -> Result<Option<EventEntrants>, StoreError>;

    /// Candidate events for the initial draw: selection time passed, nobody
    /// selected yet, somebody enrolled. Callers re-check inside a transaction.
    async fn events_awaiting_selection(&self, now: OffsetDateTime)
    -> Result<Vec<Event>, StoreError>;

    /// Point read of a notification.
    async fn notification(&self, id: Uuid) -> Result<Option<Notification>, StoreError>;

    /// Point read of a participant's device token.
    async fn push_token(&self, participant: &ParticipantId) -> Result<Option<PushToken>, StoreError>;

    /// Read-compute-write over the selection projection of one entrant
    /// document. A committed write replaces `selected_entrants`.
    async fn transact_selection(
        &self,
        event_id: EventId,
        body: &mut (dyn for<'a> FnMut(&'a SelectionProjection) -> TxDecision<EntrantSet> + Send),
    ) -> TransactionOutcome;

    /// Read-compute-write over the first notification of `(event_id, channel)`.
    /// The body sees the query result limited to one; a committed write inserts
    /// a new notification.
    async fn transact_notification(
        &self,
        event_id: EventId,
        channel: NotificationChannel,
        body: &mut (dyn for<'a> FnMut(&'a [Notification]) -> TxDecision<Notification> + Send),
    ) -> TransactionOutcome;
}
