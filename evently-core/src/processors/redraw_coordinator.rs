//! RedrawCoordinator processor.
//!
//! When an event's cancelled set grows, the RedrawCoordinator refills the
//! vacated winner slots from entrants that were never selected:
//!
//! 1. Read `selection_limit` from the event (immutable, outside the transaction)
//! 2. In a transaction, read `enrolled`, `selected` and `cancelled` only
//! 3. `eligible = selected - cancelled`; if it already fills the limit, abort
//! 4. Otherwise draw `limit - |eligible|` from `enrolled - (selected ∪ cancelled)`
//! 5. Write `selected = eligible ∪ drawn` and commit
//!
//! Any number of redraws for the same event may run at once. The store
//! serializes their commits and re-runs the losers, which then find the
//! limit restored in step 3 and abort. Exactly one of them changes the
//! selected set per vacancy, and re-running on a settled state is a no-op.

use crate::entities::{EntrantSet, SelectionProjection};
use crate::store::{DocumentStore, StoreError, TransactionOutcome, TxDecision};
use crate::utils::random_draw::draw;
use evently_sdk::objects::EventId;
use kanau::processor::Processor;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{error, info};

/// Refill the winner slots of one event.
#[derive(Debug, Clone, Copy)]
pub struct RedrawRequest {
    pub event_id: EventId,
}

/// What a redraw did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedrawOutcome {
    /// A new selected set was committed.
    Redrawn {
        /// Newly drawn winners (may be empty when the pool ran dry).
        drawn: EntrantSet,
        /// The committed selected set.
        selected: EntrantSet,
    },
    /// The limit was already restored, or there was nothing to change.
    AlreadySettled,
    /// The event has taken place; no re-selection happens.
    EventStarted,
}

/// Errors that can occur during a redraw.
#[derive(Debug, Error)]
pub enum RedrawError {
    /// Event not found
    #[error("event not found: {0}")]
    EventNotFound(EventId),

    /// Entrant document not found
    #[error("event entrants not found: {0}")]
    EntrantsNotFound(EventId),

    /// Store unavailable or retries exhausted
    #[error("store error: {0}")]
    Store(StoreError),
}

impl RedrawError {
    /// Whether running the redraw again later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, RedrawError::Store(e) if e.is_transient())
    }
}

/// The write a redraw intends to make.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedrawPlan {
    pub drawn: EntrantSet,
    pub selected: EntrantSet,
}

/// Decide the redraw for one snapshot. `None` means there is nothing to write.
pub fn plan_redraw<R>(
    projection: &SelectionProjection,
    selection_limit: usize,
    rng: &mut R,
) -> Option<RedrawPlan>
where
    R: Rng + ?Sized,
{
    let eligible_winners = projection.eligible_winners();
    if eligible_winners.len() == selection_limit {
        return None;
    }

    let pool = projection.eligible_pool();
    let remaining_slots = selection_limit.saturating_sub(eligible_winners.len());
    let drawn = draw(&pool, remaining_slots, rng);
    let selected: EntrantSet = eligible_winners.union(&drawn).cloned().collect();

    if selected == projection.selected {
        return None;
    }
    Some(RedrawPlan { drawn, selected })
}

pub struct RedrawCoordinator<S> {
    store: Arc<S>,
}

impl<S: DocumentStore> RedrawCoordinator<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Run one redraw for `event_id`.
    pub async fn redraw(&self, event_id: EventId) -> Result<RedrawOutcome, RedrawError> {
        let event = match self.store.event(event_id).await {
            Ok(Some(event)) => event,
            Ok(None) => {
                error!(%event_id, "Entrant document references non-existent event");
                return Err(RedrawError::EventNotFound(event_id));
            }
            Err(e) => return Err(RedrawError::Store(e)),
        };

        if event.has_started(OffsetDateTime::now_utc()) {
            info!(%event_id, "Event has already taken place, skipping redraw");
            return Ok(RedrawOutcome::EventStarted);
        }

        let selection_limit = event.selection_limit as usize;
        let mut rng = StdRng::from_rng(&mut rand::rng());
        let mut planned = None;
        let mut body = |projection: &SelectionProjection| {
            planned = plan_redraw(projection, selection_limit, &mut rng);
            match &planned {
                Some(plan) => TxDecision::Commit(plan.selected.clone()),
                None => TxDecision::Abort,
            }
        };

        match self.store.transact_selection(event_id, &mut body).await {
            TransactionOutcome::Committed => {
                let RedrawPlan { drawn, selected } = planned.unwrap_or_default();
                info!(
                    %event_id,
                    drawn = drawn.len(),
                    selected = selected.len(),
                    selection_limit,
                    "Redrew winners"
                );
                Ok(RedrawOutcome::Redrawn { drawn, selected })
            }
            TransactionOutcome::AbortedBenign => {
                info!(%event_id, "Winner quota already restored, nothing to redraw");
                Ok(RedrawOutcome::AlreadySettled)
            }
            TransactionOutcome::Failed(StoreError::NotFound { .. }) => {
                error!(%event_id, "Event entrants document not found");
                Err(RedrawError::EntrantsNotFound(event_id))
            }
            TransactionOutcome::Failed(e) => {
                error!(%event_id, error = %e, "Redraw transaction failed");
                Err(RedrawError::Store(e))
            }
        }
    }
}

impl<S: DocumentStore> Processor<RedrawRequest> for RedrawCoordinator<S> {
    type Output = RedrawOutcome;
    type Error = RedrawError;

    async fn process(&self, request: RedrawRequest) -> Result<RedrawOutcome, RedrawError> {
        self.redraw(request.event_id).await
    }
}
