//! SelectionScheduler processor.
//!
//! Performs the initial draw for every event whose enrollment has closed:
//! `selection_time` has passed, `selected` is still empty and `enrolled`
//! is not. Winners are drawn from `enrolled - cancelled`, up to the
//! event's `selection_limit`.
//!
//! The empty check and the write run in one store transaction, so two
//! sweeps racing on the same event leave a single draw in place, and a
//! sweep after a successful draw changes nothing.
//!
//! Sweeps run on a fixed interval, once at startup if configured, and on
//! every manual `SelectionSweepRequested`.

use crate::config::{ConfigWatcher, SchedulerConfig};
use crate::entities::{EntrantSet, Event, EventStatus, SelectionProjection};
use crate::events::SelectionSweepReceiver;
use crate::store::{DocumentStore, StoreError, TransactionOutcome, TxDecision};
use crate::utils::random_draw::draw;
use kanau::processor::Processor;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::Arc;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Sweep every event due for its initial draw as of `now`.
#[derive(Debug, Clone, Copy)]
pub struct SelectionSweep {
    pub now: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Events that looked due when listed.
    pub examined: usize,
    pub drawn: usize,
    /// Already drawn (or nothing to draw) by the time the transaction ran.
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitialDrawOutcome {
    Drawn { winners: EntrantSet },
    /// Winners already exist, or the pool is empty.
    Skipped,
    /// Enrollment is still open.
    NotYetClosed,
}

#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

pub struct SelectionScheduler<S> {
    store: Arc<S>,
}

impl<S: DocumentStore> SelectionScheduler<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Draw the initial winners of one event.
    pub async fn draw_initial(
        &self,
        event: &Event,
        now: OffsetDateTime,
    ) -> Result<InitialDrawOutcome, SelectionError> {
        let event_id = event.id;
        if event.status(now) == EventStatus::Open {
            debug!(%event_id, "Enrollment still open, not drawing");
            return Ok(InitialDrawOutcome::NotYetClosed);
        }

        let selection_limit = event.selection_limit as usize;
        let mut rng = StdRng::from_rng(&mut rand::rng());
        let mut winners = EntrantSet::new();
        let mut body = |projection: &SelectionProjection| {
            if !projection.selected.is_empty() {
                return TxDecision::Abort;
            }
            let pool: EntrantSet = projection
                .enrolled
                .difference(&projection.cancelled)
                .cloned()
                .collect();
            winners = draw(&pool, selection_limit, &mut rng);
            if winners.is_empty() {
                TxDecision::Abort
            } else {
                TxDecision::Commit(winners.clone())
            }
        };

        match self.store.transact_selection(event_id, &mut body).await {
            TransactionOutcome::Committed => {
                info!(%event_id, winners = winners.len(), selection_limit, "Drew initial winners");
                Ok(InitialDrawOutcome::Drawn { winners })
            }
            TransactionOutcome::AbortedBenign => {
                debug!(%event_id, "Event already drawn or has no eligible entrants");
                Ok(InitialDrawOutcome::Skipped)
            }
            TransactionOutcome::Failed(e) => Err(e.into()),
        }
    }

    /// Draw every due event. One event failing does not stop the others.
    pub async fn sweep(&self, now: OffsetDateTime) -> Result<SweepReport, SelectionError> {
        let due = self.store.events_awaiting_selection(now).await?;
        let mut report = SweepReport {
            examined: due.len(),
            ..Default::default()
        };

        for event in &due {
            match self.draw_initial(event, now).await {
                Ok(InitialDrawOutcome::Drawn { .. }) => report.drawn += 1,
                Ok(_) => report.skipped += 1,
                Err(e) => {
                    error!(event_id = %event.id, error = %e, "Initial draw failed");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    async fn sweep_and_log(&self, trigger: &'static str, now: OffsetDateTime) {
        match self.sweep(now).await {
            Ok(report) => info!(
                trigger,
                examined = report.examined,
                drawn = report.drawn,
                skipped = report.skipped,
                failed = report.failed,
                "Selection sweep complete"
            ),
            Err(e) => error!(trigger, error = %e, "Selection sweep failed"),
        }
    }

    /// Run the scheduler until shutdown.
    ///
    /// A configuration change restarts the interval from the moment of
    /// the change.
    pub async fn run(
        self,
        mut shutdown_rx: watch::Receiver<bool>,
        mut sweep_rx: SelectionSweepReceiver,
        mut config: ConfigWatcher<SchedulerConfig>,
    ) {
        let initial = config.current();
        let mut interval = initial.interval;
        info!(interval_secs = interval.as_secs(), "SelectionScheduler started");

        if initial.sweep_on_start {
            self.sweep_and_log("startup", OffsetDateTime::now_utc()).await;
        }
        let mut next_sweep = Instant::now() + interval;

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("SelectionScheduler received shutdown signal");
                        break;
                    }
                }

                Some(updated) = config.changed() => {
                    interval = updated.interval;
                    next_sweep = Instant::now() + interval;
                    info!(interval_secs = interval.as_secs(), "Scheduler interval updated");
                }

                Some(request) = sweep_rx.recv() => {
                    self.sweep_and_log("manual", request.requested_at).await;
                }

                _ = tokio::time::sleep_until(next_sweep) => {
                    self.sweep_and_log("interval", OffsetDateTime::now_utc()).await;
                    next_sweep = Instant::now() + interval;
                }

                else => {
                    warn!("SelectionScheduler inputs closed");
                    break;
                }
            }
        }

        info!("SelectionScheduler stopped");
    }
}

impl<S: DocumentStore> Processor<SelectionSweep> for SelectionScheduler<S> {
    type Output = SweepReport;
    type Error = SelectionError;

    async fn process(&self, sweep: SelectionSweep) -> Result<SweepReport, SelectionError> {
        self.sweep(sweep.now).await
    }
}
