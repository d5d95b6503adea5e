//! EventChangeRouter processor.
//!
//! Invoked on every entrant document update. Two independent predicates
//! decide what runs:
//!
//! - the cancelled set grew: refill winner slots (`RedrawCoordinator`)
//! - the selected set grew: announce winners (`NotificationDispatcher`)
//!
//! Both may fire for the same update and run concurrently. Each change is
//! handled in its own task, so updates for the same event may be routed in
//! parallel; the downstream transactions take care of the overlap.
//!
//! The change feed delivers an update once. A processor that fails with a
//! transient store error is run again with capped exponential backoff; both
//! processors are idempotent, so a repeat never double-writes.

use crate::entities::EntrantSet;
use crate::events::{EntrantsChanged, EntrantsChangedReceiver};
use crate::processors::notification_dispatcher::{
    DispatchError, DispatchOutcome, NotificationDispatcher, WinnersNotificationRequest,
};
use crate::processors::redraw_coordinator::{RedrawCoordinator, RedrawError, RedrawOutcome};
use crate::store::DocumentStore;
use crate::utils::retry::RetryPolicy;
use evently_sdk::objects::EventId;
use kanau::processor::Processor;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// What an entrant update calls for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutePlan {
    pub redraw: bool,
    /// Set when winners should be announced: the selected set before the update.
    pub notify_winners: Option<EntrantSet>,
}

impl RoutePlan {
    pub fn for_change(change: &EntrantsChanged) -> Self {
        let redraw = !change.after.cancelled_since(&change.before).is_empty();
        let notify_winners = (!change.after.selected_since(&change.before).is_empty())
            .then(|| change.before.selected_entrants.clone());
        Self {
            redraw,
            notify_winners,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.redraw && self.notify_winners.is_none()
    }
}

/// Results of the processors a change was routed to. After retries, each
/// holds the result of the last attempt.
#[derive(Debug, Default)]
pub struct RouteReport {
    pub redraw: Option<Result<RedrawOutcome, RedrawError>>,
    pub notification: Option<Result<DispatchOutcome, DispatchError>>,
    /// Rounds run, the first one included.
    pub attempts: u32,
}

impl RouteReport {
    /// The part of `plan` that failed transiently.
    fn retry_plan(&self, plan: &RoutePlan) -> RoutePlan {
        RoutePlan {
            redraw: matches!(&self.redraw, Some(Err(e)) if e.is_transient()),
            notify_winners: match &self.notification {
                Some(Err(e)) if e.is_transient() => plan.notify_winners.clone(),
                _ => None,
            },
        }
    }

    fn absorb(&mut self, round: RouteReport) {
        if round.redraw.is_some() {
            self.redraw = round.redraw;
        }
        if round.notification.is_some() {
            self.notification = round.notification;
        }
        self.attempts += round.attempts;
    }
}

pub struct EventChangeRouter<S> {
    redraw: Arc<RedrawCoordinator<S>>,
    dispatcher: Arc<NotificationDispatcher<S>>,
    retry: RetryPolicy,
}

impl<S: DocumentStore + 'static> EventChangeRouter<S> {
    pub fn new(
        redraw: Arc<RedrawCoordinator<S>>,
        dispatcher: Arc<NotificationDispatcher<S>>,
    ) -> Self {
        Self {
            redraw,
            dispatcher,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Route a change once.
    pub async fn route(&self, change: EntrantsChanged) -> RouteReport {
        let event_id = change.event_id;
        let plan = RoutePlan::for_change(&change);
        if plan.is_empty() {
            debug!(%event_id, "Entrant update needs no action");
            return RouteReport::default();
        }
        self.execute(event_id, &plan).await
    }

    /// Route a change, running transiently failed processors again until
    /// they succeed or the retry policy gives up.
    pub async fn route_with_retry(&self, change: EntrantsChanged) -> RouteReport {
        let event_id = change.event_id;
        let mut plan = RoutePlan::for_change(&change);
        let mut report = RouteReport::default();
        if plan.is_empty() {
            debug!(%event_id, "Entrant update needs no action");
            return report;
        }

        loop {
            let round = self.execute(event_id, &plan).await;
            plan = round.retry_plan(&plan);
            report.absorb(round);
            if plan.is_empty() || !self.retry.allows_another(report.attempts) {
                return report;
            }
            let delay = self.retry.delay(report.attempts);
            warn!(
                %event_id,
                attempt = report.attempts,
                ?delay,
                redraw = plan.redraw,
                notify = plan.notify_winners.is_some(),
                "Entrant update failed transiently, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn execute(&self, event_id: EventId, plan: &RoutePlan) -> RouteReport {
        debug!(%event_id, redraw = plan.redraw, notify = plan.notify_winners.is_some(), "Routing entrant update");

        let redraw = async {
            if plan.redraw {
                Some(self.redraw.redraw(event_id).await)
            } else {
                None
            }
        };
        let notification = async {
            match plan.notify_winners.clone() {
                Some(previous_selected) => Some(
                    self.dispatcher
                        .dispatch_winners(WinnersNotificationRequest {
                            event_id,
                            previous_selected,
                        })
                        .await,
                ),
                None => None,
            }
        };
        let (redraw, notification) = tokio::join!(redraw, notification);

        RouteReport {
            redraw,
            notification,
            attempts: 1,
        }
    }

    /// Run the router until shutdown, one task per change.
    pub async fn run(
        self: Arc<Self>,
        mut shutdown_rx: watch::Receiver<bool>,
        mut entrants_rx: EntrantsChangedReceiver,
    ) {
        info!("EventChangeRouter started");

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("EventChangeRouter received shutdown signal");
                        break;
                    }
                }

                Some(change) = entrants_rx.recv() => {
                    let router = self.clone();
                    tokio::spawn(async move {
                        let event_id = change.event_id;
                        let report = router.route_with_retry(change).await;
                        if let Some(Err(e)) = &report.redraw {
                            error!(%event_id, attempts = report.attempts, error = %e, "Redraw failed");
                        }
                        if let Some(Err(e)) = &report.notification {
                            error!(%event_id, attempts = report.attempts, error = %e, "Winners notification failed");
                        }
                    });
                }

                else => {
                    warn!("EntrantsChanged channel closed");
                    break;
                }
            }
        }

        info!("EventChangeRouter stopped");
    }
}

impl<S: DocumentStore + 'static> Processor<EntrantsChanged> for EventChangeRouter<S> {
    type Output = RouteReport;
    type Error = Infallible;

    async fn process(&self, change: EntrantsChanged) -> Result<RouteReport, Infallible> {
        Ok(self.route(change).await)
    }
}
