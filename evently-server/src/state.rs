//! Application state shared across all request handlers.

use evently_core::events::{SelectionSweepRequested, SelectionSweepSender};
use sqlx::PgPool;

/// Application state that is shared across all request handlers.
///
/// This is cloneable and cheap to pass around.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub db: PgPool,
    sweep_tx: SelectionSweepSender,
}

impl AppState {
    pub fn new(db: PgPool, sweep_tx: SelectionSweepSender) -> Self {
        Self { db, sweep_tx }
    }

    /// Ask the scheduler for an immediate sweep. `false` if it has stopped.
    pub async fn request_sweep(&self) -> bool {
        self.sweep_tx.send(SelectionSweepRequested::now()).await.is_ok()
    }
}
