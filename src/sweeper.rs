//! Periodic cleanup of expired sessions, nonces and idle token buckets.
//!
//! Lookups already drop what they touch; this bounds memory for keys that are
//! never looked up again.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::state::AppState;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub sessions: usize,
    pub nonces: usize,
    pub buckets: usize,
}

/// Runs one cleanup pass over all three maps.
pub async fn sweep_once(state: &AppState) -> SweepReport {
    SweepReport {
        sessions: state.sessions.sweep_expired().await,
        nonces: state.nonces.purge_expired().await,
        buckets: state.limiter.cleanup_idle().await,
    }
}

/// Spawns the cleanup loop; it exits when `cancel` fires.
pub fn spawn(state: AppState, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let report = sweep_once(&state).await;
                    if report != SweepReport::default() {
                        tracing::debug!(
                            sessions = report.sessions,
                            nonces = report.nonces,
                            buckets = report.buckets,
                            "sweeper.pass"
                        );
                    }
                }
            }
        }
        tracing::debug!("sweeper.stopped");
    })
}
