//! Periodic expiry scanning

use crate::{AllocationEngine, ReleaseOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Drives the engine's expiry scan on a fixed interval and forwards
/// every auto-release so the daemon can announce it.
pub struct ExpiryScheduler {
    engine: Arc<AllocationEngine>,
    interval: Duration,
}

impl ExpiryScheduler {
    pub fn new(engine: Arc<AllocationEngine>, interval: Duration) -> Self {
        Self { engine, interval }
    }

    /// One sweep. Scan failures are logged, not propagated; the next
    /// tick retries.
    pub fn scan_once(&self) -> Vec<ReleaseOutcome> {
        match self.engine.run_expiry_scan() {
            Ok(outcomes) => {
                if !outcomes.is_empty() {
                    debug!(expired = outcomes.len(), "Expiry scan closed sessions");
                }
                outcomes
            }
            Err(e) => {
                warn!(error = %e, "Expiry scan failed");
                Vec::new()
            }
        }
    }

    /// Run until the receiving side of `expired_tx` is dropped.
    pub async fn run(&self, expired_tx: mpsc::UnboundedSender<ReleaseOutcome>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            for outcome in self.scan_once() {
                if expired_tx.send(outcome).is_err() {
                    return;
                }
            }
        }
    }
}
