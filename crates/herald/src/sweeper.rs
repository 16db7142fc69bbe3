//! Process-wide expiry sweep.

use crate::catalog::{now_secs, Catalog};
use herald_store::StoreResult;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Periodically deletes messages whose `ttl_at` has passed, delivered or not.
pub struct ExpirySweeper {
    catalog: Catalog,
    interval: Duration,
}

impl ExpirySweeper {
    pub fn new(catalog: Catalog, interval: Duration) -> Self {
        Self { catalog, interval }
    }

    /// One sweep. Returns the number of messages removed.
    pub async fn sweep_once(&self) -> StoreResult<u64> {
        self.catalog.purge_expired(now_secs()).await
    }

    /// Sweep every interval until cancelled. A failed sweep is logged and
    /// the next one runs as scheduled.
    pub async fn run(self, cancel: CancellationToken) {
        info!(interval_secs = self.interval.as_secs_f64(), "expiry sweeper started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.sweep_once().await {
                Ok(0) => {}
                Ok(removed) => debug!(removed, "expired messages purged"),
                Err(e) => error!(error = %e, "expiry sweep failed"),
            }
        }

        info!("expiry sweeper stopped");
    }
}
