//! Background refresh scheduler.
//!
//! Every interval, refreshes the registry's pollable queries through an
//! injected executor and sweeps expired cache entries. Ticks are skipped
//! while the application is hidden or the rate-limit gate is set; there is
//! no catch-up burst when either condition clears, the next scheduled tick
//! simply runs.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use tally_cache::CacheStore;
use tally_registry::{QueryKey, QueryName, QueryRegistry};

use crate::error::SyncError;
use crate::gates::{RateLimitGate, VisibilityGate};

/// Refreshes one pollable query. Injected so the scheduler stays decoupled
/// from the fetch path and tests can substitute recording closures.
pub type PollExecutor = Box<
    dyn Fn(QueryName) -> Pin<Box<dyn Future<Output = Result<(), SyncError>> + Send>> + Send + Sync,
>;

/// Periodic refresh of pollable queries plus cache garbage collection.
pub struct SyncScheduler<V> {
    store: Arc<CacheStore<QueryKey, V>>,
    registry: Arc<QueryRegistry>,
    rate_gate: Arc<RateLimitGate>,
    visibility: Arc<VisibilityGate>,
    interval: Duration,
}

impl<V> SyncScheduler<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(
        store: Arc<CacheStore<QueryKey, V>>,
        registry: Arc<QueryRegistry>,
        rate_gate: Arc<RateLimitGate>,
        visibility: Arc<VisibilityGate>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            rate_gate,
            visibility,
            interval,
        }
    }

    /// Run one refresh pass over the pollable queries.
    ///
    /// Returns the number of queries refreshed, or `RateLimited` without
    /// calling the executor while the gate is set. A hidden application
    /// refreshes nothing but is not an error. Per-query failures are
    /// logged and do not stop the pass.
    #[tracing::instrument(skip_all)]
    pub async fn try_tick(&self, executor: &PollExecutor) -> Result<usize, SyncError> {
        if self.rate_gate.is_limited() {
            return Err(SyncError::RateLimited);
        }
        if !self.visibility.is_visible() {
            debug!("application hidden, skipping refresh pass");
            return Ok(0);
        }

        let mut refreshed = 0;
        for name in self.registry.pollable_queries() {
            match executor(name).await {
                Ok(()) => refreshed += 1,
                Err(err) => {
                    warn!(query = %name, error = %err, "scheduled refresh failed");
                    if err.is_rate_limited() {
                        self.rate_gate.set();
                        break;
                    }
                }
            }
        }
        debug!(refreshed, "refresh pass finished");
        Ok(refreshed)
    }

    /// Run the scheduler until `shutdown_rx` flips to true.
    ///
    /// Sleeps a full interval before the first pass; cache sweeps run on
    /// every tick even when the refresh pass is gated off.
    #[tracing::instrument(skip_all)]
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>, executor: PollExecutor) {
        info!(interval_secs = self.interval.as_secs(), "sync scheduler started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    self.store.sweep(Utc::now());
                    match self.try_tick(&executor).await {
                        Ok(_) => {}
                        Err(SyncError::RateLimited) => {
                            debug!("rate limited, skipping refresh pass");
                        }
                        Err(err) => {
                            warn!(error = %err, "refresh pass failed");
                        }
                    }
                }
                result = shutdown_rx.changed() => {
                    if result.is_err() || *shutdown_rx.borrow() {
                        info!("sync scheduler stopped");
                        break;
                    }
                }
            }
        }
    }
}
