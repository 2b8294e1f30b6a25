//! Reconciliation sweep.
//!
//! A periodic pass over every persisted grant that re-arms missing timers and
//! sends reminders. It is the safety net for timers lost to a crash or a
//! failed task: a row whose timer is missing gets one again, and an already
//! expired row fires immediately, so staleness is bounded by one period.

use std::future::Future;
use std::time::Duration;

use tokio::time::MissedTickBehavior;

use rolelease_core::GrantKey;
use rolelease_store::{GrantStore, HistoryLog};

use crate::engine::GrantEngine;

/// Counts from one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Rows read from the store.
    pub scanned: usize,
    /// Timers armed because none was live for the row's expiry.
    pub rearmed: usize,
    /// Reminders delivered.
    pub reminded: usize,
    /// Live timers cancelled because their row is gone.
    pub orphaned: usize,
    /// Rows (or the scan itself) that failed and were skipped.
    pub failed: usize,
}

/// Drives [`GrantEngine`] reconciliation on a fixed period.
pub struct ReconciliationSweep<S> {
    engine: GrantEngine<S>,
    period: Duration,
}

impl<S> ReconciliationSweep<S>
where
    S: GrantStore + HistoryLog + 'static,
{
    /// A sweep running at the engine policy's period.
    pub fn new(engine: GrantEngine<S>) -> Self {
        let period = engine.policy().sweep_period();
        Self { engine, period }
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Run one pass at `now`.
    ///
    /// A failing row is logged and counted; the pass continues.
    pub async fn run_once(&self, now: i64) -> SweepReport {
        let mut report = SweepReport::default();

        let rows = match self.engine.store().scan_all().await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!(error = %e, "sweep scan failed");
                report.failed += 1;
                return report;
            }
        };
        report.scanned = rows.len();

        let mut live: Vec<GrantKey> = Vec::with_capacity(rows.len());
        for grant in &rows {
            let key = grant.key();

            let mut failed = false;
            match self.engine.rearm_if_missing(&key).await {
                Ok(true) => report.rearmed += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(subject = %key.subject, kind = %key.kind, error = %e, "re-arm failed");
                    failed = true;
                }
            }

            match self.engine.remind_if_due(&key, now).await {
                Ok(true) => report.reminded += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(subject = %key.subject, kind = %key.kind, error = %e, "reminder failed");
                    failed = true;
                }
            }

            if failed {
                report.failed += 1;
            }
            live.push(key);
        }

        live.sort();
        for key in self.engine.armed_keys() {
            if live.binary_search(&key).is_ok() {
                continue;
            }
            match self.engine.cancel_orphan(&key).await {
                Ok(true) => report.orphaned += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(subject = %key.subject, kind = %key.kind, error = %e, "orphan check failed");
                    report.failed += 1;
                }
            }
        }

        let pruned = self.engine.prune_locks();
        tracing::debug!(pruned, "idle key locks pruned");

        report
    }

    /// Run a pass immediately and then once per period until `shutdown`
    /// resolves.
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("sweep stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let report = self.run_once(self.engine.now()).await;
                    tracing::info!(
                        scanned = report.scanned,
                        rearmed = report.rearmed,
                        reminded = report.reminded,
                        orphaned = report.orphaned,
                        failed = report.failed,
                        "sweep finished"
                    );
                }
            }
        }
    }
}
