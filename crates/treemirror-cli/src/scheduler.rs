//! Periodic pass scheduling

use crate::oplog::OperationLog;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use treemirror_sync::{ReconcileOptions, Reconciler};
use treemirror_types::{Error, PassStats, Result};

/// Runs reconciliation passes at a fixed interval until cancelled.
///
/// Passes never overlap: a pass that outlasts the interval delays the next
/// one instead of queueing a burst.
pub struct Scheduler {
    reconciler: Reconciler,
    source: PathBuf,
    replica: PathBuf,
    interval: Duration,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(
        source: PathBuf,
        replica: PathBuf,
        interval: Duration,
        options: ReconcileOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            reconciler: Reconciler::with_options(options).with_cancellation(cancel.clone()),
            source,
            replica,
            interval,
            cancel,
        }
    }

    /// Run one pass, logging its events and any error that stopped it
    pub async fn run_pass<W: Write>(&self, log: &mut OperationLog<W>) -> Result<PassStats> {
        let result = self.reconciler.run(&self.source, &self.replica, log).await;
        if let Err(error) = &result {
            if !matches!(error, Error::Cancelled) {
                log.error(&error.to_string());
            }
        }
        result
    }

    /// Run passes until cancelled; returns the number of passes started.
    ///
    /// Recoverable errors are logged and retried at the next tick. An
    /// unrecoverable one ends the loop.
    pub async fn run<W: Write>(&self, log: &mut OperationLog<W>) -> Result<u64> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut passes = 0;

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            passes += 1;
            match self.run_pass(log).await {
                Ok(stats) if stats.failures > 0 => {
                    warn!(
                        "Pass {} left {} subtree(s) unreconciled; retrying in {:?}",
                        passes, stats.failures, self.interval
                    );
                }
                Ok(_) => {}
                Err(Error::Cancelled) => break,
                Err(error) if error.is_recoverable() => {
                    warn!("Pass {} failed: {}; retrying in {:?}", passes, error, self.interval);
                }
                Err(error) => return Err(error),
            }
        }

        info!("Stopped after {} pass(es)", passes);
        Ok(passes)
    }
}
