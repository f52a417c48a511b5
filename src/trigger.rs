//! Background pass triggers.
//!
//! Container events and the resync timer do not run passes themselves.
//! They post to a channel of capacity one drained by a single worker, so
//! any burst that arrives while a pass is running collapses into one
//! follow-up pass.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{interval, MissedTickBehavior};

use crate::engine::Reconciler;

pub fn channel() -> (mpsc::Sender<()>, mpsc::Receiver<()>) {
    mpsc::channel(1)
}

/// Queues a pass.  Returns `false` once the worker is gone.
pub fn notify(tx: &mpsc::Sender<()>) -> bool {
    match tx.try_send(()) {
        Ok(()) | Err(TrySendError::Full(())) => true,
        Err(TrySendError::Closed(())) => false,
    }
}

/// Runs a pass per queued trigger until every sender is dropped.
pub async fn run_worker(engine: Arc<Reconciler>, mut rx: mpsc::Receiver<()>) {
    while rx.recv().await.is_some() {
        // Failures are logged by the engine; the next trigger retries.
        if let Ok(report) = engine.reconcile(None).await {
            debug!("Background pass applied {} mutations", report.mutations());
        }
    }
    info!("Trigger channel closed, worker exiting");
}

/// Queues a pass every `every`.  The first tick is skipped since a pass
/// already runs at startup.
pub async fn run_resync(every: Duration, tx: mpsc::Sender<()>) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if !notify(&tx) {
            break;
        }
    }
}
