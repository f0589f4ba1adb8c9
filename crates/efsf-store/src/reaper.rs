use std::sync::Weak;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::store::StoreInner;

/// Handle to the background expiry task.
///
/// The task holds only a weak reference to the store, so dropping the last
/// store handle ends it even without an explicit shutdown.
pub(crate) struct ReaperHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReaperHandle {
    pub(crate) fn spawn(inner: Weak<StoreInner>, every: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run(inner, every, shutdown_rx));
        Self { shutdown_tx, task }
    }

    /// Signals the task and waits for the sweep in flight, if any, to finish.
    pub(crate) async fn stop(self) -> Result<(), tokio::task::JoinError> {
        let _ = self.shutdown_tx.send(true);
        self.task.await
    }
}

async fn run(inner: Weak<StoreInner>, every: Duration, mut shutdown_rx: watch::Receiver<bool>) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick completes immediately; nothing can be expired yet.
    ticker.tick().await;

    debug!(interval_ms = every.as_millis() as u64, "reaper started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
                continue;
            }
        }

        let Some(store) = inner.upgrade() else {
            break;
        };
        if store.is_closed() {
            break;
        }

        let report = store.sweep().await;
        if report.failures > 0 {
            warn!(
                destroyed = report.destroyed,
                orphans_purged = report.orphans_purged,
                failures = report.failures,
                "reaper sweep had failures"
            );
        } else if !report.is_empty() {
            info!(
                destroyed = report.destroyed,
                orphans_purged = report.orphans_purged,
                "reaper sweep"
            );
        }
    }

    debug!("reaper stopped");
}
