// Periodic eviction of expired leases.
//
// Expiry is already enforced lazily by every lease operation; the sweep only
// keeps the table from accumulating rows for documents nobody touches again.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::LockManager;

/// Handle for the sweep task. Dropping the handle leaves the task running
/// until the runtime shuts down; call [`SweepHandle::shutdown`] to stop it.
pub struct SweepHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweepHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(error) = self.task.await {
            warn!(error = %error, "lease sweep task ended abnormally");
        }
    }
}

pub fn start_lease_sweep(locks: LockManager, interval: Duration) -> SweepHandle {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(sweep_loop(locks, interval, shutdown_rx));
    SweepHandle { shutdown_tx, task }
}

async fn sweep_loop(locks: LockManager, interval: Duration, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {},
            _ = shutdown_rx.changed() => {
                debug!("lease sweep shutting down");
                break;
            }
        }

        match locks.evict_expired().await {
            Ok(0) => {}
            Ok(evicted) => debug!(evicted, "evicted expired leases"),
            Err(error) => warn!(error = %error, "lease sweep failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use inkwell_common::types::DocumentKey;

    use super::*;
    use crate::lock::LockError;

    #[tokio::test(start_paused = true)]
    async fn sweep_evicts_expired_leases_and_stops_on_shutdown() {
        let locks = LockManager::memory(Duration::from_secs(90));
        let key = DocumentKey::new("team-docs", "notes/a.md").unwrap();
        let past = Utc::now() - chrono::Duration::seconds(600);
        locks.acquire_at(&key, "alice", Duration::from_secs(1), past).await.unwrap();

        let sweep = start_lease_sweep(locks.clone(), Duration::from_secs(5));
        tokio::time::sleep(Duration::from_secs(6)).await;

        // An evicted lease leaves no row for its holder to renew.
        assert_eq!(locks.heartbeat(&key, "alice").await, Err(LockError::NotFound));
        sweep.shutdown().await;
    }
}
