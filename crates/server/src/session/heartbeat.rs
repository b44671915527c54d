// Per-session lease heartbeat.
//
// One task per editing session. It renews the lease every interval and, on
// the first lease loss, publishes a read-only snapshot and exits. Transient
// backend failures are retried on the next tick.

use std::sync::Arc;
use std::time::Duration;

use inkwell_common::protocol::http::LeaseGrant;
use inkwell_common::types::DocumentKey;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{lease_loss, ModeSnapshot};
use crate::lock::{LockError, LockManager};

/// Handle for a running heartbeat task. Cancellation happens at most once;
/// dropping the handle cancels the task.
pub(crate) struct HeartbeatHandle {
    shutdown_tx: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl HeartbeatHandle {
    pub(crate) fn spawn(
        locks: LockManager,
        key: DocumentKey,
        identity: String,
        interval: Duration,
        mode_tx: Arc<watch::Sender<ModeSnapshot>>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(heartbeat_loop(locks, key, identity, interval, mode_tx, shutdown_rx));
        Self { shutdown_tx: Some(shutdown_tx), task: Some(task) }
    }

    pub(crate) fn cancel(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(true);
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.shutdown_tx.is_none()
    }

    /// Cancel and wait until no heartbeat is in flight.
    pub(crate) async fn stop(mut self) {
        self.cancel();
        if let Some(task) = self.task.take() {
            if let Err(error) = task.await {
                warn!(error = %error, "heartbeat task ended abnormally");
            }
        }
    }
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn heartbeat_loop(
    locks: LockManager,
    key: DocumentKey,
    identity: String,
    interval: Duration,
    mode_tx: Arc<watch::Sender<ModeSnapshot>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {},
            _ = shutdown_rx.changed() => {
                debug!(%key, identity = %identity, "heartbeat loop shutting down");
                break;
            }
        }

        match locks.heartbeat(&key, &identity).await {
            Ok(granted) => {
                if granted.grant != LeaseGrant::Renewed {
                    info!(%key, identity = %identity, "expired lease re-acquired by heartbeat");
                }
            }
            Err(LockError::BackendUnavailable(message)) => {
                warn!(%key, identity = %identity, error = %message, "heartbeat failed; retrying next tick");
            }
            Err(lock_error) => {
                if *shutdown_rx.borrow() {
                    break;
                }
                match lease_loss(&lock_error) {
                    Some((reason, holder)) => {
                        warn!(%key, identity = %identity, ?reason, holder = ?holder, "lease lost; session is now read-only");
                        mode_tx.send_replace(ModeSnapshot::read_only(holder, reason));
                    }
                    None => error!(%key, identity = %identity, error = %lock_error, "heartbeat rejected"),
                }
                break;
            }
        }
    }
}
