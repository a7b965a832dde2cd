//! Background Expiry Sweeper
//!
//! Lazy eviction only reclaims a key when something touches it; a key that
//! expires and is never accessed again would sit in memory forever. The
//! sweeper closes that gap: once per second it scans the expiry map under
//! the write lock and removes every entry whose deadline has passed.
//!
//! Lazy eviction is still required for correctness — within the one-second
//! window between sweeps a client must not be able to observe an expired
//! key, and the store's own access paths guarantee that.

use crate::storage::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// Interval between sweeps.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// A handle to the running sweeper task. Dropping the handle stops the
/// sweeper.
#[derive(Debug)]
pub struct ExpirySweeper {
    shutdown_tx: watch::Sender<bool>,
}

impl ExpirySweeper {
    /// Starts the sweeper as a background task over the given store.
    pub fn start(store: Arc<Store>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(sweeper_loop(store, shutdown_rx));
        info!("expiry sweeper started");
        Self { shutdown_tx }
    }

    /// Stops the sweeper. Called automatically on drop.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sweeper_loop(store: Arc<Store>, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(SWEEP_INTERVAL) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("expiry sweeper received shutdown signal");
                    return;
                }
            }
        }
        // The select may pick the timer even when shutdown was signaled.
        if *shutdown_rx.borrow() {
            return;
        }

        let reclaimed = store.purge_expired();
        if reclaimed > 0 {
            debug!(reclaimed, remaining = store.len(), "expired keys reclaimed");
        }
    }
}
