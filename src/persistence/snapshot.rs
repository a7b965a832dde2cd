//! Point-in-Time Snapshots
//!
//! Durability half two: the full value map and expiry map, serialized with
//! bincode into a single file. A snapshot is written to a temporary sibling
//! and atomically renamed into place, so a crash mid-write can never leave a
//! half-snapshot where the loader will find it.
//!
//! On boot the snapshot (if present) is installed first; command-log replay
//! is then applied on top. Deadlines are stored as absolute unix seconds and
//! re-evaluated at load time.
//!
//! [`Snapshotter`] runs the periodic background dump. Failures are logged
//! and retried on the next tick — a missed snapshot widens the replay
//! window but loses nothing.

use crate::storage::{Store, Value};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Default interval between background snapshots.
pub const DEFAULT_SNAPSHOT_INTERVAL: Duration = Duration::from_secs(10);

/// Errors from writing or reading a snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot codec error: {0}")]
    Codec(#[from] bincode::Error),
}

/// The serialized form: both maps, exactly as the store holds them.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub data: HashMap<Bytes, Value>,
    pub expiry: HashMap<Bytes, i64>,
}

/// Serializes a snapshot to `path` via a temporary file and atomic rename.
pub fn write(path: &Path, snapshot: &Snapshot) -> Result<(), SnapshotError> {
    let tmp = tmp_path(path);
    {
        let file = File::create(&tmp)?;
        let mut writer = BufWriter::new(file);
        bincode::serialize_into(&mut writer, snapshot)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Deserializes a snapshot from `path`.
pub fn read(path: &Path) -> Result<Snapshot, SnapshotError> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    Ok(bincode::deserialize_from(reader)?)
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// A handle to the periodic snapshot task. Dropping the handle stops it.
#[derive(Debug)]
pub struct Snapshotter {
    shutdown_tx: watch::Sender<bool>,
}

impl Snapshotter {
    /// Starts the background snapshotter over the given store.
    pub fn start(store: Arc<Store>, path: PathBuf, interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(snapshot_loop(store, path, interval, shutdown_rx));
        info!(interval_secs = interval.as_secs(), "snapshotter started");
        Self { shutdown_tx }
    }

    /// Stops the snapshotter. Called automatically on drop.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for Snapshotter {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn snapshot_loop(
    store: Arc<Store>,
    path: PathBuf,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("snapshotter received shutdown signal");
                    return;
                }
            }
        }
        // The select may pick the timer even when shutdown was signaled.
        if *shutdown_rx.borrow() {
            return;
        }

        match store.save_snapshot(&path) {
            Ok(()) => debug!(keys = store.len(), "snapshot written"),
            Err(e) => warn!(error = %e, "snapshot failed, will retry next interval"),
        }
    }
}
