//! Server Assembly and Boot
//!
//! Wires the pieces together in the order the recovery contract demands:
//!
//! 1. Open the command log (create if absent)
//! 2. Create an empty store
//! 3. Install the snapshot, if one exists
//! 4. Replay the command log — no log attached, no session, so neither
//!    re-appending nor pub/sub effects can occur
//! 5. Attach the log; live mutations append from here on
//! 6. Start the expiry sweeper and the snapshotter
//! 7. Accept connections
//!
//! On shutdown a final snapshot is written best-effort.

use crate::commands::Dispatcher;
use crate::connection::{handle_connection, ConnectionMetrics};
use crate::persistence::{CommandLog, Snapshotter, DEFAULT_SNAPSHOT_INTERVAL};
use crate::pubsub::PubSub;
use crate::storage::{ExpirySweeper, Store};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Everything the server needs to come up.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP listen address.
    pub addr: String,
    /// Command log file.
    pub log_path: PathBuf,
    /// Snapshot file.
    pub snapshot_path: PathBuf,
    /// Interval between background snapshots.
    pub snapshot_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: format!("{}:{}", crate::DEFAULT_HOST, crate::DEFAULT_PORT),
            log_path: PathBuf::from("commands.log"),
            snapshot_path: PathBuf::from("dump.db"),
            snapshot_interval: DEFAULT_SNAPSHOT_INTERVAL,
        }
    }
}

/// A bootstrapped server: recovered store, shared dispatcher, and running
/// background tasks.
pub struct Server {
    config: ServerConfig,
    store: Arc<Store>,
    dispatcher: Dispatcher,
    metrics: Arc<ConnectionMetrics>,
    _sweeper: ExpirySweeper,
    _snapshotter: Snapshotter,
}

impl Server {
    /// Runs the boot sequence. Must be called inside a Tokio runtime (the
    /// background tasks are spawned here).
    pub fn bootstrap(config: ServerConfig) -> std::io::Result<Self> {
        let log = Arc::new(CommandLog::open(&config.log_path)?);
        let store = Arc::new(Store::new());

        if config.snapshot_path.exists() {
            match store.load_snapshot(&config.snapshot_path) {
                Ok(()) => info!(keys = store.len(), "snapshot loaded"),
                Err(e) => warn!(error = %e, "snapshot load failed, starting from the log alone"),
            }
        } else {
            info!("no snapshot found");
        }

        let pubsub = Arc::new(PubSub::new());
        let dispatcher = Dispatcher::new(
            Arc::clone(&store),
            pubsub,
            Some(config.snapshot_path.clone()),
        );

        match CommandLog::replay(&config.log_path, |request| {
            dispatcher.execute(&request, None);
        }) {
            Ok(stats) => {
                if stats.truncated_tail {
                    // Drop the damaged tail before any new record lands
                    // behind it.
                    if let Err(e) = log.truncate_to(stats.valid_len) {
                        warn!(error = %e, "could not trim damaged log tail");
                    }
                }
                info!(
                    applied = stats.applied,
                    truncated_tail = stats.truncated_tail,
                    "command log replayed"
                );
            }
            Err(e) => warn!(error = %e, "log replay stopped early, continuing with recovered state"),
        }

        store.attach_log(log);

        let sweeper = ExpirySweeper::start(Arc::clone(&store));
        let snapshotter = Snapshotter::start(
            Arc::clone(&store),
            config.snapshot_path.clone(),
            config.snapshot_interval,
        );

        Ok(Self {
            config,
            store,
            dispatcher,
            metrics: Arc::new(ConnectionMetrics::new()),
            _sweeper: sweeper,
            _snapshotter: snapshotter,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn metrics(&self) -> &Arc<ConnectionMetrics> {
        &self.metrics
    }

    /// Binds the configured address.
    pub async fn bind(&self) -> std::io::Result<TcpListener> {
        let listener = TcpListener::bind(&self.config.addr).await?;
        info!(addr = %self.config.addr, "listening");
        Ok(listener)
    }

    /// Accepts connections forever, one handler task per client.
    pub async fn run(&self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    tokio::spawn(handle_connection(
                        stream,
                        addr,
                        self.dispatcher.clone(),
                        Arc::clone(&self.metrics),
                    ));
                }
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                }
            }
        }
    }

    /// Writes a final snapshot on the way out. Best-effort.
    pub fn final_snapshot(&self) {
        match self.store.save_snapshot(&self.config.snapshot_path) {
            Ok(()) => info!("final snapshot written"),
            Err(e) => warn!(error = %e, "final snapshot failed"),
        }
    }
}
