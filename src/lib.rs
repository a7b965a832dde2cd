//! # voltkv — A Persistent, Typed In-Memory Key-Value Server
//!
//! voltkv serves strings, lists, hashes, and sets over a simple text-framed
//! TCP protocol, with per-key time-to-live, durability across restarts, and
//! a lightweight publish/subscribe fan-out.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            voltkv                                │
//! │                                                                  │
//! │  ┌───────────┐   ┌────────────┐   ┌────────────┐                 │
//! │  │ TCP       │──>│ Connection │──>│ Dispatcher │                 │
//! │  │ Listener  │   │ Handler    │   └─────┬──────┘                 │
//! │  └───────────┘   └────────────┘         │                        │
//! │                                   ┌─────┴──────┐                 │
//! │                                   ▼            ▼                 │
//! │                            ┌──────────┐  ┌──────────┐            │
//! │                            │  Store   │  │  PubSub  │            │
//! │                            │ (RwLock) │  └──────────┘            │
//! │                            └────┬─────┘                          │
//! │                 ┌───────────────┼────────────────┐               │
//! │                 ▼               ▼                ▼               │
//! │          ┌────────────┐  ┌────────────┐  ┌──────────────┐        │
//! │          │ CommandLog │  │  Snapshot  │  │ExpirySweeper │        │
//! │          │ (append)   │  │ (interval) │  │   (1 Hz)     │        │
//! │          └────────────┘  └────────────┘  └──────────────┘        │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Durability
//!
//! Two mechanisms cooperate: every acknowledged mutation is appended to an
//! append-only command log in wire framing, and the full dataset is dumped
//! to a binary snapshot on a fixed interval (truncating the log it now
//! covers). Boot installs the snapshot, replays the log on top, and only
//! then starts accepting writes — recovering exactly the acknowledged
//! state, modulo a trailing partial record.
//!
//! ## Module Overview
//!
//! - [`protocol`]: framed request parser and reply encoder
//! - [`storage`]: the typed store, expiry sweeper, and optional
//!   hash-partitioned front
//! - [`persistence`]: command log and snapshots
//! - [`pubsub`]: channel → subscriber-queue fan-out
//! - [`commands`]: the command dispatcher
//! - [`connection`]: per-client connection handling
//! - [`server`]: boot sequence and accept loop

pub mod commands;
pub mod connection;
pub mod persistence;
pub mod protocol;
pub mod pubsub;
pub mod server;
pub mod storage;

pub use commands::{Dispatcher, Session};
pub use connection::{handle_connection, ConnectionMetrics};
pub use protocol::{parse, Reply, Request};
pub use pubsub::PubSub;
pub use server::{Server, ServerConfig};
pub use storage::{ExpirySweeper, PartitionedStore, Store, StoreError, Value};

/// The default port voltkv listens on.
pub const DEFAULT_PORT: u16 = 6399;

/// The default host voltkv binds to.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of voltkv.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
