//! Durability
//!
//! Two complementary mechanisms reconstruct the store across restarts:
//!
//! - the **command log** (`log`): every acknowledged mutation, appended in
//!   wire framing, replayed sequentially on boot;
//! - the **snapshot** (`snapshot`): a periodic full binary dump of both
//!   maps, installed on boot before replay.
//!
//! Boot order is snapshot first, then log replay on top; together they
//! reproduce the state as of the last acknowledged mutation, modulo a
//! trailing partial log record.

pub mod log;
pub mod snapshot;

pub use log::{CommandLog, ReplayStats};
pub use snapshot::{Snapshot, SnapshotError, Snapshotter, DEFAULT_SNAPSHOT_INTERVAL};
