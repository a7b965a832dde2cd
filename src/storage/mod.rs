//! Typed Storage
//!
//! The in-memory heart of the server: a concurrency-safe map from binary
//! keys to tagged values, with per-key expiry and the background sweeper
//! that reclaims expired entries.
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │                    Store                      │
//! │  RwLock ┌──────────────┬───────────────────┐  │
//! │         │ data:        │ expiry:           │  │
//! │         │ key → Value  │ key → deadline(s) │  │
//! │         └──────────────┴───────────────────┘  │
//! └───────────────────────────────────────────────┘
//!          ▲                         ▲
//!          │ per-command ops         │ 1 Hz scan
//!    Dispatcher                ExpirySweeper
//! ```
//!
//! [`PartitionedStore`] optionally composes N stores behind FNV-1a hash
//! routing for workloads where one lock is too hot.

pub mod expiry;
pub mod partition;
pub mod store;
pub mod value;

pub use expiry::{ExpirySweeper, SWEEP_INTERVAL};
pub use partition::PartitionedStore;
pub use store::{Store, StoreError};
pub use value::Value;
