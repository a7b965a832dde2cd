//! Client Connections
//!
//! One task per accepted socket, each running the read → parse → dispatch →
//! reply loop, with a dedicated writer task per connection so pushed pub/sub
//! frames and ordinary replies never interleave mid-frame.

pub mod handler;

pub use handler::{
    handle_connection, ConnectionError, ConnectionHandler, ConnectionMetrics, MetricsSnapshot,
};
