//! Command Processing
//!
//! The dispatcher sits between the wire protocol and the store:
//!
//! ```text
//! Request ──> Dispatcher ──> Store / PubSub ──> Reply
//! ```
//!
//! One dispatcher instance is shared by every live connection and by boot
//! replay; connection-local pub/sub state travels in a [`Session`].

pub mod dispatcher;

pub use dispatcher::{Dispatcher, Session};
