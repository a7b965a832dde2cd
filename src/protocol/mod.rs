//! Wire Protocol
//!
//! The framed client protocol: requests are arrays of binary-safe bulk
//! strings, replies are one of five frame types. The request parser and the
//! reply encoder are deliberately symmetric — the command log stores records
//! in request framing, so replay runs through the very same parser as live
//! connections.
//!
//! ## Modules
//!
//! - `parser`: incremental request parser and the [`Request`] type
//! - `types`: the [`Reply`] enum and frame encoding
//!
//! ## Example
//!
//! ```
//! use voltkv::protocol::{parse, Reply};
//! use bytes::Bytes;
//!
//! let data = b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n";
//! let (request, consumed) = parse(data).unwrap().unwrap();
//! assert_eq!(request.name(), "GET");
//! assert_eq!(consumed, data.len());
//!
//! let reply = Reply::bulk(Bytes::from("bar"));
//! assert_eq!(reply.encode(), b"$3\r\nbar\r\n");
//! ```

pub mod parser;
pub mod types;

pub use parser::{parse, FrameError, Request, MAX_BULK_SIZE};
pub use types::Reply;
