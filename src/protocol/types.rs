//! Wire Reply Types
//!
//! This module defines the reply side of the wire protocol and its encoding.
//! Every reply the server sends is one of a small set of frames, each
//! introduced by a one-byte prefix and terminated by CRLF:
//!
//! - `+` simple string
//! - `-` error
//! - `:` integer
//! - `$` bulk string (`$-1` for the nil bulk)
//! - `*` array of bulk strings (`*0` for the empty array)
//!
//! ## Examples
//!
//! Simple string: `+OK\r\n`
//! Error: `-ERR unknown command\r\n`
//! Integer: `:1000\r\n`
//! Bulk string: `$5\r\nhello\r\n`
//! Nil bulk: `$-1\r\n`
//! Array: `*2\r\n$1\r\na\r\n$1\r\nb\r\n`
//!
//! Unlike general RESP, arrays here are always flat sequences of bulk
//! strings — that is the only shape this protocol ever replies with.

use bytes::Bytes;
use std::fmt;

/// The CRLF line terminator used throughout the protocol.
pub const CRLF: &[u8] = b"\r\n";

/// Frame type prefixes.
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// A reply frame sent back to a client (or, for `message` frames, pushed to
/// a subscriber).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Non-binary status line. Format: `+<text>\r\n`
    Simple(String),

    /// Error line. Format: `-<text>\r\n`
    Error(String),

    /// 64-bit signed integer. Format: `:<n>\r\n`
    Integer(i64),

    /// Binary-safe string. Format: `$<len>\r\n<bytes>\r\n`
    Bulk(Bytes),

    /// The nil bulk string, `$-1\r\n`, the protocol's "absent" form.
    NullBulk,

    /// A flat array of bulk strings. Format: `*<n>\r\n` then n bulk frames.
    Array(Vec<Bytes>),

    /// No frame at all. Used by commands that write their frames
    /// out-of-band (UNSUBSCRIBE) and by suppressed replay effects.
    None,
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Simple("OK".to_string())
    }

    pub fn pong() -> Self {
        Reply::Simple("PONG".to_string())
    }

    /// Formats the canonical error reply, `-ERR <text>`.
    pub fn err(text: impl fmt::Display) -> Self {
        Reply::Error(format!("ERR {}", text))
    }

    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Reply::Bulk(data.into())
    }

    /// Encodes the reply to its wire representation.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_into(&mut buf);
        buf
    }

    /// Encodes the reply into an existing buffer, avoiding a fresh
    /// allocation per frame.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        match self {
            Reply::Simple(s) => {
                buf.push(prefix::SIMPLE_STRING);
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(CRLF);
            }
            Reply::Error(s) => {
                buf.push(prefix::ERROR);
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(CRLF);
            }
            Reply::Integer(n) => {
                buf.push(prefix::INTEGER);
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.extend_from_slice(CRLF);
            }
            Reply::Bulk(data) => {
                encode_bulk(buf, data);
            }
            Reply::NullBulk => {
                buf.extend_from_slice(b"$-1\r\n");
            }
            Reply::Array(items) => {
                buf.push(prefix::ARRAY);
                buf.extend_from_slice(items.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                for item in items {
                    encode_bulk(buf, item);
                }
            }
            Reply::None => {}
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }
}

/// Encodes one bulk string frame: `$<len>\r\n<bytes>\r\n`.
pub fn encode_bulk(buf: &mut Vec<u8>, data: &[u8]) {
    buf.push(prefix::BULK_STRING);
    buf.extend_from_slice(data.len().to_string().as_bytes());
    buf.extend_from_slice(CRLF);
    buf.extend_from_slice(data);
    buf.extend_from_slice(CRLF);
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Simple(s) => write!(f, "{}", s),
            Reply::Error(s) => write!(f, "(error) {}", s),
            Reply::Integer(n) => write!(f, "(integer) {}", n),
            Reply::Bulk(data) => match std::str::from_utf8(data) {
                Ok(s) => write!(f, "\"{}\"", s),
                Err(_) => write!(f, "(binary data, {} bytes)", data.len()),
            },
            Reply::NullBulk => write!(f, "(nil)"),
            Reply::Array(items) => {
                if items.is_empty() {
                    write!(f, "(empty array)")
                } else {
                    writeln!(f)?;
                    for (i, item) in items.iter().enumerate() {
                        writeln!(f, "{}) {}", i + 1, String::from_utf8_lossy(item))?;
                    }
                    Ok(())
                }
            }
            Reply::None => Ok(()),
        }
    }
}
