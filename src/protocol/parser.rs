//! Framed Request Parser
//!
//! Requests arrive as an array of binary-safe arguments:
//!
//! ```text
//! *<argc>\r\n
//! $<len>\r\n<arg bytes>\r\n     (argc times)
//! ```
//!
//! The parser is incremental: it reads from a byte buffer and returns
//!
//! - `Ok(Some((request, consumed)))` — one complete request, `consumed`
//!   bytes were used
//! - `Ok(None)` — the buffer holds only a partial request, read more
//! - `Err(FrameError)` — the bytes cannot be a valid request
//!
//! The caller appends incoming data to its buffer, calls [`parse`], and on
//! success advances the buffer by `consumed`. The same function runs against
//! a live socket buffer and against the command-log file during replay; the
//! distinction between "incomplete" and "malformed" is what lets replay stop
//! cleanly at a truncated tail record.

use crate::protocol::types::{encode_bulk, prefix, CRLF};
use bytes::Bytes;
use thiserror::Error;

/// Maximum size of a single argument payload (512 MB).
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Errors produced by malformed request framing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The first byte of a request was not `*`.
    #[error("expected array header, got {0:#04x}")]
    ExpectedArray(u8),

    /// An argument did not start with `$`.
    #[error("expected bulk string, got {0:#04x}")]
    ExpectedBulk(u8),

    /// A length field was not a decimal integer.
    #[error("invalid length: {0}")]
    InvalidLength(String),

    /// A negative argument count or payload length.
    #[error("negative length: {0}")]
    NegativeLength(i64),

    /// A request with zero arguments.
    #[error("empty command")]
    EmptyCommand,

    /// An argument payload was not followed by CRLF.
    #[error("bulk string missing trailing CRLF")]
    MissingCrlf,

    /// An argument payload exceeding [`MAX_BULK_SIZE`].
    #[error("bulk string too large: {size} bytes (max {max})")]
    BulkTooLarge { size: usize, max: usize },
}

/// A parsed request: the command name followed by its arguments, all
/// binary-safe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// All arguments, command name first. Never empty.
    pub args: Vec<Bytes>,
}

impl Request {
    pub fn new(args: Vec<Bytes>) -> Self {
        debug_assert!(!args.is_empty());
        Self { args }
    }

    /// The command name, uppercased. Matching is case-insensitive.
    pub fn name(&self) -> String {
        String::from_utf8_lossy(&self.args[0]).to_uppercase()
    }

    /// Arguments after the command name.
    pub fn tail(&self) -> &[Bytes] {
        &self.args[1..]
    }

    /// Encodes the request in its canonical framing. The command log stores
    /// records in exactly this form.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(prefix::ARRAY);
        buf.extend_from_slice(self.args.len().to_string().as_bytes());
        buf.extend_from_slice(CRLF);
        for arg in &self.args {
            encode_bulk(&mut buf, arg);
        }
        buf
    }
}

/// Attempts to parse one complete request from the front of `buf`.
pub fn parse(buf: &[u8]) -> Result<Option<(Request, usize)>, FrameError> {
    if buf.is_empty() {
        return Ok(None);
    }

    if buf[0] != prefix::ARRAY {
        return Err(FrameError::ExpectedArray(buf[0]));
    }

    let (argc, mut pos) = match parse_length(&buf[1..])? {
        Some((n, line_len)) => (n, 1 + line_len),
        None => return Ok(None),
    };

    if argc < 0 {
        return Err(FrameError::NegativeLength(argc));
    }
    if argc == 0 {
        return Err(FrameError::EmptyCommand);
    }

    let mut args = Vec::with_capacity(argc as usize);
    for _ in 0..argc {
        match parse_bulk(&buf[pos..])? {
            Some((arg, consumed)) => {
                args.push(arg);
                pos += consumed;
            }
            None => return Ok(None),
        }
    }

    Ok(Some((Request::new(args), pos)))
}

/// Parses one `$<len>\r\n<bytes>\r\n` frame.
fn parse_bulk(buf: &[u8]) -> Result<Option<(Bytes, usize)>, FrameError> {
    if buf.is_empty() {
        return Ok(None);
    }

    if buf[0] != prefix::BULK_STRING {
        return Err(FrameError::ExpectedBulk(buf[0]));
    }

    let (len, header) = match parse_length(&buf[1..])? {
        Some((n, line_len)) => (n, 1 + line_len),
        None => return Ok(None),
    };

    if len < 0 {
        return Err(FrameError::NegativeLength(len));
    }
    let len = len as usize;
    if len > MAX_BULK_SIZE {
        return Err(FrameError::BulkTooLarge {
            size: len,
            max: MAX_BULK_SIZE,
        });
    }

    let total = header + len + 2;
    if buf.len() < total {
        return Ok(None);
    }

    if &buf[header + len..total] != CRLF {
        return Err(FrameError::MissingCrlf);
    }

    let data = Bytes::copy_from_slice(&buf[header..header + len]);
    Ok(Some((data, total)))
}

/// Parses a decimal length line terminated by CRLF. Returns the value and
/// the number of bytes the line occupied (digits plus CRLF).
fn parse_length(buf: &[u8]) -> Result<Option<(i64, usize)>, FrameError> {
    let pos = match find_crlf(buf) {
        Some(pos) => pos,
        None => return Ok(None),
    };

    let digits = std::str::from_utf8(&buf[..pos])
        .map_err(|_| FrameError::InvalidLength("not UTF-8".to_string()))?;
    let n: i64 = digits
        .parse()
        .map_err(|_| FrameError::InvalidLength(digits.to_string()))?;

    Ok(Some((n, pos + 2)))
}

/// Finds the position of `\r` of the first CRLF pair, if present.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(args: &[&[u8]]) -> Request {
        Request::new(args.iter().map(|a| Bytes::copy_from_slice(a)).collect())
    }

    #[test]
    fn parse_get() {
        let input = b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n";
        let (request, consumed) = parse(input).unwrap().unwrap();
        assert_eq!(request, req(&[b"GET", b"foo"]));
        assert_eq!(consumed, input.len());
    }

    #[test]
    fn parse_set() {
        let input = b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n";
        let (request, _) = parse(input).unwrap().unwrap();
        assert_eq!(request.name(), "SET");
        assert_eq!(request.tail(), &[Bytes::from("foo"), Bytes::from("bar")]);
    }

    #[test]
    fn parse_incomplete_header() {
        assert!(parse(b"*2").unwrap().is_none());
        assert!(parse(b"*2\r\n").unwrap().is_none());
    }

    #[test]
    fn parse_incomplete_payload() {
        assert!(parse(b"*2\r\n$3\r\nGET\r\n$3\r\nfo").unwrap().is_none());
    }

    #[test]
    fn parse_two_pipelined() {
        let input = b"*1\r\n$4\r\nPING\r\n*2\r\n$3\r\nGET\r\n$1\r\nk\r\n";
        let (first, consumed) = parse(input).unwrap().unwrap();
        assert_eq!(first.name(), "PING");
        let (second, _) = parse(&input[consumed..]).unwrap().unwrap();
        assert_eq!(second.name(), "GET");
    }

    #[test]
    fn parse_rejects_non_array() {
        assert!(matches!(
            parse(b"PING\r\n"),
            Err(FrameError::ExpectedArray(b'P'))
        ));
    }

    #[test]
    fn parse_rejects_empty_command() {
        assert!(matches!(parse(b"*0\r\n"), Err(FrameError::EmptyCommand)));
    }

    #[test]
    fn parse_rejects_bad_count() {
        assert!(matches!(
            parse(b"*x\r\n"),
            Err(FrameError::InvalidLength(_))
        ));
        assert!(matches!(
            parse(b"*-1\r\n"),
            Err(FrameError::NegativeLength(-1))
        ));
    }

    #[test]
    fn parse_rejects_missing_bulk_prefix() {
        assert!(matches!(
            parse(b"*1\r\n:4\r\n"),
            Err(FrameError::ExpectedBulk(b':'))
        ));
    }

    #[test]
    fn parse_rejects_missing_trailing_crlf() {
        assert!(matches!(
            parse(b"*1\r\n$4\r\nPINGXX"),
            Err(FrameError::MissingCrlf)
        ));
    }

    #[test]
    fn parse_binary_safe_argument() {
        let input = b"*2\r\n$3\r\nSET\r\n$5\r\nhe\x00lo\r\n";
        let (request, _) = parse(input).unwrap().unwrap();
        assert_eq!(request.args[1], Bytes::from(&b"he\x00lo"[..]));
    }

    #[test]
    fn parse_empty_argument() {
        let input = b"*2\r\n$3\r\nSET\r\n$0\r\n\r\n";
        let (request, _) = parse(input).unwrap().unwrap();
        assert_eq!(request.args[1], Bytes::new());
    }

    #[test]
    fn name_is_case_insensitive() {
        let (request, _) = parse(b"*1\r\n$4\r\nping\r\n").unwrap().unwrap();
        assert_eq!(request.name(), "PING");
    }

    #[test]
    fn encode_parse_roundtrip() {
        let original = req(&[b"LPUSH", b"mylist", b"a", b"b", b"c"]);
        let encoded = original.encode();
        let (parsed, consumed) = parse(&encoded).unwrap().unwrap();
        assert_eq!(parsed, original);
        assert_eq!(consumed, encoded.len());
    }

    #[test]
    fn encode_matches_wire_form() {
        let request = req(&[b"GET", b"foo"]);
        assert_eq!(request.encode(), b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n");
    }
}
