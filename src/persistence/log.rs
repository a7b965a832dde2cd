//! Append-Only Command Log
//!
//! Durability half one: every mutating command the store accepts is appended
//! to a single file, encoded in exactly the request framing the wire parser
//! reads. On boot the file is replayed record by record through the same
//! parser, which reconstructs every acknowledged mutation since the last
//! snapshot.
//!
//! ## Recovery Contract
//!
//! A crash can leave a partially-written record at the tail. Replay treats
//! "incomplete" and "malformed" differently from the parser's point of view:
//! both terminate replay cleanly and the tail is discarded, so the store
//! comes back with the state up to the last fully-written record.
//!
//! ## Writer Discipline
//!
//! Appends are serialized by the store's write lock (the store appends while
//! holding it), so records land in acknowledgement order. Each record is
//! flushed on append; the file itself holds the only cursor.

use crate::protocol::parser::{parse, Request};
use crate::protocol::types::{encode_bulk, prefix, CRLF};
use bytes::Bytes;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, warn};

/// The append-only mutation log.
#[derive(Debug)]
pub struct CommandLog {
    file: Mutex<File>,
}

/// What a replay pass saw.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplayStats {
    /// Fully-parsed records handed to the apply function.
    pub applied: usize,
    /// Whether a partial or malformed tail was discarded.
    pub truncated_tail: bool,
    /// Byte length of the valid record prefix. When a tail was discarded
    /// the file must be cut back to this length before new appends, or the
    /// garbage would sit between old and new records and strand the latter.
    pub valid_len: u64,
}

impl CommandLog {
    /// Opens the log for appending, creating it when absent.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Appends one command record in request framing and flushes it.
    pub fn append(&self, args: &[Bytes]) -> io::Result<()> {
        let mut buf = Vec::new();
        buf.push(prefix::ARRAY);
        buf.extend_from_slice(args.len().to_string().as_bytes());
        buf.extend_from_slice(CRLF);
        for arg in args {
            encode_bulk(&mut buf, arg);
        }

        let mut file = self.file.lock().unwrap();
        file.write_all(&buf)?;
        file.flush()
    }

    /// Forces the file contents to disk.
    pub fn sync(&self) -> io::Result<()> {
        self.file.lock().unwrap().sync_all()
    }

    /// Empties the log. Called once a snapshot has durably captured every
    /// record in it.
    pub fn truncate(&self) -> io::Result<()> {
        self.truncate_to(0)
    }

    /// Cuts the log back to `len` bytes, dropping a damaged tail.
    pub fn truncate_to(&self, len: u64) -> io::Result<()> {
        let file = self.file.lock().unwrap();
        file.set_len(len)?;
        file.sync_all()
    }

    /// Replays every complete record in the file at `path`, in order,
    /// through `apply`. Stops at the first incomplete or malformed record;
    /// the tail is discarded.
    pub fn replay<F>(path: &Path, mut apply: F) -> io::Result<ReplayStats>
    where
        F: FnMut(Request),
    {
        let mut file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ReplayStats::default()),
            Err(e) => return Err(e),
        };

        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;

        let mut stats = ReplayStats::default();
        let mut pos = 0;
        while pos < contents.len() {
            match parse(&contents[pos..]) {
                Ok(Some((request, consumed))) => {
                    apply(request);
                    stats.applied += 1;
                    pos += consumed;
                    stats.valid_len = pos as u64;
                }
                Ok(None) => {
                    warn!(
                        offset = pos,
                        "truncated record at log tail, discarding"
                    );
                    stats.truncated_tail = true;
                    break;
                }
                Err(e) => {
                    warn!(offset = pos, error = %e, "malformed record at log tail, discarding");
                    stats.truncated_tail = true;
                    break;
                }
            }
        }

        debug!(applied = stats.applied, "command log replay finished");
        Ok(stats)
    }
}
