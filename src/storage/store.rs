//! Typed Key-Value Store
//!
//! The core of the database: a concurrency-safe mapping from binary keys to
//! [`Value`]s, with a separate per-key expiry map holding absolute
//! unix-second deadlines.
//!
//! ## Concurrency Model
//!
//! A single `RwLock` guards both maps, so every operation against one store
//! is linearizable in lock-acquisition order. Pure reads take the shared
//! lock; mutations take the exclusive lock and physically evict any expired
//! key they touch before operating. `GET` uses the read-fast-path /
//! write-upgrade pattern so the hot path stays shared.
//!
//! ## Expiry
//!
//! A deadline at or before the current time means the key is logically
//! deleted: no operation may observe it. Physical reclamation happens in two
//! places — lazily, when a mutation touches the key, and proactively, in the
//! once-per-second [`ExpirySweeper`](super::expiry::ExpirySweeper).
//!
//! ## Durability Hook
//!
//! The store holds an optional reference to the [`CommandLog`]. While a
//! mutation still holds the write lock, the accepted command is appended to
//! the log, which makes log order equal acknowledgement order. During boot
//! replay no log is attached yet, so replayed mutations cannot re-append.

use crate::persistence::log::CommandLog;
use crate::persistence::snapshot::{self, Snapshot, SnapshotError};
use crate::storage::value::Value;
use bytes::Bytes;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::{Arc, OnceLock, RwLock, RwLockWriteGuard};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::error;

/// Errors surfaced by store operations. The dispatcher formats these into
/// `-ERR <text>` replies.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The key exists with an incompatible variant.
    #[error("wrong type")]
    WrongType,

    /// An integer operation met a value that does not parse as a signed
    /// 64-bit integer, or the arithmetic overflowed.
    #[error("value is not an integer")]
    NotInteger,

    /// RENAME or MOVE addressed an absent source key.
    #[error("no such key")]
    NoSuchKey,

    /// KEYS received a pattern with an unterminated character class.
    #[error("invalid glob pattern")]
    InvalidPattern,

    /// MOVE addressed a database other than 0.
    #[error("only one DB implemented")]
    SingleDb,
}

/// The current unix time in whole seconds.
pub(crate) fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// The two maps behind the lock.
#[derive(Debug, Default)]
pub(crate) struct Inner {
    pub(crate) data: HashMap<Bytes, Value>,
    pub(crate) expiry: HashMap<Bytes, i64>,
}

impl Inner {
    /// Physically removes the key if its deadline has passed.
    pub(crate) fn evict_if_expired(&mut self, key: &Bytes, now: i64) -> bool {
        match self.expiry.get(key) {
            Some(&deadline) if deadline <= now => {
                self.data.remove(key);
                self.expiry.remove(key);
                true
            }
            _ => false,
        }
    }

    /// A key is live when it is present and its deadline, if any, is in the
    /// future.
    fn is_live(&self, key: &Bytes, now: i64) -> bool {
        self.data.contains_key(key) && !self.is_past_deadline(key, now)
    }

    fn is_past_deadline(&self, key: &Bytes, now: i64) -> bool {
        matches!(self.expiry.get(key), Some(&deadline) if deadline <= now)
    }

    /// The value for a key, unless absent or logically deleted.
    fn live_value(&self, key: &Bytes, now: i64) -> Option<&Value> {
        if self.is_past_deadline(key, now) {
            None
        } else {
            self.data.get(key)
        }
    }

    /// Removes the key and its deadline.
    pub(crate) fn remove(&mut self, key: &Bytes) -> Option<Value> {
        self.expiry.remove(key);
        self.data.remove(key)
    }
}

/// The typed in-memory store.
///
/// Designed to be wrapped in an `Arc` and shared across connection tasks,
/// the sweeper, and the snapshotter.
///
/// # Example
///
/// ```
/// use voltkv::storage::Store;
/// use bytes::Bytes;
///
/// let store = Store::new();
/// store.set(Bytes::from("name"), Bytes::from("volt"));
/// assert_eq!(store.get(&Bytes::from("name")), Some(Bytes::from("volt")));
/// assert_eq!(store.key_type(&Bytes::from("name")), "string");
/// ```
#[derive(Debug, Default)]
pub struct Store {
    inner: RwLock<Inner>,
    log: OnceLock<Arc<CommandLog>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches the command log. Done once, after boot replay, so that
    /// replayed mutations never re-append (the recursive-append guard).
    pub fn attach_log(&self, log: Arc<CommandLog>) {
        let _ = self.log.set(log);
    }

    pub(crate) fn inner_write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap()
    }

    /// Appends an accepted mutation to the command log, if one is attached.
    /// Called while the write lock is held; append failures are logged and
    /// do not fail the operation.
    fn log_command(&self, args: &[Bytes]) {
        if let Some(log) = self.log.get() {
            if let Err(e) = log.append(args) {
                error!(error = %e, "command log append failed");
            }
        }
    }

    // ========================================================================
    // Key-generic operations
    // ========================================================================

    /// Counts how many of the given keys are live. Duplicates count.
    pub fn exists(&self, keys: &[Bytes]) -> usize {
        let inner = self.inner.read().unwrap();
        let now = now_secs();
        keys.iter().filter(|k| inner.is_live(k, now)).count()
    }

    /// Deletes the given keys, clearing their deadlines. Returns how many
    /// were actually removed.
    pub fn del(&self, keys: &[Bytes]) -> usize {
        let mut inner = self.inner.write().unwrap();
        let now = now_secs();
        let mut removed = 0;
        for key in keys {
            inner.evict_if_expired(key, now);
            if inner.remove(key).is_some() {
                removed += 1;
            }
        }
        if removed > 0 {
            let mut args = vec![Bytes::from_static(b"DEL")];
            args.extend(keys.iter().cloned());
            self.log_command(&args);
        }
        removed
    }

    /// The variant name of the key's value, or `"none"`.
    pub fn key_type(&self, key: &Bytes) -> &'static str {
        let inner = self.inner.read().unwrap();
        inner
            .live_value(key, now_secs())
            .map(Value::type_name)
            .unwrap_or("none")
    }

    /// All live keys matching a glob pattern (`*`, `?`, `[...]`).
    pub fn keys(&self, pattern: &[u8]) -> Result<Vec<Bytes>, StoreError> {
        let glob = Glob::new(pattern)?;
        let inner = self.inner.read().unwrap();
        let now = now_secs();
        Ok(inner
            .data
            .keys()
            .filter(|k| inner.is_live(k, now) && glob.matches(k))
            .cloned()
            .collect())
    }

    /// Moves the value (and any deadline) from `src` to `dst`, overwriting
    /// whatever `dst` held.
    pub fn rename(&self, src: &Bytes, dst: &Bytes) -> Result<(), StoreError> {
        let mut inner = self.inner.write().unwrap();
        let now = now_secs();
        inner.evict_if_expired(src, now);
        inner.evict_if_expired(dst, now);

        let value = inner.data.remove(src).ok_or(StoreError::NoSuchKey)?;
        let deadline = inner.expiry.remove(src);
        inner.remove(dst);
        inner.data.insert(dst.clone(), value);
        if let Some(deadline) = deadline {
            inner.expiry.insert(dst.clone(), deadline);
        }

        self.log_command(&[Bytes::from_static(b"RENAME"), src.clone(), dst.clone()]);
        Ok(())
    }

    /// Clears the value map and the expiry map.
    pub fn flush_all(&self) {
        let mut inner = self.inner.write().unwrap();
        inner.data.clear();
        inner.expiry.clear();
        self.log_command(&[Bytes::from_static(b"FLUSHALL")]);
    }

    /// Sets the key's deadline to now + `seconds`. Returns `true` when the
    /// key exists, `false` otherwise. `seconds` has been validated as ≥ 0
    /// by the dispatcher.
    pub fn expire(&self, key: &Bytes, seconds: i64) -> bool {
        let mut inner = self.inner.write().unwrap();
        let now = now_secs();
        inner.evict_if_expired(key, now);
        if !inner.data.contains_key(key) {
            return false;
        }
        inner.expiry.insert(key.clone(), now + seconds);
        self.log_command(&[
            Bytes::from_static(b"EXPIRE"),
            key.clone(),
            Bytes::from(seconds.to_string()),
        ]);
        true
    }

    /// Remaining seconds to live: `-2` when the key is absent or already
    /// expired, `-1` when it has no deadline.
    pub fn ttl(&self, key: &Bytes) -> i64 {
        let inner = self.inner.read().unwrap();
        let now = now_secs();
        if !inner.data.contains_key(key) {
            return -2;
        }
        match inner.expiry.get(key) {
            Some(&deadline) if deadline <= now => -2,
            Some(&deadline) => deadline - now,
            None => -1,
        }
    }

    /// Only database 0 exists; moving a key there is a no-op.
    pub fn move_key(&self, key: &Bytes, db: i64) -> Result<(), StoreError> {
        let inner = self.inner.read().unwrap();
        if !inner.is_live(key, now_secs()) {
            return Err(StoreError::NoSuchKey);
        }
        if db != 0 {
            return Err(StoreError::SingleDb);
        }
        Ok(())
    }

    // ========================================================================
    // String operations
    // ========================================================================

    /// Unconditionally stores `value` as a string, replacing any prior
    /// variant. An existing (live) deadline is left in place.
    pub fn set(&self, key: Bytes, value: Bytes) {
        let mut inner = self.inner.write().unwrap();
        inner.evict_if_expired(&key, now_secs());
        inner.data.insert(key.clone(), Value::Str(value.clone()));
        self.log_command(&[Bytes::from_static(b"SET"), key, value]);
    }

    /// The string value, or `None` when the key is absent, expired, or of
    /// another variant.
    pub fn get(&self, key: &Bytes) -> Option<Bytes> {
        let now = now_secs();
        {
            let inner = self.inner.read().unwrap();
            if !inner.is_past_deadline(key, now) {
                return match inner.data.get(key) {
                    Some(Value::Str(s)) => Some(s.clone()),
                    _ => None,
                };
            }
        }

        // Expired: upgrade to the write lock and reclaim.
        let mut inner = self.inner.write().unwrap();
        inner.evict_if_expired(key, now);
        match inner.data.get(key) {
            Some(Value::Str(s)) => Some(s.clone()),
            _ => None,
        }
    }

    /// Increments the integer interpretation of the value by one, creating
    /// the key at 1 when absent.
    pub fn incr(&self, key: &Bytes) -> Result<i64, StoreError> {
        let mut inner = self.inner.write().unwrap();
        inner.evict_if_expired(key, now_secs());

        let next = match inner.data.get(key) {
            None => 1,
            Some(Value::Str(s)) => {
                let text = std::str::from_utf8(s).map_err(|_| StoreError::NotInteger)?;
                let n: i64 = text.parse().map_err(|_| StoreError::NotInteger)?;
                n.checked_add(1).ok_or(StoreError::NotInteger)?
            }
            Some(_) => return Err(StoreError::WrongType),
        };

        inner
            .data
            .insert(key.clone(), Value::Str(Bytes::from(next.to_string())));
        self.log_command(&[Bytes::from_static(b"INCR"), key.clone()]);
        Ok(next)
    }

    // ========================================================================
    // List operations
    // ========================================================================

    /// Prepends values one at a time, so the last argument ends up at the
    /// head. Returns the new length.
    pub fn lpush(&self, key: &Bytes, values: &[Bytes]) -> Result<usize, StoreError> {
        self.push(key, values, true)
    }

    /// Appends values in argument order. Returns the new length.
    pub fn rpush(&self, key: &Bytes, values: &[Bytes]) -> Result<usize, StoreError> {
        self.push(key, values, false)
    }

    fn push(&self, key: &Bytes, values: &[Bytes], front: bool) -> Result<usize, StoreError> {
        let mut inner = self.inner.write().unwrap();
        inner.evict_if_expired(key, now_secs());

        let list = match inner
            .data
            .entry(key.clone())
            .or_insert_with(|| Value::List(VecDeque::new()))
        {
            Value::List(list) => list,
            _ => return Err(StoreError::WrongType),
        };

        for value in values {
            if front {
                list.push_front(value.clone());
            } else {
                list.push_back(value.clone());
            }
        }
        let len = list.len();

        let name: &'static [u8] = if front { b"LPUSH" } else { b"RPUSH" };
        let mut args = vec![Bytes::from_static(name), key.clone()];
        args.extend(values.iter().cloned());
        self.log_command(&args);

        Ok(len)
    }

    /// Removes and returns the head. `None` covers absent, empty, and
    /// wrong-type keys alike — the client sees a nil bulk.
    pub fn lpop(&self, key: &Bytes) -> Option<Bytes> {
        self.pop(key, true)
    }

    /// Removes and returns the tail.
    pub fn rpop(&self, key: &Bytes) -> Option<Bytes> {
        self.pop(key, false)
    }

    fn pop(&self, key: &Bytes, front: bool) -> Option<Bytes> {
        let mut inner = self.inner.write().unwrap();
        inner.evict_if_expired(key, now_secs());

        let list = match inner.data.get_mut(key) {
            Some(Value::List(list)) => list,
            _ => return None,
        };

        let value = if front {
            list.pop_front()
        } else {
            list.pop_back()
        };

        if list.is_empty() {
            inner.remove(key);
        }

        if value.is_some() {
            let name: &'static [u8] = if front { b"LPOP" } else { b"RPOP" };
            self.log_command(&[Bytes::from_static(name), key.clone()]);
        }
        value
    }

    /// An inclusive slice with negative indices counted from the tail,
    /// clamped to the list bounds.
    pub fn lrange(&self, key: &Bytes, start: i64, stop: i64) -> Vec<Bytes> {
        let inner = self.inner.read().unwrap();
        let list = match inner.live_value(key, now_secs()) {
            Some(Value::List(list)) => list,
            _ => return Vec::new(),
        };

        let len = list.len() as i64;
        let mut start = if start < 0 { len + start } else { start };
        let mut stop = if stop < 0 { len + stop } else { stop };
        if start < 0 {
            start = 0;
        }
        if stop >= len {
            stop = len - 1;
        }
        if start > stop || start >= len {
            return Vec::new();
        }

        list.iter()
            .skip(start as usize)
            .take((stop - start + 1) as usize)
            .cloned()
            .collect()
    }

    // ========================================================================
    // Hash operations
    // ========================================================================

    /// Sets a field. Returns 1 when the field was created, 0 when updated.
    pub fn hset(&self, key: &Bytes, field: Bytes, value: Bytes) -> Result<i64, StoreError> {
        let mut inner = self.inner.write().unwrap();
        inner.evict_if_expired(key, now_secs());

        let hash = match inner
            .data
            .entry(key.clone())
            .or_insert_with(|| Value::Hash(HashMap::new()))
        {
            Value::Hash(hash) => hash,
            _ => return Err(StoreError::WrongType),
        };

        let created = if hash.insert(field.clone(), value.clone()).is_none() {
            1
        } else {
            0
        };
        self.log_command(&[Bytes::from_static(b"HSET"), key.clone(), field, value]);
        Ok(created)
    }

    pub fn hget(&self, key: &Bytes, field: &Bytes) -> Option<Bytes> {
        let inner = self.inner.read().unwrap();
        match inner.live_value(key, now_secs()) {
            Some(Value::Hash(hash)) => hash.get(field).cloned(),
            _ => None,
        }
    }

    pub fn hexists(&self, key: &Bytes, field: &Bytes) -> bool {
        let inner = self.inner.read().unwrap();
        match inner.live_value(key, now_secs()) {
            Some(Value::Hash(hash)) => hash.contains_key(field),
            _ => false,
        }
    }

    /// All fields and values as an alternating field, value, field, value…
    /// sequence.
    pub fn hgetall(&self, key: &Bytes) -> Vec<Bytes> {
        let inner = self.inner.read().unwrap();
        match inner.live_value(key, now_secs()) {
            Some(Value::Hash(hash)) => {
                let mut out = Vec::with_capacity(hash.len() * 2);
                for (field, value) in hash {
                    out.push(field.clone());
                    out.push(value.clone());
                }
                out
            }
            _ => Vec::new(),
        }
    }

    pub fn hlen(&self, key: &Bytes) -> usize {
        let inner = self.inner.read().unwrap();
        match inner.live_value(key, now_secs()) {
            Some(Value::Hash(hash)) => hash.len(),
            _ => 0,
        }
    }

    /// Removes fields. Returns how many were actually removed.
    pub fn hdel(&self, key: &Bytes, fields: &[Bytes]) -> Result<usize, StoreError> {
        let mut inner = self.inner.write().unwrap();
        inner.evict_if_expired(key, now_secs());

        let hash = match inner.data.get_mut(key) {
            Some(Value::Hash(hash)) => hash,
            Some(_) => return Err(StoreError::WrongType),
            None => return Ok(0),
        };

        let removed = fields.iter().filter(|f| hash.remove(*f).is_some()).count();
        if hash.is_empty() {
            inner.remove(key);
        }

        if removed > 0 {
            let mut args = vec![Bytes::from_static(b"HDEL"), key.clone()];
            args.extend(fields.iter().cloned());
            self.log_command(&args);
        }
        Ok(removed)
    }

    /// Adds `delta` to the integer interpretation of a field, treating a
    /// missing field as 0. A field value that does not parse as an integer
    /// is an error.
    pub fn hincrby(&self, key: &Bytes, field: Bytes, delta: i64) -> Result<i64, StoreError> {
        let mut inner = self.inner.write().unwrap();
        inner.evict_if_expired(key, now_secs());

        let hash = match inner
            .data
            .entry(key.clone())
            .or_insert_with(|| Value::Hash(HashMap::new()))
        {
            Value::Hash(hash) => hash,
            _ => return Err(StoreError::WrongType),
        };

        let current = match hash.get(&field) {
            Some(raw) => {
                let text = std::str::from_utf8(raw).map_err(|_| StoreError::NotInteger)?;
                text.parse::<i64>().map_err(|_| StoreError::NotInteger)?
            }
            None => 0,
        };
        let next = current.checked_add(delta).ok_or(StoreError::NotInteger)?;
        hash.insert(field.clone(), Bytes::from(next.to_string()));

        self.log_command(&[
            Bytes::from_static(b"HINCRBY"),
            key.clone(),
            field,
            Bytes::from(delta.to_string()),
        ]);
        Ok(next)
    }

    // ========================================================================
    // Set operations
    // ========================================================================

    /// Adds members. Returns how many were newly added.
    pub fn sadd(&self, key: &Bytes, members: &[Bytes]) -> Result<usize, StoreError> {
        let mut inner = self.inner.write().unwrap();
        inner.evict_if_expired(key, now_secs());

        let set = match inner
            .data
            .entry(key.clone())
            .or_insert_with(|| Value::Set(HashSet::new()))
        {
            Value::Set(set) => set,
            _ => return Err(StoreError::WrongType),
        };

        let added = members.iter().filter(|m| set.insert((*m).clone())).count();
        if added > 0 {
            let mut args = vec![Bytes::from_static(b"SADD"), key.clone()];
            args.extend(members.iter().cloned());
            self.log_command(&args);
        }
        Ok(added)
    }

    /// Removes members. Returns how many were actually removed.
    pub fn srem(&self, key: &Bytes, members: &[Bytes]) -> Result<usize, StoreError> {
        let mut inner = self.inner.write().unwrap();
        inner.evict_if_expired(key, now_secs());

        let set = match inner.data.get_mut(key) {
            Some(Value::Set(set)) => set,
            Some(_) => return Err(StoreError::WrongType),
            None => return Ok(0),
        };

        let removed = members.iter().filter(|m| set.remove(*m)).count();
        if set.is_empty() {
            inner.remove(key);
        }

        if removed > 0 {
            let mut args = vec![Bytes::from_static(b"SREM"), key.clone()];
            args.extend(members.iter().cloned());
            self.log_command(&args);
        }
        Ok(removed)
    }

    pub fn sismember(&self, key: &Bytes, member: &Bytes) -> bool {
        let inner = self.inner.read().unwrap();
        match inner.live_value(key, now_secs()) {
            Some(Value::Set(set)) => set.contains(member),
            _ => false,
        }
    }

    pub fn smembers(&self, key: &Bytes) -> Vec<Bytes> {
        let inner = self.inner.read().unwrap();
        match inner.live_value(key, now_secs()) {
            Some(Value::Set(set)) => set.iter().cloned().collect(),
            _ => Vec::new(),
        }
    }

    pub fn scard(&self, key: &Bytes) -> usize {
        let inner = self.inner.read().unwrap();
        match inner.live_value(key, now_secs()) {
            Some(Value::Set(set)) => set.len(),
            _ => 0,
        }
    }

    /// The union across the given keys; missing or wrong-type keys
    /// contribute nothing.
    pub fn sunion(&self, keys: &[Bytes]) -> Vec<Bytes> {
        let inner = self.inner.read().unwrap();
        let now = now_secs();
        let mut union = HashSet::new();
        for key in keys {
            if let Some(Value::Set(set)) = inner.live_value(key, now) {
                union.extend(set.iter().cloned());
            }
        }
        union.into_iter().collect()
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Removes every entry whose deadline has passed. Called by the
    /// background sweeper; returns how many keys were reclaimed.
    pub fn purge_expired(&self) -> usize {
        let mut inner = self.inner.write().unwrap();
        let now = now_secs();
        let expired: Vec<Bytes> = inner
            .expiry
            .iter()
            .filter(|(_, &deadline)| deadline <= now)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            inner.remove(key);
        }
        expired.len()
    }

    /// The number of keys currently stored, including not-yet-reclaimed
    /// expired ones.
    pub fn len(&self) -> usize {
        self.inner.read().unwrap().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes a point-in-time snapshot of both maps, then truncates the
    /// command log: the snapshot now covers every record in it. The
    /// exclusive lock is held across both steps so no mutation can land
    /// between the dump and the truncation — replaying the remaining log on
    /// top of the snapshot must reproduce exactly the acknowledged state.
    pub fn save_snapshot(&self, path: &Path) -> Result<(), SnapshotError> {
        let inner = self.inner.write().unwrap();
        let snap = Snapshot {
            data: inner.data.clone(),
            expiry: inner.expiry.clone(),
        };
        snapshot::write(path, &snap)?;
        if let Some(log) = self.log.get() {
            if let Err(e) = log.truncate() {
                error!(error = %e, "command log truncation after snapshot failed");
            }
        }
        Ok(())
    }

    /// Replaces the store's contents with a decoded snapshot. Entries whose
    /// deadline has already passed are dropped at install time.
    pub fn load_snapshot(&self, path: &Path) -> Result<(), SnapshotError> {
        let snap = snapshot::read(path)?;
        let now = now_secs();

        let mut inner = self.inner.write().unwrap();
        inner.data.clear();
        inner.expiry.clear();
        for (key, value) in snap.data {
            match snap.expiry.get(&key) {
                Some(&deadline) if deadline <= now => continue,
                Some(&deadline) => {
                    inner.expiry.insert(key.clone(), deadline);
                }
                None => {}
            }
            inner.data.insert(key, value);
        }
        Ok(())
    }
}

/// Shell-style glob matcher over raw bytes: `*`, `?`, `[a-z]`, `[^ab]`, and
/// `\` escapes. Patterns with an unterminated character class are rejected
/// up front.
pub(crate) struct Glob<'a> {
    pattern: &'a [u8],
}

impl<'a> Glob<'a> {
    pub(crate) fn new(pattern: &'a [u8]) -> Result<Self, StoreError> {
        // The only malformed shape: a '[' with no closing ']'.
        let mut i = 0;
        while i < pattern.len() {
            match pattern[i] {
                b'\\' => i += 2,
                b'[' => {
                    let mut j = i + 1;
                    if pattern.get(j) == Some(&b'^') {
                        j += 1;
                    }
                    while j < pattern.len() && pattern[j] != b']' {
                        j += 1;
                    }
                    if j >= pattern.len() {
                        return Err(StoreError::InvalidPattern);
                    }
                    i = j + 1;
                }
                _ => i += 1,
            }
        }
        Ok(Self { pattern })
    }

    pub(crate) fn matches(&self, text: &[u8]) -> bool {
        matches_at(self.pattern, text)
    }
}

fn matches_at(pattern: &[u8], text: &[u8]) -> bool {
    if pattern.is_empty() {
        return text.is_empty();
    }

    match pattern[0] {
        b'*' => (0..=text.len()).any(|i| matches_at(&pattern[1..], &text[i..])),
        b'?' => !text.is_empty() && matches_at(&pattern[1..], &text[1..]),
        b'[' => {
            if text.is_empty() {
                return false;
            }
            let mut i = 1;
            let negate = pattern.get(1) == Some(&b'^');
            if negate {
                i += 1;
            }
            let mut matched = false;
            while i < pattern.len() && pattern[i] != b']' {
                if i + 2 < pattern.len() && pattern[i + 1] == b'-' && pattern[i + 2] != b']' {
                    if text[0] >= pattern[i] && text[0] <= pattern[i + 2] {
                        matched = true;
                    }
                    i += 3;
                } else {
                    if pattern[i] == text[0] {
                        matched = true;
                    }
                    i += 1;
                }
            }
            if negate {
                matched = !matched;
            }
            matched && matches_at(&pattern[i + 1..], &text[1..])
        }
        b'\\' => {
            pattern.len() > 1
                && !text.is_empty()
                && pattern[1] == text[0]
                && matches_at(&pattern[2..], &text[1..])
        }
        c => !text.is_empty() && c == text[0] && matches_at(&pattern[1..], &text[1..]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn set_get_del() {
        let store = Store::new();
        store.set(b("foo"), b("bar"));
        assert_eq!(store.get(&b("foo")), Some(b("bar")));
        assert_eq!(store.del(&[b("foo")]), 1);
        assert_eq!(store.get(&b("foo")), None);
        assert_eq!(store.del(&[b("foo")]), 0);
    }

    #[test]
    fn del_implies_absent() {
        let store = Store::new();
        store.set(b("k"), b("v"));
        assert_eq!(store.del(&[b("k")]), 1);
        assert_eq!(store.exists(&[b("k")]), 0);
    }

    #[test]
    fn exists_counts_duplicates() {
        let store = Store::new();
        store.set(b("a"), b("1"));
        store.set(b("b"), b("2"));
        assert_eq!(store.exists(&[b("a"), b("a"), b("b"), b("missing")]), 3);
    }

    #[test]
    fn set_overwrites_any_variant() {
        let store = Store::new();
        store.sadd(&b("k"), &[b("m")]).unwrap();
        assert_eq!(store.key_type(&b("k")), "set");
        store.set(b("k"), b("v"));
        assert_eq!(store.key_type(&b("k")), "string");
        assert_eq!(store.get(&b("k")), Some(b("v")));
    }

    #[test]
    fn incr_from_absent() {
        let store = Store::new();
        assert_eq!(store.incr(&b("n")), Ok(1));
        assert_eq!(store.incr(&b("n")), Ok(2));
        assert_eq!(store.get(&b("n")), Some(b("2")));
    }

    #[test]
    fn incr_rejects_non_integer() {
        let store = Store::new();
        store.set(b("s"), b("abc"));
        assert_eq!(store.incr(&b("s")), Err(StoreError::NotInteger));
    }

    #[test]
    fn incr_rejects_wrong_type() {
        let store = Store::new();
        store.lpush(&b("l"), &[b("x")]).unwrap();
        assert_eq!(store.incr(&b("l")), Err(StoreError::WrongType));
    }

    #[test]
    fn incr_overflow_is_error() {
        let store = Store::new();
        store.set(b("n"), Bytes::from(i64::MAX.to_string()));
        assert_eq!(store.incr(&b("n")), Err(StoreError::NotInteger));
    }

    #[test]
    fn lpush_order_last_value_becomes_head() {
        let store = Store::new();
        assert_eq!(store.lpush(&b("l"), &[b("a"), b("b"), b("c")]), Ok(3));
        assert_eq!(store.lrange(&b("l"), 0, -1), vec![b("c"), b("b"), b("a")]);
    }

    #[test]
    fn rpush_preserves_order() {
        let store = Store::new();
        assert_eq!(store.rpush(&b("l"), &[b("a"), b("b")]), Ok(2));
        assert_eq!(store.rpush(&b("l"), &[b("c")]), Ok(3));
        assert_eq!(store.lrange(&b("l"), 0, -1), vec![b("a"), b("b"), b("c")]);
    }

    #[test]
    fn pops_take_head_and_tail() {
        let store = Store::new();
        store.rpush(&b("l"), &[b("a"), b("b"), b("c")]).unwrap();
        assert_eq!(store.lpop(&b("l")), Some(b("a")));
        assert_eq!(store.rpop(&b("l")), Some(b("c")));
        assert_eq!(store.lpop(&b("l")), Some(b("b")));
        // The emptied list disappears with its key.
        assert_eq!(store.key_type(&b("l")), "none");
        assert_eq!(store.lpop(&b("l")), None);
    }

    #[test]
    fn pop_on_wrong_type_is_nil() {
        let store = Store::new();
        store.set(b("s"), b("v"));
        assert_eq!(store.lpop(&b("s")), None);
        assert_eq!(store.rpop(&b("s")), None);
    }

    #[test]
    fn lrange_clamps_and_slices() {
        let store = Store::new();
        store
            .rpush(&b("l"), &[b("0"), b("1"), b("2"), b("3"), b("4")])
            .unwrap();
        assert_eq!(store.lrange(&b("l"), 1, 3), vec![b("1"), b("2"), b("3")]);
        assert_eq!(store.lrange(&b("l"), -2, -1), vec![b("3"), b("4")]);
        assert_eq!(store.lrange(&b("l"), 0, 99), store.lrange(&b("l"), 0, -1));
        assert_eq!(store.lrange(&b("l"), 3, 1), Vec::<Bytes>::new());
        assert_eq!(store.lrange(&b("l"), 9, 12), Vec::<Bytes>::new());
        assert_eq!(store.lrange(&b("missing"), 0, -1), Vec::<Bytes>::new());
    }

    #[test]
    fn lpush_on_string_is_wrong_type() {
        let store = Store::new();
        store.set(b("s"), b("v"));
        assert_eq!(store.lpush(&b("s"), &[b("x")]), Err(StoreError::WrongType));
        assert_eq!(store.rpush(&b("s"), &[b("x")]), Err(StoreError::WrongType));
    }

    #[test]
    fn hash_set_created_vs_updated() {
        let store = Store::new();
        assert_eq!(store.hset(&b("h"), b("x"), b("1")), Ok(1));
        assert_eq!(store.hset(&b("h"), b("x"), b("2")), Ok(0));
        assert_eq!(store.hget(&b("h"), &b("x")), Some(b("2")));
    }

    #[test]
    fn hash_getall_alternates_fields_and_values() {
        let store = Store::new();
        store.hset(&b("h"), b("f1"), b("v1")).unwrap();
        store.hset(&b("h"), b("f2"), b("v2")).unwrap();
        let flat = store.hgetall(&b("h"));
        assert_eq!(flat.len(), 4);
        let pairs: std::collections::HashMap<_, _> = flat
            .chunks(2)
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect();
        assert_eq!(pairs[&b("f1")], b("v1"));
        assert_eq!(pairs[&b("f2")], b("v2"));
    }

    #[test]
    fn hdel_counts_removed_fields() {
        let store = Store::new();
        store.hset(&b("h"), b("a"), b("1")).unwrap();
        store.hset(&b("h"), b("b"), b("2")).unwrap();
        assert_eq!(store.hdel(&b("h"), &[b("a"), b("z")]), Ok(1));
        assert_eq!(store.hlen(&b("h")), 1);
        assert_eq!(store.hdel(&b("missing"), &[b("a")]), Ok(0));
    }

    #[test]
    fn hincrby_treats_missing_field_as_zero() {
        let store = Store::new();
        assert_eq!(store.hincrby(&b("h"), b("n"), 5), Ok(5));
        assert_eq!(store.hincrby(&b("h"), b("n"), -2), Ok(3));
        assert_eq!(store.hget(&b("h"), &b("n")), Some(b("3")));
    }

    #[test]
    fn hincrby_rejects_non_integer_field() {
        let store = Store::new();
        store.hset(&b("h"), b("f"), b("abc")).unwrap();
        assert_eq!(
            store.hincrby(&b("h"), b("f"), 1),
            Err(StoreError::NotInteger)
        );
    }

    #[test]
    fn hincrby_scenario() {
        let store = Store::new();
        assert_eq!(store.hset(&b("h"), b("x"), b("1")), Ok(1));
        assert_eq!(store.hset(&b("h"), b("x"), b("2")), Ok(0));
        assert_eq!(store.hincrby(&b("h"), b("x"), 10), Ok(12));
        assert_eq!(store.hget(&b("h"), &b("x")), Some(b("12")));
    }

    #[test]
    fn sadd_ignores_duplicates() {
        let store = Store::new();
        assert_eq!(store.sadd(&b("s"), &[b("a"), b("b"), b("a")]), Ok(2));
        assert_eq!(store.scard(&b("s")), 2);
        assert!(store.sismember(&b("s"), &b("a")));
        assert!(!store.sismember(&b("s"), &b("z")));
    }

    #[test]
    fn srem_returns_non_negative_count() {
        let store = Store::new();
        store.sadd(&b("s"), &[b("a"), b("b")]).unwrap();
        assert_eq!(store.srem(&b("s"), &[b("a"), b("b"), b("z")]), Ok(2));
        assert_eq!(store.scard(&b("s")), 0);
    }

    #[test]
    fn sadd_then_srem_empties_set() {
        let store = Store::new();
        let members = [b("x"), b("y"), b("z")];
        store.sadd(&b("s"), &members).unwrap();
        store.srem(&b("s"), &members).unwrap();
        assert_eq!(store.scard(&b("s")), 0);
        assert_eq!(store.key_type(&b("s")), "none");
    }

    #[test]
    fn sunion_skips_missing_and_wrong_type() {
        let store = Store::new();
        store.sadd(&b("s1"), &[b("a"), b("b")]).unwrap();
        store.sadd(&b("s2"), &[b("b"), b("c")]).unwrap();
        store.set(b("str"), b("v"));
        let mut union = store.sunion(&[b("s1"), b("s2"), b("str"), b("gone")]);
        union.sort();
        assert_eq!(union, vec![b("a"), b("b"), b("c")]);
    }

    #[test]
    fn type_is_stable_until_delete() {
        let store = Store::new();
        store.rpush(&b("k"), &[b("x")]).unwrap();
        assert_eq!(store.key_type(&b("k")), "list");
        assert_eq!(store.sadd(&b("k"), &[b("m")]), Err(StoreError::WrongType));
        assert_eq!(store.hset(&b("k"), b("f"), b("v")), Err(StoreError::WrongType));
        assert_eq!(store.key_type(&b("k")), "list");
        store.del(&[b("k")]);
        store.sadd(&b("k"), &[b("m")]).unwrap();
        assert_eq!(store.key_type(&b("k")), "set");
    }

    #[test]
    fn rename_moves_value_and_expiry() {
        let store = Store::new();
        store.set(b("src"), b("v"));
        store.expire(&b("src"), 100);
        store.set(b("dst"), b("old"));
        assert!(store.rename(&b("src"), &b("dst")).is_ok());
        assert_eq!(store.get(&b("src")), None);
        assert_eq!(store.get(&b("dst")), Some(b("v")));
        assert!(store.ttl(&b("dst")) > 0);
    }

    #[test]
    fn rename_absent_source_fails() {
        let store = Store::new();
        assert_eq!(
            store.rename(&b("nope"), &b("dst")),
            Err(StoreError::NoSuchKey)
        );
    }

    #[test]
    fn rename_clears_stale_destination_deadline() {
        let store = Store::new();
        store.set(b("src"), b("v"));
        store.set(b("dst"), b("old"));
        store.expire(&b("dst"), 100);
        store.rename(&b("src"), &b("dst")).unwrap();
        assert_eq!(store.ttl(&b("dst")), -1);
    }

    #[test]
    fn expire_and_ttl() {
        let store = Store::new();
        assert!(!store.expire(&b("missing"), 10));
        store.set(b("k"), b("v"));
        assert_eq!(store.ttl(&b("k")), -1);
        assert!(store.expire(&b("k"), 100));
        let ttl = store.ttl(&b("k"));
        assert!(ttl > 0 && ttl <= 100);
        assert_eq!(store.ttl(&b("missing")), -2);
    }

    #[test]
    fn expired_key_is_unobservable() {
        let store = Store::new();
        store.set(b("k"), b("v"));
        assert!(store.expire(&b("k"), 0));
        assert_eq!(store.get(&b("k")), None);
        assert_eq!(store.ttl(&b("k")), -2);
        assert_eq!(store.exists(&[b("k")]), 0);
        assert_eq!(store.key_type(&b("k")), "none");
        assert_eq!(store.keys(b"*").unwrap(), Vec::<Bytes>::new());
    }

    #[test]
    fn purge_reclaims_expired_keys() {
        let store = Store::new();
        store.set(b("a"), b("1"));
        store.set(b("b"), b("2"));
        store.expire(&b("a"), 0);
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&b("b")), Some(b("2")));
    }

    #[test]
    fn write_to_expired_key_starts_fresh() {
        let store = Store::new();
        store.sadd(&b("k"), &[b("m")]).unwrap();
        store.expire(&b("k"), 0);
        // The expired set is evicted, so the push creates a new list.
        assert_eq!(store.rpush(&b("k"), &[b("x")]), Ok(1));
        assert_eq!(store.key_type(&b("k")), "list");
        assert_eq!(store.ttl(&b("k")), -1);
    }

    #[test]
    fn move_key_checks() {
        let store = Store::new();
        assert_eq!(store.move_key(&b("k"), 0), Err(StoreError::NoSuchKey));
        store.set(b("k"), b("v"));
        assert_eq!(store.move_key(&b("k"), 0), Ok(()));
        assert_eq!(store.move_key(&b("k"), 3), Err(StoreError::SingleDb));
    }

    #[test]
    fn flush_all_clears_everything() {
        let store = Store::new();
        store.set(b("a"), b("1"));
        store.expire(&b("a"), 100);
        store.sadd(&b("s"), &[b("m")]).unwrap();
        store.flush_all();
        assert!(store.is_empty());
        assert_eq!(store.ttl(&b("a")), -2);
    }

    #[test]
    fn keys_glob_matching() {
        let store = Store::new();
        for name in ["hello", "hallo", "hxllo", "help", "world"] {
            store.set(b(name), b("v"));
        }
        let matched = |pattern: &[u8]| {
            let mut keys = store.keys(pattern).unwrap();
            keys.sort();
            keys
        };
        assert_eq!(matched(b"h?llo"), vec![b("hallo"), b("hello"), b("hxllo")]);
        assert_eq!(matched(b"h[ae]llo"), vec![b("hallo"), b("hello")]);
        assert_eq!(matched(b"h[^ae]llo"), vec![b("hxllo")]);
        assert_eq!(matched(b"*"), vec![
            b("hallo"),
            b("hello"),
            b("help"),
            b("hxllo"),
            b("world")
        ]);
        assert_eq!(matched(b"hel*"), vec![b("hello"), b("help")]);
        assert_eq!(matched(b"nothing*here"), Vec::<Bytes>::new());
    }

    #[test]
    fn keys_rejects_unterminated_class() {
        let store = Store::new();
        assert_eq!(store.keys(b"h[ael"), Err(StoreError::InvalidPattern));
    }

    #[test]
    fn glob_range_matching() {
        let glob = Glob::new(b"key[0-9]").unwrap();
        assert!(glob.matches(b"key5"));
        assert!(!glob.matches(b"keyx"));
        assert!(!glob.matches(b"key10"));
    }

    #[test]
    fn concurrent_incr_yields_two() {
        use std::sync::Arc;
        let store = Arc::new(Store::new());
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.incr(&Bytes::from_static(b"ctr")).unwrap())
            })
            .collect();
        let mut results: Vec<i64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        results.sort_unstable();
        assert_eq!(results, vec![1, 2]);
        assert_eq!(store.get(&b("ctr")), Some(b("2")));
    }
}
