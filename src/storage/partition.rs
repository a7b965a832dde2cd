//! Hash-Partitioned Store Front
//!
//! An optional composition over N independent [`Store`]s that spreads keys
//! by hash to cut lock contention. Every key-local operation routes to the
//! owning shard via the 32-bit FNV-1a hash of the key, modulo N; whole-space
//! operations (`KEYS`, `FLUSHALL`) fan out to every shard.
//!
//! Cross-shard `RENAME` is the one operation that needs two locks at once.
//! The shards' locks are always taken in lower-index-first order, and the
//! source shard's lock is released only after the value is installed in the
//! destination, so concurrent renames cannot deadlock and no reader can see
//! the key vanish from both shards.
//!
//! The front exposes the same operation surface as a single store; the
//! shards carry no command log of their own.

use crate::storage::store::{now_secs, Glob, Store, StoreError};
use crate::storage::value::Value;
use bytes::Bytes;
use std::sync::Arc;

const FNV_OFFSET_BASIS: u32 = 0x811c9dc5;
const FNV_PRIME: u32 = 16777619;

/// The 32-bit FNV-1a hash of a key.
fn fnv1a(key: &[u8]) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for &byte in key {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// A fixed-size group of stores with hash routing.
#[derive(Debug)]
pub struct PartitionedStore {
    shards: Vec<Arc<Store>>,
}

impl PartitionedStore {
    /// Creates `count` empty shards. `count` must be at least 1.
    pub fn new(count: usize) -> Self {
        assert!(count >= 1, "partition count must be at least 1");
        Self {
            shards: (0..count).map(|_| Arc::new(Store::new())).collect(),
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    fn index(&self, key: &[u8]) -> usize {
        (fnv1a(key) as usize) % self.shards.len()
    }

    /// The shard owning a key.
    pub fn shard(&self, key: &[u8]) -> &Store {
        &self.shards[self.index(key)]
    }

    // ------------------------------------------------------------------------
    // Key-local operations: route to the owning shard.
    // ------------------------------------------------------------------------

    pub fn set(&self, key: Bytes, value: Bytes) {
        let idx = self.index(&key);
        self.shards[idx].set(key, value);
    }

    pub fn get(&self, key: &Bytes) -> Option<Bytes> {
        self.shard(key).get(key)
    }

    pub fn del(&self, keys: &[Bytes]) -> usize {
        keys.iter()
            .map(|k| self.shard(k).del(std::slice::from_ref(k)))
            .sum()
    }

    pub fn exists(&self, keys: &[Bytes]) -> usize {
        keys.iter()
            .map(|k| self.shard(k).exists(std::slice::from_ref(k)))
            .sum()
    }

    pub fn incr(&self, key: &Bytes) -> Result<i64, StoreError> {
        self.shard(key).incr(key)
    }

    pub fn key_type(&self, key: &Bytes) -> &'static str {
        self.shard(key).key_type(key)
    }

    pub fn expire(&self, key: &Bytes, seconds: i64) -> bool {
        self.shard(key).expire(key, seconds)
    }

    pub fn ttl(&self, key: &Bytes) -> i64 {
        self.shard(key).ttl(key)
    }

    pub fn move_key(&self, key: &Bytes, db: i64) -> Result<(), StoreError> {
        self.shard(key).move_key(key, db)
    }

    pub fn lpush(&self, key: &Bytes, values: &[Bytes]) -> Result<usize, StoreError> {
        self.shard(key).lpush(key, values)
    }

    pub fn rpush(&self, key: &Bytes, values: &[Bytes]) -> Result<usize, StoreError> {
        self.shard(key).rpush(key, values)
    }

    pub fn lpop(&self, key: &Bytes) -> Option<Bytes> {
        self.shard(key).lpop(key)
    }

    pub fn rpop(&self, key: &Bytes) -> Option<Bytes> {
        self.shard(key).rpop(key)
    }

    pub fn lrange(&self, key: &Bytes, start: i64, stop: i64) -> Vec<Bytes> {
        self.shard(key).lrange(key, start, stop)
    }

    pub fn hset(&self, key: &Bytes, field: Bytes, value: Bytes) -> Result<i64, StoreError> {
        self.shard(key).hset(key, field, value)
    }

    pub fn hget(&self, key: &Bytes, field: &Bytes) -> Option<Bytes> {
        self.shard(key).hget(key, field)
    }

    pub fn hdel(&self, key: &Bytes, fields: &[Bytes]) -> Result<usize, StoreError> {
        self.shard(key).hdel(key, fields)
    }

    pub fn hincrby(&self, key: &Bytes, field: Bytes, delta: i64) -> Result<i64, StoreError> {
        self.shard(key).hincrby(key, field, delta)
    }

    pub fn sadd(&self, key: &Bytes, members: &[Bytes]) -> Result<usize, StoreError> {
        self.shard(key).sadd(key, members)
    }

    pub fn srem(&self, key: &Bytes, members: &[Bytes]) -> Result<usize, StoreError> {
        self.shard(key).srem(key, members)
    }

    pub fn sismember(&self, key: &Bytes, member: &Bytes) -> bool {
        self.shard(key).sismember(key, member)
    }

    pub fn smembers(&self, key: &Bytes) -> Vec<Bytes> {
        self.shard(key).smembers(key)
    }

    pub fn scard(&self, key: &Bytes) -> usize {
        self.shard(key).scard(key)
    }

    // ------------------------------------------------------------------------
    // Whole-space operations: fan out.
    // ------------------------------------------------------------------------

    /// Queries every shard in parallel and concatenates the matches.
    pub fn keys(&self, pattern: &[u8]) -> Result<Vec<Bytes>, StoreError> {
        // Validate once so shard queries cannot fail individually.
        Glob::new(pattern)?;

        let mut all = Vec::new();
        std::thread::scope(|scope| {
            let handles: Vec<_> = self
                .shards
                .iter()
                .map(|shard| scope.spawn(move || shard.keys(pattern)))
                .collect();
            for handle in handles {
                if let Ok(Ok(keys)) = handle.join() {
                    all.extend(keys);
                }
            }
        });
        Ok(all)
    }

    pub fn flush_all(&self) {
        for shard in &self.shards {
            shard.flush_all();
        }
    }

    /// Renames across shards. Same-shard renames delegate; cross-shard
    /// renames hold both shards' locks, lower index first.
    pub fn rename(&self, src: &Bytes, dst: &Bytes) -> Result<(), StoreError> {
        let src_idx = self.index(src);
        let dst_idx = self.index(dst);
        if src_idx == dst_idx {
            return self.shards[src_idx].rename(src, dst);
        }

        let (low, high) = if src_idx < dst_idx {
            (src_idx, dst_idx)
        } else {
            (dst_idx, src_idx)
        };
        let low_guard = self.shards[low].inner_write();
        let high_guard = self.shards[high].inner_write();
        let (mut src_inner, mut dst_inner) = if src_idx == low {
            (low_guard, high_guard)
        } else {
            (high_guard, low_guard)
        };

        let now = now_secs();
        src_inner.evict_if_expired(src, now);
        dst_inner.evict_if_expired(dst, now);

        let value: Value = src_inner.data.remove(src).ok_or(StoreError::NoSuchKey)?;
        let deadline = src_inner.expiry.remove(src);
        dst_inner.remove(dst);
        dst_inner.data.insert(dst.clone(), value);
        if let Some(deadline) = deadline {
            dst_inner.expiry.insert(dst.clone(), deadline);
        }

        // Both guards drop here: the source lock is released only after the
        // destination holds the value.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    /// Finds two keys that land on different shards of a 4-way front.
    fn cross_shard_pair(front: &PartitionedStore) -> (Bytes, Bytes) {
        let first = b("key-0");
        for i in 1..64 {
            let candidate = Bytes::from(format!("key-{}", i));
            if front.index(&candidate) != front.index(&first) {
                return (first, candidate);
            }
        }
        panic!("no cross-shard pair found");
    }

    #[test]
    fn fnv1a_reference_values() {
        // Published FNV-1a 32-bit test vectors.
        assert_eq!(fnv1a(b""), 0x811c9dc5);
        assert_eq!(fnv1a(b"a"), 0xe40c292c);
        assert_eq!(fnv1a(b"foobar"), 0xbf9cf968);
    }

    #[test]
    fn routing_is_stable() {
        let front = PartitionedStore::new(4);
        let key = b("stable");
        let idx = front.index(&key);
        for _ in 0..10 {
            assert_eq!(front.index(&key), idx);
        }
    }

    #[test]
    fn set_get_through_front() {
        let front = PartitionedStore::new(4);
        for i in 0..32 {
            front.set(Bytes::from(format!("k{}", i)), Bytes::from(format!("v{}", i)));
        }
        for i in 0..32 {
            assert_eq!(
                front.get(&Bytes::from(format!("k{}", i))),
                Some(Bytes::from(format!("v{}", i)))
            );
        }
    }

    #[test]
    fn del_and_exists_route_per_key() {
        let front = PartitionedStore::new(4);
        front.set(b("a"), b("1"));
        front.set(b("b"), b("2"));
        assert_eq!(front.exists(&[b("a"), b("b"), b("c")]), 2);
        assert_eq!(front.del(&[b("a"), b("c")]), 1);
        assert_eq!(front.exists(&[b("a"), b("b")]), 1);
    }

    #[test]
    fn keys_fans_out_across_shards() {
        let front = PartitionedStore::new(4);
        for i in 0..32 {
            front.set(Bytes::from(format!("user:{}", i)), b("v"));
        }
        front.set(b("other"), b("v"));
        let matched = front.keys(b"user:*").unwrap();
        assert_eq!(matched.len(), 32);
    }

    #[test]
    fn flush_all_clears_every_shard() {
        let front = PartitionedStore::new(4);
        for i in 0..32 {
            front.set(Bytes::from(format!("k{}", i)), b("v"));
        }
        front.flush_all();
        assert_eq!(front.keys(b"*").unwrap().len(), 0);
    }

    #[test]
    fn cross_shard_rename_transfers_value_and_expiry() {
        let front = PartitionedStore::new(4);
        let (src, dst) = cross_shard_pair(&front);
        front.set(src.clone(), b("payload"));
        front.expire(&src, 100);
        assert!(front.rename(&src, &dst).is_ok());
        assert_eq!(front.get(&src), None);
        assert_eq!(front.get(&dst), Some(b("payload")));
        assert!(front.ttl(&dst) > 0);
    }

    #[test]
    fn cross_shard_rename_overwrites_destination() {
        let front = PartitionedStore::new(4);
        let (src, dst) = cross_shard_pair(&front);
        front.set(src.clone(), b("new"));
        front.set(dst.clone(), b("old"));
        front.rename(&src, &dst).unwrap();
        assert_eq!(front.get(&dst), Some(b("new")));
    }

    #[test]
    fn rename_absent_source_fails() {
        let front = PartitionedStore::new(4);
        let (src, dst) = cross_shard_pair(&front);
        assert_eq!(front.rename(&src, &dst), Err(StoreError::NoSuchKey));
    }

    #[test]
    fn concurrent_opposing_renames_do_not_deadlock() {
        let front = Arc::new(PartitionedStore::new(4));
        let (a, z) = cross_shard_pair(&front);

        for round in 0..50 {
            front.set(a.clone(), b("va"));
            front.set(z.clone(), b("vz"));

            let f1 = Arc::clone(&front);
            let (a1, z1) = (a.clone(), z.clone());
            let t1 = std::thread::spawn(move || {
                let _ = f1.rename(&a1, &z1);
            });
            let f2 = Arc::clone(&front);
            let (a2, z2) = (a.clone(), z.clone());
            let t2 = std::thread::spawn(move || {
                let _ = f2.rename(&z2, &a2);
            });
            t1.join().unwrap();
            t2.join().unwrap();

            // One key survives each round, whichever rename won.
            assert_eq!(front.exists(&[a.clone(), z.clone()]), 1, "round {}", round);
        }
    }

    #[test]
    fn typed_operations_route_through_front() {
        let front = PartitionedStore::new(4);
        front.rpush(&b("list"), &[b("a"), b("b")]).unwrap();
        assert_eq!(front.lrange(&b("list"), 0, -1), vec![b("a"), b("b")]);
        assert_eq!(front.lpop(&b("list")), Some(b("a")));

        front.hset(&b("hash"), b("f"), b("v")).unwrap();
        assert_eq!(front.hget(&b("hash"), &b("f")), Some(b("v")));
        assert_eq!(front.hincrby(&b("hash"), b("n"), 7), Ok(7));

        front.sadd(&b("set"), &[b("x"), b("y")]).unwrap();
        assert_eq!(front.scard(&b("set")), 2);
        assert!(front.sismember(&b("set"), &b("x")));
        assert_eq!(front.srem(&b("set"), &[b("x")]), Ok(1));
    }
}
