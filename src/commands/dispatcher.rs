//! Command Dispatcher
//!
//! The translation layer between parsed requests and store/pub-sub calls.
//! Matching is case-insensitive; every handler validates its argument count
//! first, then argument shapes, then performs the operation and shapes the
//! reply.
//!
//! The same dispatcher serves live connections and boot-time log replay.
//! Replay passes no [`Session`], which suppresses every pub/sub effect; the
//! store suppresses re-appending on its own because no command log is
//! attached yet at that point.

use crate::protocol::{Reply, Request};
use crate::pubsub::{PubSub, SubscriberId};
use crate::storage::Store;
use bytes::Bytes;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

/// Connection-local command state: the subscription map and the outbound
/// frame channel that pub/sub deliveries and out-of-band replies go through.
#[derive(Debug)]
pub struct Session {
    /// Channel name → this connection's subscriber id.
    pub subscriptions: HashMap<Bytes, SubscriberId>,
    /// Sink for encoded frames; the connection's writer task drains it.
    pub out: mpsc::UnboundedSender<Vec<u8>>,
}

impl Session {
    pub fn new(out: mpsc::UnboundedSender<Vec<u8>>) -> Self {
        Self {
            subscriptions: HashMap::new(),
            out,
        }
    }
}

/// Maps `(command, args)` to store and pub/sub calls and a reply.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    store: Arc<Store>,
    pubsub: Arc<PubSub>,
    snapshot_path: Option<PathBuf>,
}

impl Dispatcher {
    pub fn new(store: Arc<Store>, pubsub: Arc<PubSub>, snapshot_path: Option<PathBuf>) -> Self {
        Self {
            store,
            pubsub,
            snapshot_path,
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn pubsub(&self) -> &Arc<PubSub> {
        &self.pubsub
    }

    /// Executes one request. `session` is `None` during log replay, which
    /// suppresses pub/sub effects.
    pub fn execute(&self, request: &Request, session: Option<&mut Session>) -> Reply {
        let name = request.name();
        let args = request.tail();

        match name.as_str() {
            "PING" => self.cmd_ping(args),
            "SET" => self.cmd_set(args),
            "GET" => self.cmd_get(args),
            "DEL" => self.cmd_del(args),
            "EXISTS" => self.cmd_exists(args),

            "LPUSH" => self.cmd_push(args, true),
            "RPUSH" => self.cmd_push(args, false),
            "LPOP" => self.cmd_pop(args, true),
            "RPOP" => self.cmd_pop(args, false),
            "LRANGE" => self.cmd_lrange(args),

            "SADD" => self.cmd_sadd(args),
            "SREM" => self.cmd_srem(args),
            "SISMEMBER" => self.cmd_sismember(args),
            "SMEMBERS" => self.cmd_smembers(args),
            "SCARD" => self.cmd_scard(args),
            "SUNION" => self.cmd_sunion(args),

            "HSET" => self.cmd_hset(args),
            "HGET" => self.cmd_hget(args),
            "HGETALL" => self.cmd_hgetall(args),
            "HDEL" => self.cmd_hdel(args),
            "HEXISTS" => self.cmd_hexists(args),
            "HLEN" => self.cmd_hlen(args),
            "HINCRBY" => self.cmd_hincrby(args),

            "EXPIRE" => self.cmd_expire(args),
            "TTL" => self.cmd_ttl(args),
            "INCR" => self.cmd_incr(args),
            "TYPE" => self.cmd_type(args),
            "KEYS" => self.cmd_keys(args),
            "FLUSHALL" => self.cmd_flushall(args),
            "RENAME" => self.cmd_rename(args),
            "MOVE" => self.cmd_move(args),
            "SAVE" => self.cmd_save(args),

            "SUBSCRIBE" => self.cmd_subscribe(args, session),
            "PUBLISH" => self.cmd_publish(args, session),
            "UNSUBSCRIBE" => self.cmd_unsubscribe(args, session),

            _ => Reply::err("unknown command"),
        }
    }

    // ========================================================================
    // Server commands
    // ========================================================================

    fn cmd_ping(&self, args: &[Bytes]) -> Reply {
        match args {
            [] => Reply::pong(),
            [message] => Reply::Bulk(message.clone()),
            _ => wrong_arity("ping"),
        }
    }

    fn cmd_save(&self, args: &[Bytes]) -> Reply {
        if !args.is_empty() {
            return wrong_arity("save");
        }
        let Some(path) = &self.snapshot_path else {
            return Reply::err("failed to save snapshot");
        };
        match self.store.save_snapshot(path) {
            Ok(()) => Reply::ok(),
            Err(e) => {
                warn!(error = %e, "SAVE failed");
                Reply::err("failed to save snapshot")
            }
        }
    }

    // ========================================================================
    // String commands
    // ========================================================================

    fn cmd_set(&self, args: &[Bytes]) -> Reply {
        let [key, value] = args else {
            return wrong_arity("set");
        };
        self.store.set(key.clone(), value.clone());
        Reply::ok()
    }

    fn cmd_get(&self, args: &[Bytes]) -> Reply {
        let [key] = args else {
            return wrong_arity("get");
        };
        match self.store.get(key) {
            Some(value) => Reply::Bulk(value),
            None => Reply::NullBulk,
        }
    }

    fn cmd_incr(&self, args: &[Bytes]) -> Reply {
        let [key] = args else {
            return wrong_arity("incr");
        };
        match self.store.incr(key) {
            Ok(n) => Reply::Integer(n),
            Err(e) => Reply::err(e),
        }
    }

    // ========================================================================
    // Key commands
    // ========================================================================

    fn cmd_del(&self, args: &[Bytes]) -> Reply {
        if args.is_empty() {
            return wrong_arity("del");
        }
        Reply::Integer(self.store.del(args) as i64)
    }

    fn cmd_exists(&self, args: &[Bytes]) -> Reply {
        if args.is_empty() {
            return wrong_arity("exists");
        }
        Reply::Integer(self.store.exists(args) as i64)
    }

    fn cmd_expire(&self, args: &[Bytes]) -> Reply {
        let [key, seconds] = args else {
            return wrong_arity("expire");
        };
        match parse_int(seconds) {
            Some(seconds) if seconds >= 0 => {
                Reply::Integer(if self.store.expire(key, seconds) { 1 } else { 0 })
            }
            _ => Reply::err("invalid expire time"),
        }
    }

    fn cmd_ttl(&self, args: &[Bytes]) -> Reply {
        let [key] = args else {
            return wrong_arity("ttl");
        };
        Reply::Integer(self.store.ttl(key))
    }

    fn cmd_type(&self, args: &[Bytes]) -> Reply {
        let [key] = args else {
            return wrong_arity("type");
        };
        Reply::Simple(self.store.key_type(key).to_string())
    }

    fn cmd_keys(&self, args: &[Bytes]) -> Reply {
        let [pattern] = args else {
            return wrong_arity("keys");
        };
        match self.store.keys(pattern) {
            Ok(keys) => Reply::Array(keys),
            Err(e) => Reply::err(e),
        }
    }

    fn cmd_flushall(&self, args: &[Bytes]) -> Reply {
        if !args.is_empty() {
            return wrong_arity("flushall");
        }
        self.store.flush_all();
        Reply::ok()
    }

    fn cmd_rename(&self, args: &[Bytes]) -> Reply {
        let [src, dst] = args else {
            return wrong_arity("rename");
        };
        match self.store.rename(src, dst) {
            Ok(()) => Reply::ok(),
            Err(e) => Reply::err(e),
        }
    }

    fn cmd_move(&self, args: &[Bytes]) -> Reply {
        let [key, db] = args else {
            return wrong_arity("move");
        };
        let Some(db) = parse_int(db) else {
            return Reply::err("invalid DB index");
        };
        match self.store.move_key(key, db) {
            Ok(()) => Reply::Integer(1),
            Err(e) => Reply::err(e),
        }
    }

    // ========================================================================
    // List commands
    // ========================================================================

    fn cmd_push(&self, args: &[Bytes], front: bool) -> Reply {
        if args.len() < 2 {
            return wrong_arity(if front { "lpush" } else { "rpush" });
        }
        let (key, values) = (&args[0], &args[1..]);
        let result = if front {
            self.store.lpush(key, values)
        } else {
            self.store.rpush(key, values)
        };
        match result {
            Ok(len) => Reply::Integer(len as i64),
            Err(e) => Reply::err(e),
        }
    }

    fn cmd_pop(&self, args: &[Bytes], front: bool) -> Reply {
        let [key] = args else {
            return wrong_arity(if front { "lpop" } else { "rpop" });
        };
        let value = if front {
            self.store.lpop(key)
        } else {
            self.store.rpop(key)
        };
        match value {
            Some(value) => Reply::Bulk(value),
            None => Reply::NullBulk,
        }
    }

    fn cmd_lrange(&self, args: &[Bytes]) -> Reply {
        let [key, start, stop] = args else {
            return wrong_arity("lrange");
        };
        let (Some(start), Some(stop)) = (parse_int(start), parse_int(stop)) else {
            return Reply::err("start and stop must be integers");
        };
        Reply::Array(self.store.lrange(key, start, stop))
    }

    // ========================================================================
    // Set commands
    // ========================================================================

    fn cmd_sadd(&self, args: &[Bytes]) -> Reply {
        if args.len() < 2 {
            return wrong_arity("sadd");
        }
        match self.store.sadd(&args[0], &args[1..]) {
            Ok(added) => Reply::Integer(added as i64),
            Err(e) => Reply::err(e),
        }
    }

    fn cmd_srem(&self, args: &[Bytes]) -> Reply {
        if args.len() < 2 {
            return wrong_arity("srem");
        }
        match self.store.srem(&args[0], &args[1..]) {
            Ok(removed) => Reply::Integer(removed as i64),
            Err(e) => Reply::err(e),
        }
    }

    fn cmd_sismember(&self, args: &[Bytes]) -> Reply {
        let [key, member] = args else {
            return wrong_arity("sismember");
        };
        Reply::Integer(self.store.sismember(key, member) as i64)
    }

    fn cmd_smembers(&self, args: &[Bytes]) -> Reply {
        let [key] = args else {
            return wrong_arity("smembers");
        };
        Reply::Array(self.store.smembers(key))
    }

    fn cmd_scard(&self, args: &[Bytes]) -> Reply {
        let [key] = args else {
            return wrong_arity("scard");
        };
        Reply::Integer(self.store.scard(key) as i64)
    }

    fn cmd_sunion(&self, args: &[Bytes]) -> Reply {
        if args.is_empty() {
            return wrong_arity("sunion");
        }
        Reply::Array(self.store.sunion(args))
    }

    // ========================================================================
    // Hash commands
    // ========================================================================

    fn cmd_hset(&self, args: &[Bytes]) -> Reply {
        let [key, field, value] = args else {
            return wrong_arity("hset");
        };
        match self.store.hset(key, field.clone(), value.clone()) {
            Ok(created) => Reply::Integer(created),
            Err(e) => Reply::err(e),
        }
    }

    fn cmd_hget(&self, args: &[Bytes]) -> Reply {
        let [key, field] = args else {
            return wrong_arity("hget");
        };
        match self.store.hget(key, field) {
            Some(value) => Reply::Bulk(value),
            None => Reply::NullBulk,
        }
    }

    fn cmd_hgetall(&self, args: &[Bytes]) -> Reply {
        let [key] = args else {
            return wrong_arity("hgetall");
        };
        Reply::Array(self.store.hgetall(key))
    }

    fn cmd_hdel(&self, args: &[Bytes]) -> Reply {
        if args.len() < 2 {
            return wrong_arity("hdel");
        }
        match self.store.hdel(&args[0], &args[1..]) {
            Ok(removed) => Reply::Integer(removed as i64),
            Err(e) => Reply::err(e),
        }
    }

    fn cmd_hexists(&self, args: &[Bytes]) -> Reply {
        let [key, field] = args else {
            return wrong_arity("hexists");
        };
        Reply::Integer(self.store.hexists(key, field) as i64)
    }

    fn cmd_hlen(&self, args: &[Bytes]) -> Reply {
        let [key] = args else {
            return wrong_arity("hlen");
        };
        Reply::Integer(self.store.hlen(key) as i64)
    }

    fn cmd_hincrby(&self, args: &[Bytes]) -> Reply {
        let [key, field, delta] = args else {
            return wrong_arity("hincrby");
        };
        let Some(delta) = parse_int(delta) else {
            return Reply::err("increment must be integer");
        };
        match self.store.hincrby(key, field.clone(), delta) {
            Ok(n) => Reply::Integer(n),
            Err(e) => Reply::err(e),
        }
    }

    // ========================================================================
    // Pub/sub commands
    // ========================================================================

    fn cmd_subscribe(&self, args: &[Bytes], session: Option<&mut Session>) -> Reply {
        let [channel] = args else {
            return wrong_arity("subscribe");
        };
        let Some(session) = session else {
            return Reply::None;
        };
        if session.subscriptions.contains_key(channel) {
            return Reply::ok();
        }

        let (id, rx) = self.pubsub.subscribe(channel.clone());
        session.subscriptions.insert(channel.clone(), id);
        tokio::spawn(deliver_loop(channel.clone(), rx, session.out.clone()));
        Reply::ok()
    }

    fn cmd_publish(&self, args: &[Bytes], session: Option<&mut Session>) -> Reply {
        let [channel, message] = args else {
            return wrong_arity("publish");
        };
        if session.is_none() {
            return Reply::None;
        }
        Reply::Integer(self.pubsub.publish(channel, message.clone()) as i64)
    }

    fn cmd_unsubscribe(&self, args: &[Bytes], session: Option<&mut Session>) -> Reply {
        if args.is_empty() {
            return wrong_arity("unsubscribe");
        }
        let Some(session) = session else {
            return Reply::None;
        };

        for channel in args {
            if let Some(id) = session.subscriptions.remove(channel) {
                self.pubsub.unsubscribe(channel, id);
            }
            let frame = Reply::Array(vec![Bytes::from_static(b"unsubscribed"), channel.clone()]);
            let _ = session.out.send(frame.encode());
        }
        Reply::None
    }
}

/// Forwards queued messages to the connection as `message` frames until the
/// subscription's queue closes.
async fn deliver_loop(
    channel: Bytes,
    mut rx: mpsc::Receiver<Bytes>,
    out: mpsc::UnboundedSender<Vec<u8>>,
) {
    while let Some(message) = rx.recv().await {
        let frame = Reply::Array(vec![
            Bytes::from_static(b"message"),
            channel.clone(),
            message,
        ]);
        if out.send(frame.encode()).is_err() {
            return;
        }
    }
}

fn wrong_arity(cmd: &str) -> Reply {
    Reply::err(format_args!("wrong number of arguments for '{}'", cmd))
}

fn parse_int(arg: &Bytes) -> Option<i64> {
    std::str::from_utf8(arg).ok()?.parse().ok()
}
