//! Publish/Subscribe Fan-Out
//!
//! A registry from channel name to the set of subscriber delivery queues,
//! independent of the key-value store. Each subscriber owns a bounded queue
//! (capacity 100); the registry holds only the sending half for the
//! lifetime of the subscription.
//!
//! Publishing never blocks: the subscriber list is copied under a short
//! lock, the lock is released, and each queue gets a `try_send`. A full
//! queue drops that subscriber's copy of the message. The return value
//! counts subscribers delivery was *attempted* to, not deliveries that
//! succeeded.
//!
//! Per-subscriber ordering follows publication order on a channel; nothing
//! is guaranteed across channels.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

/// Capacity of each subscriber's delivery queue.
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 100;

/// Identifies one subscription within the registry.
pub type SubscriberId = u64;

#[derive(Debug)]
struct Subscriber {
    id: SubscriberId,
    queue: mpsc::Sender<Bytes>,
}

/// The channel → subscribers registry.
#[derive(Debug, Default)]
pub struct PubSub {
    channels: Mutex<HashMap<Bytes, Vec<Subscriber>>>,
    next_id: AtomicU64,
}

impl PubSub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new subscriber on `channel`. The caller owns the
    /// receiving half; it closes when the subscription is removed.
    pub fn subscribe(&self, channel: Bytes) -> (SubscriberId, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut channels = self.channels.lock().unwrap();
        channels
            .entry(channel)
            .or_default()
            .push(Subscriber { id, queue: tx });
        (id, rx)
    }

    /// Removes a subscription. Dropping the registry's sender closes the
    /// subscriber's queue, which ends its delivery loop.
    pub fn unsubscribe(&self, channel: &Bytes, id: SubscriberId) -> bool {
        let mut channels = self.channels.lock().unwrap();
        let Some(subscribers) = channels.get_mut(channel) else {
            return false;
        };
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        let removed = subscribers.len() < before;
        if subscribers.is_empty() {
            channels.remove(channel);
        }
        removed
    }

    /// Fans `message` out to every subscriber of `channel`, non-blocking.
    /// Returns the number of subscribers delivery was attempted to.
    pub fn publish(&self, channel: &Bytes, message: Bytes) -> usize {
        // Copy the senders so the registry lock is not held across sends.
        let queues: Vec<mpsc::Sender<Bytes>> = {
            let channels = self.channels.lock().unwrap();
            match channels.get(channel) {
                Some(subscribers) => subscribers.iter().map(|s| s.queue.clone()).collect(),
                None => return 0,
            }
        };

        let attempted = queues.len();
        for queue in queues {
            if let Err(mpsc::error::TrySendError::Full(_)) = queue.try_send(message.clone()) {
                debug!("subscriber queue full, dropping message");
            }
        }
        attempted
    }

    /// How many subscribers a channel currently has.
    pub fn subscriber_count(&self, channel: &Bytes) -> usize {
        self.channels
            .lock()
            .unwrap()
            .get(channel)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[tokio::test]
    async fn publish_reaches_every_subscriber() {
        let pubsub = PubSub::new();
        let (_id1, mut rx1) = pubsub.subscribe(b("news"));
        let (_id2, mut rx2) = pubsub.subscribe(b("news"));

        assert_eq!(pubsub.publish(&b("news"), b("hello")), 2);
        assert_eq!(rx1.recv().await, Some(b("hello")));
        assert_eq!(rx2.recv().await, Some(b("hello")));
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_zero() {
        let pubsub = PubSub::new();
        assert_eq!(pubsub.publish(&b("empty"), b("msg")), 0);
    }

    #[tokio::test]
    async fn channels_are_independent() {
        let pubsub = PubSub::new();
        let (_id, mut rx) = pubsub.subscribe(b("a"));
        pubsub.publish(&b("b"), b("other"));
        pubsub.publish(&b("a"), b("mine"));
        assert_eq!(rx.recv().await, Some(b("mine")));
    }

    #[tokio::test]
    async fn messages_arrive_in_publication_order() {
        let pubsub = PubSub::new();
        let (_id, mut rx) = pubsub.subscribe(b("ch"));
        for i in 0..10 {
            pubsub.publish(&b("ch"), Bytes::from(i.to_string()));
        }
        for i in 0..10 {
            assert_eq!(rx.recv().await, Some(Bytes::from(i.to_string())));
        }
    }

    #[tokio::test]
    async fn unsubscribe_closes_the_queue() {
        let pubsub = PubSub::new();
        let (id, mut rx) = pubsub.subscribe(b("ch"));
        assert!(pubsub.unsubscribe(&b("ch"), id));
        assert!(!pubsub.unsubscribe(&b("ch"), id));
        // The registry held the only sender; the queue is now closed.
        assert_eq!(rx.recv().await, None);
        assert_eq!(pubsub.subscriber_count(&b("ch")), 0);
    }

    #[tokio::test]
    async fn full_queue_drops_but_still_counts_attempt() {
        let pubsub = PubSub::new();
        let (_id, mut rx) = pubsub.subscribe(b("ch"));

        for i in 0..SUBSCRIBER_QUEUE_CAPACITY + 5 {
            assert_eq!(pubsub.publish(&b("ch"), Bytes::from(i.to_string())), 1);
        }

        // Only the first CAPACITY messages made it; the rest were dropped.
        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, SUBSCRIBER_QUEUE_CAPACITY);
    }

    #[tokio::test]
    async fn counts_attempted_not_succeeded() {
        let pubsub = PubSub::new();
        let (_id, rx) = pubsub.subscribe(b("ch"));
        // Fill the queue, then keep publishing: the count stays at 1.
        for _ in 0..SUBSCRIBER_QUEUE_CAPACITY {
            pubsub.publish(&b("ch"), b("x"));
        }
        assert_eq!(pubsub.publish(&b("ch"), b("overflow")), 1);
        drop(rx);
    }
}
