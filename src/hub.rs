//! 4.E Fan-out Hub.
//!
//! Grounded on the fan-in/fan-out router pattern in
//! `other_examples/…unicity-astrid-astrid…inbound_router.rs.rs` (locks never
//! held across an `await`, a bounded channel per consumer) and the
//! backpressure-aware multi-subscriber broadcaster in
//! `other_examples/…maidsafe-autonomi…event_router.rs.rs`. Subscribers get a
//! bounded `mpsc` queue; a full queue means the subscriber is dropped rather
//! than the broadcaster blocking (spec.md §4.E, §5 "Backpressure").

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::auth::Role;

/// A pre-serialized outbound frame, shared across subscribers without
/// re-serializing per recipient.
pub type Frame = Arc<str>;

struct Subscriber {
    role: Role,
    tx: mpsc::Sender<Frame>,
}

/// Per-box subscriber set and broadcast logic.
pub struct BoxHub {
    subscribers: DashMap<u64, Subscriber>,
    next_id: AtomicU64,
    queue_depth: usize,
}

impl BoxHub {
    pub fn new(queue_depth: usize) -> Self {
        Self {
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(1),
            queue_depth,
        }
    }

    /// Register a new subscriber; returns its id (for later `unsubscribe`)
    /// and the receive half of its outbound queue.
    pub fn subscribe(&self, role: Role) -> (u64, mpsc::Receiver<Frame>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.queue_depth);
        self.subscribers.insert(id, Subscriber { role, tx });
        (id, rx)
    }

    pub fn unsubscribe(&self, id: u64) {
        self.subscribers.remove(&id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Broadcast a frame to every current subscriber of this box. Iterates a
    /// snapshot of ids so a subscriber joining mid-broadcast never blocks
    /// this call; slow consumers (full queue) or already-closed receivers
    /// are dropped and their ids returned so the caller can close the
    /// matching WebSocket with `4408 slow_consumer`.
    pub fn broadcast(&self, frame: Frame) -> Vec<u64> {
        let ids: Vec<u64> = self.subscribers.iter().map(|e| *e.key()).collect();
        let mut dropped = Vec::new();
        for id in ids {
            let Some(sub) = self.subscribers.get(&id) else { continue };
            if sub.tx.try_send(frame.clone()).is_err() {
                dropped.push(id);
            }
        }
        for id in &dropped {
            self.subscribers.remove(id);
        }
        dropped
    }

    /// Send a frame to one specific subscriber (e.g. an on-connect snapshot
    /// that should not fan out to everyone else).
    pub fn send_to(&self, id: u64, frame: Frame) -> bool {
        match self.subscribers.get(&id) {
            Some(sub) => sub.tx.try_send(frame).is_ok(),
            None => false,
        }
    }

    pub fn roles(&self) -> Vec<(u64, Role)> {
        self.subscribers.iter().map(|e| (*e.key(), e.value().role)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_delivers_in_order_to_all_subscribers() {
        let hub = BoxHub::new(8);
        let (_id_a, mut rx_a) = hub.subscribe(Role::Judge);
        let (_id_b, mut rx_b) = hub.subscribe(Role::Spectator);

        for i in 0..5 {
            let frame: Frame = Arc::from(format!("msg-{i}"));
            hub.broadcast(frame);
        }

        for i in 0..5 {
            assert_eq!(rx_a.recv().await.unwrap().as_ref(), format!("msg-{i}"));
            assert_eq!(rx_b.recv().await.unwrap().as_ref(), format!("msg-{i}"));
        }
    }

    #[tokio::test]
    async fn slow_consumer_is_dropped_others_unaffected() {
        let hub = BoxHub::new(4);
        let (slow_id, _rx_slow_keep_alive) = hub.subscribe(Role::Spectator);
        let (_fast_id, mut rx_fast) = hub.subscribe(Role::Judge);

        // Fill the slow consumer's queue without ever draining it.
        for i in 0..10 {
            let frame: Frame = Arc::from(format!("msg-{i}"));
            hub.broadcast(frame);
        }

        assert!(!hub.roles().iter().any(|(id, _)| *id == slow_id));
        // The fast consumer still received everything that fit before the
        // slow one was dropped, in order.
        let first = rx_fast.recv().await.unwrap();
        assert_eq!(first.as_ref(), "msg-0");
    }

    #[tokio::test]
    async fn unsubscribe_removes_from_broadcast() {
        let hub = BoxHub::new(4);
        let (id, _rx) = hub.subscribe(Role::Judge);
        hub.unsubscribe(id);
        assert_eq!(hub.subscriber_count(), 0);
    }
}
