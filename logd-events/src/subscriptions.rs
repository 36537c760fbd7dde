//! Per-topic subscription set.
//!
//! Owned exclusively by the topic's event queue; no other task touches it.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use logd_core::{ConnId, Stats};
use logd_store::LogChunk;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::request::StreamChunk;

struct Subscription {
    tx: mpsc::Sender<StreamChunk>,
    done: watch::Receiver<bool>,
}

/// Registry of tailing connections for one topic.
pub(crate) struct Subscriptions {
    subs: HashMap<ConnId, Subscription>,
    stats: Arc<Stats>,
}

impl Subscriptions {
    pub fn new(stats: Arc<Stats>) -> Self {
        Self {
            subs: HashMap::new(),
            stats,
        }
    }

    /// Registers a subscriber. A connection re-subscribing replaces its
    /// previous stream.
    pub fn add(&mut self, conn_id: ConnId, tx: mpsc::Sender<StreamChunk>, done: watch::Receiver<bool>) {
        if self.subs.insert(conn_id, Subscription { tx, done }).is_none() {
            Stats::incr(&self.stats.subscriptions);
            Stats::incr(&self.stats.total_subscriptions);
        }
        debug!(%conn_id, "added subscription");
    }

    /// Drops a subscriber. Its chunk sender is dropped, which terminates
    /// the connection's drain loop.
    pub fn remove(&mut self, conn_id: ConnId) {
        if self.subs.remove(&conn_id).is_some() {
            Stats::decr(&self.stats.subscriptions);
            debug!(%conn_id, "removed subscription");
        }
    }

    /// Sends freshly committed batch bytes to every subscriber.
    ///
    /// Sends never block the event queue: a subscriber whose channel is
    /// full is dropped (slow-consumer policy), as is one whose connection
    /// already signalled done.
    pub fn broadcast(&mut self, wire: &Bytes) {
        let stats = Arc::clone(&self.stats);
        self.subs.retain(|conn_id, sub| {
            if *sub.done.borrow() {
                Stats::decr(&stats.subscriptions);
                debug!(%conn_id, "subscription done");
                return false;
            }
            match sub.tx.try_send(StreamChunk::Data(LogChunk::from_bytes(wire.clone()))) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    Stats::decr(&stats.subscriptions);
                    warn!(%conn_id, "dropping slow subscriber");
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    Stats::decr(&stats.subscriptions);
                    debug!(%conn_id, "subscriber went away");
                    false
                }
            }
        });
    }

    /// Drops every subscription, ending all drain loops.
    pub fn clear(&mut self) {
        for _ in 0..self.subs.len() {
            Stats::decr(&self.stats.subscriptions);
        }
        self.subs.clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.subs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub_pair(capacity: usize) -> (mpsc::Sender<StreamChunk>, mpsc::Receiver<StreamChunk>, watch::Sender<bool>, watch::Receiver<bool>) {
        let (tx, rx) = mpsc::channel(capacity);
        let (done_tx, done_rx) = watch::channel(false);
        (tx, rx, done_tx, done_rx)
    }

    #[tokio::test]
    async fn test_broadcast_delivers() {
        let mut subs = Subscriptions::new(Arc::new(Stats::new()));
        let (tx, mut rx, _done_tx, done_rx) = sub_pair(8);
        subs.add(ConnId::new(1), tx, done_rx);

        subs.broadcast(&Bytes::from_static(b"batch-bytes"));
        match rx.try_recv().unwrap() {
            StreamChunk::Data(chunk) => assert_eq!(chunk.len(), 11),
            StreamChunk::Eof => panic!("unexpected EOF"),
        }
        assert_eq!(subs.len(), 1);
    }

    #[tokio::test]
    async fn test_slow_subscriber_dropped() {
        let mut subs = Subscriptions::new(Arc::new(Stats::new()));
        let (tx, _rx, _done_tx, done_rx) = sub_pair(1);
        subs.add(ConnId::new(1), tx, done_rx);

        subs.broadcast(&Bytes::from_static(b"one"));
        // Channel is full now; the next broadcast drops the subscription.
        subs.broadcast(&Bytes::from_static(b"two"));
        assert_eq!(subs.len(), 0);
    }

    #[tokio::test]
    async fn test_done_subscriber_dropped() {
        let mut subs = Subscriptions::new(Arc::new(Stats::new()));
        let (tx, _rx, done_tx, done_rx) = sub_pair(8);
        subs.add(ConnId::new(1), tx, done_rx);

        done_tx.send(true).unwrap();
        subs.broadcast(&Bytes::from_static(b"one"));
        assert_eq!(subs.len(), 0);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let stats = Arc::new(Stats::new());
        let mut subs = Subscriptions::new(Arc::clone(&stats));
        let (tx, _rx, _done_tx, done_rx) = sub_pair(8);
        subs.add(ConnId::new(1), tx, done_rx);

        subs.remove(ConnId::new(1));
        subs.remove(ConnId::new(1));
        assert_eq!(subs.len(), 0);
        assert_eq!(
            stats.subscriptions.load(std::sync::atomic::Ordering::Relaxed),
            0
        );
    }
}
