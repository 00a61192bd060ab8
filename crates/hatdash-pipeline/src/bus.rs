//! In-process fan-out of published samples to live viewers.
//!
//! Built on a `tokio::sync::broadcast` ring: publishing never waits for a
//! consumer, each subscriber has its own read position, and a subscriber that
//! falls more than `capacity` samples behind skips the oldest ones.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hatdash_core::Sample;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::{debug, trace};

#[derive(Clone)]
pub struct SampleBus {
    tx: broadcast::Sender<Arc<Sample>>,
    next_id: Arc<AtomicU64>,
}

impl SampleBus {
    /// `capacity` is the per-subscriber backlog before old samples are dropped.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Hands `sample` to every current subscriber and returns how many there were.
    pub fn publish(&self, sample: Arc<Sample>) -> usize {
        let seq = sample.sequence;
        match self.tx.send(sample) {
            Ok(n) => {
                trace!(seq, subscribers = n, "published");
                n
            }
            // No subscribers is a normal state, not a fault.
            Err(_) => 0,
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(id, "subscriber registered");
        Subscription {
            id,
            rx: self.tx.subscribe(),
            skipped: 0,
        }
    }

    /// Revokes a subscription. Dropping the handle has the same effect.
    pub fn unsubscribe(&self, sub: Subscription) {
        debug!(id = sub.id, skipped = sub.skipped, "subscriber removed");
        drop(sub);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// A live viewer's handle on the bus.
pub struct Subscription {
    id: u64,
    rx: broadcast::Receiver<Arc<Sample>>,
    skipped: u64,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Samples this subscriber lost by falling behind.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Next sample, or `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<Arc<Sample>> {
        loop {
            match self.rx.recv().await {
                Ok(sample) => return Some(sample),
                Err(RecvError::Lagged(n)) => self.lagged(n),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next already-queued sample, if any.
    pub fn try_recv(&mut self) -> Option<Arc<Sample>> {
        loop {
            match self.rx.try_recv() {
                Ok(sample) => return Some(sample),
                Err(TryRecvError::Lagged(n)) => self.lagged(n),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    fn lagged(&mut self, n: u64) {
        self.skipped += n;
        debug!(id = self.id, dropped = n, "slow subscriber skipped samples");
    }
}
