//! One-to-many event fan-out.
//!
//! A [`SubscriptionManager`] publishes a value to every live subscriber
//! without ever blocking: each subscription owns a bounded queue and a full
//! queue drops the value for that subscriber only. Snapshot consumers
//! tolerate this by construction — any later snapshot supersedes the ones
//! a slow consumer missed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;

/// Queue depth used when the caller has no opinion.
const DEFAULT_DEPTH: usize = 10;

type SubscriberSet<T> = Arc<Mutex<HashMap<u64, mpsc::Sender<T>>>>;

pub struct SubscriptionManager<T> {
    subscribers: SubscriberSet<T>,
    next_id: AtomicU64,
}

impl<T: Clone + Send + 'static> SubscriptionManager<T> {
    pub fn new() -> Self {
        SubscriptionManager {
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> Subscription<T> {
        self.subscribe_with_depth(DEFAULT_DEPTH)
    }

    pub fn subscribe_with_depth(&self, depth: usize) -> Subscription<T> {
        let (tx, rx) = mpsc::channel(depth.max(1));
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, tx);
        Subscription {
            id,
            rx,
            subscribers: Arc::clone(&self.subscribers),
            closed: false,
        }
    }

    /// Deliver `value` to every subscriber that has room. Never blocks;
    /// a full queue drops the value for that subscriber alone, a closed
    /// subscriber is pruned from the set.
    pub fn publish(&self, value: T) {
        let mut subs = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        let mut gone = Vec::new();
        for (id, tx) in subs.iter() {
            match tx.try_send(value.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(subscriber = id, "subscriber queue full, dropping event");
                }
                Err(TrySendError::Closed(_)) => gone.push(*id),
            }
        }
        for id in gone {
            subs.remove(&id);
        }
    }

    #[allow(dead_code)]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

impl<T: Clone + Send + 'static> Default for SubscriptionManager<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A live subscription. Dropping it closes it.
pub struct Subscription<T> {
    id: u64,
    rx: mpsc::Receiver<T>,
    subscribers: SubscriberSet<T>,
    closed: bool,
}

impl<T> Subscription<T> {
    /// Wait for the next published value. `None` once closed and drained.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Non-blocking receive, for poll-style consumers.
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Remove this subscription from the manager. Idempotent; values
    /// published after close are dropped silently.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.id);
        self.rx.close();
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.close();
    }
}
