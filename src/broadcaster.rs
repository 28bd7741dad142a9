use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::error::ArbError;
use crate::shared_types::{EventSnapshot, WireSnapshot};

pub type SubscriberId = u64;

/// A registered subscriber's receiving end. Yields serialized snapshot
/// batches; `None` means the broadcaster dropped the subscriber.
pub struct Subscription {
    pub id: SubscriberId,
    pub receiver: mpsc::Receiver<Arc<str>>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub pruned: Vec<SubscriberId>,
}

#[derive(Default)]
struct Registry {
    subscribers: HashMap<SubscriberId, mpsc::Sender<Arc<str>>>,
    latest: Option<Arc<str>>,
    closed: bool,
}

/// Fans each cycle's snapshots out to every live subscriber.
///
/// Registration, removal and fan-out all take the same lock, and sends
/// never wait, so one cycle is fully queued to everyone before the next
/// one starts and a stuck subscriber cannot hold up the rest.
pub struct Broadcaster {
    registry: Mutex<Registry>,
    next_id: AtomicU64,
    buffer: usize,
}

impl Broadcaster {
    pub fn new(buffer: usize) -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    /// Adds a subscriber. It starts with the most recent batch, if any.
    /// After `close_all` the returned receiver is already closed.
    pub async fn register(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.buffer);

        let mut registry = self.registry.lock().await;
        if !registry.closed {
            if let Some(latest) = &registry.latest {
                // fresh channel with capacity >= 1, cannot be full
                let _ = tx.try_send(latest.clone());
            }
            registry.subscribers.insert(id, tx);
            debug!(subscriber = id, total = registry.subscribers.len(), "subscriber registered");
        }

        Subscription { id, receiver: rx }
    }

    /// Removes a subscriber. Removing an unknown id is a no-op.
    pub async fn unregister(&self, id: SubscriberId) -> bool {
        let removed = self.registry.lock().await.subscribers.remove(&id).is_some();
        if removed {
            debug!(subscriber = id, "subscriber unregistered");
        }
        removed
    }

    pub async fn subscriber_count(&self) -> usize {
        self.registry.lock().await.subscribers.len()
    }

    /// Serializes one cycle's snapshots and delivers them to everyone.
    pub async fn broadcast(&self, snapshots: &[EventSnapshot]) -> BroadcastReport {
        let wire: Vec<WireSnapshot> = snapshots.iter().map(EventSnapshot::to_wire).collect();
        let message = match serde_json::to_string(&wire) {
            Ok(json) => json,
            Err(e) => {
                error!(error = %e, "failed to serialize snapshot batch");
                return BroadcastReport::default();
            }
        };
        self.broadcast_message(Arc::from(message)).await
    }

    pub async fn broadcast_message(&self, message: Arc<str>) -> BroadcastReport {
        let mut registry = self.registry.lock().await;
        if registry.closed {
            return BroadcastReport::default();
        }
        registry.latest = Some(message.clone());

        let mut report = BroadcastReport::default();
        for (id, tx) in registry.subscribers.iter() {
            match deliver(*id, tx, message.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    debug!(error = %e, "pruning subscriber");
                    report.pruned.push(*id);
                }
            }
        }
        for id in &report.pruned {
            registry.subscribers.remove(id);
        }

        if !report.pruned.is_empty() {
            info!(
                delivered = report.delivered,
                pruned = report.pruned.len(),
                "broadcast pruned failed subscribers"
            );
        }
        report
    }

    /// Drops every subscriber and refuses new ones. Receivers drain what
    /// is already queued and then see the channel close.
    pub async fn close_all(&self) {
        let mut registry = self.registry.lock().await;
        registry.closed = true;
        let count = registry.subscribers.len();
        registry.subscribers.clear();
        info!(closed = count, "all subscribers closed");
    }
}

fn deliver(
    id: SubscriberId,
    tx: &mpsc::Sender<Arc<str>>,
    message: Arc<str>,
) -> Result<(), ArbError> {
    match tx.try_send(message) {
        Ok(()) => Ok(()),
        Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
            Err(ArbError::DeliveryFailure(id))
        }
    }
}
