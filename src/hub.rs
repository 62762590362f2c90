//! Broadcast hub - fan-out of queue events to live observers
//!
//! Each observer owns a bounded channel. Publishing never blocks: an observer
//! whose channel is closed or full is dropped from the registry, and the
//! failure stays with that observer. A dropped observer sees its stream end
//! and can subscribe again to receive a fresh snapshot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::{self, error::TrySendError};

use crate::domain::QueueEvent;
use crate::id::subscriber_label;

/// Why an event could not be handed to an observer
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("observer disconnected")]
    Closed,

    #[error("observer lagged behind by {buffer} events")]
    Lagged { buffer: usize },
}

/// Receiving side of one observer
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<QueueEvent>,
}

impl Subscription {
    /// Handle used to unsubscribe
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next event; `None` once the hub dropped this observer
    pub async fn recv(&mut self) -> Option<QueueEvent> {
        self.rx.recv().await
    }

    /// Next already-buffered event, without waiting
    pub fn try_recv(&mut self) -> Option<QueueEvent> {
        self.rx.try_recv().ok()
    }

    /// Drain everything currently buffered
    pub fn drain(&mut self) -> Vec<QueueEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Registry of observers and the publish side of their channels
#[derive(Debug)]
pub struct BroadcastHub {
    subscribers: Mutex<HashMap<u64, mpsc::Sender<QueueEvent>>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl BroadcastHub {
    /// Create a hub whose observers buffer up to `buffer` events
    pub fn new(buffer: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(2),
        }
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<u64, mpsc::Sender<QueueEvent>>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an observer whose stream starts with `initial`
    ///
    /// The initial events are queued before the observer becomes visible to
    /// `publish`, so nothing published afterwards can overtake them.
    pub fn subscribe(&self, initial: Vec<QueueEvent>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.buffer.max(initial.len() + 1));

        for event in initial {
            // Capacity covers the initial events, so this cannot fail
            let _ = tx.try_send(event);
        }

        self.registry().insert(id, tx);
        tracing::debug!(subscriber = %subscriber_label(id), "Observer subscribed");

        Subscription { id, rx }
    }

    /// Remove an observer; returns false if it was already gone
    pub fn unsubscribe(&self, id: u64) -> bool {
        let removed = self.registry().remove(&id).is_some();
        if removed {
            tracing::debug!(subscriber = %subscriber_label(id), "Observer unsubscribed");
        }
        removed
    }

    /// Deliver `event` to every registered observer; returns how many got it
    pub fn publish(&self, event: &QueueEvent) -> usize {
        let mut subscribers = self.registry();
        let mut delivered = 0;
        let mut dropped = Vec::new();

        for (id, tx) in subscribers.iter() {
            match tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Closed(_)) => dropped.push((*id, DeliveryError::Closed)),
                Err(TrySendError::Full(_)) => dropped.push((*id, DeliveryError::Lagged { buffer: self.buffer })),
            }
        }

        for (id, err) in dropped {
            subscribers.remove(&id);
            match err {
                DeliveryError::Closed => {
                    tracing::debug!(subscriber = %subscriber_label(id), "Observer gone, removing")
                }
                DeliveryError::Lagged { .. } => tracing::warn!(
                    subscriber = %subscriber_label(id),
                    event = event.name(),
                    error = %err,
                    "Dropping slow observer"
                ),
            }
        }

        delivered
    }

    /// Number of registered observers
    pub fn subscriber_count(&self) -> usize {
        self.registry().len()
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(256)
    }
}
