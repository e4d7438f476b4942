//! Broker - fans persisted events out to live subscribers
//!
//! Every subscriber owns a bounded queue. Dispatch never waits on a
//! subscriber: when its queue is full the event is dropped for that
//! subscriber only, and a subscriber whose receiving side is gone is
//! removed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tracing::{debug, trace, warn};

use crate::model::Event;

/// Default number of undelivered events held per subscriber
pub const SUBSCRIBER_QUEUE_SIZE: usize = 64;

pub struct Broker {
    subscribers: RwLock<HashMap<u64, mpsc::Sender<Arc<Event>>>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl Broker {
    pub fn new() -> Self {
        Self::with_capacity(SUBSCRIBER_QUEUE_SIZE)
    }

    /// Broker whose subscribers buffer at most `capacity` events
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
        }
    }

    /// Add a subscriber. It receives events dispatched from now on.
    pub fn register(self: &Arc<Self>) -> Subscriber {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.capacity);
        self.subscribers.write().insert(id, sender);
        debug!("registered subscriber {id}");

        Subscriber {
            id,
            receiver,
            broker: Arc::downgrade(self),
        }
    }

    /// Remove a subscriber; returns whether it was registered
    pub fn unregister(&self, id: u64) -> bool {
        let removed = self.subscribers.write().remove(&id).is_some();
        if removed {
            debug!("unregistered subscriber {id}");
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Deliver an event to every registered subscriber without waiting
    pub fn dispatch_event(&self, event: Event) {
        let event = Arc::new(event);
        let mut closed = Vec::new();

        {
            let subscribers = self.subscribers.read();
            for (id, sender) in subscribers.iter() {
                match sender.try_send(Arc::clone(&event)) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        warn!("subscriber {id} is lagging, dropping event {}", event.id);
                    }
                    Err(TrySendError::Closed(_)) => closed.push(*id),
                }
            }
            trace!(
                "dispatched event {} to {} subscriber(s)",
                event.id,
                subscribers.len() - closed.len()
            );
        }

        if !closed.is_empty() {
            let mut subscribers = self.subscribers.write();
            for id in closed {
                subscribers.remove(&id);
                debug!("removed closed subscriber {id}");
            }
        }
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving end of a registration; unregisters itself when dropped
pub struct Subscriber {
    id: u64,
    receiver: mpsc::Receiver<Arc<Event>>,
    broker: Weak<Broker>,
}

impl Subscriber {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next event; `None` once the broker is gone and the queue is empty
    pub async fn recv(&mut self) -> Option<Arc<Event>> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Result<Arc<Event>, TryRecvError> {
        self.receiver.try_recv()
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        if let Some(broker) = self.broker.upgrade() {
            broker.unregister(self.id);
        }
    }
}
