//! Event center - single writer persisting events and handing them to the broker
//!
//! ## Message Flow
//!
//! ```text
//! add_event (any task) → unbounded queue → writer: persist → Broker::dispatch_event
//!                                              ↑
//!                                              └─── shutdown (oneshot)
//! ```
//!
//! Submitting never waits. The writer handles events strictly in queue
//! order; an event whose persistence fails is logged and not dispatched.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, trace, warn};

use super::broker::Broker;
use super::tags::{Related, create_event};
use crate::model::{EventLevel, NewEvent};
use crate::storage::Storage;

/// Submission side of the event center
///
/// Collectors depend on this trait rather than on the running service so
/// they can be driven with a recording fake.
pub trait EventCenter: Send + Sync {
    /// Queue an event for persistence and dispatch
    fn add_event(&self, event: NewEvent);

    fn add_info_event(&self, text: &str, objects: &[Related<'_>]) {
        self.add_event(create_event(EventLevel::Info, text, objects));
    }

    fn add_warning_event(&self, text: &str, objects: &[Related<'_>]) {
        self.add_event(create_event(EventLevel::Warning, text, objects));
    }

    fn add_error_event(&self, text: &str, objects: &[Related<'_>]) {
        self.add_event(create_event(EventLevel::Error, text, objects));
    }
}

/// Cheap cloneable handle for submitting events
#[derive(Clone)]
pub struct EventCenterHandle {
    events_tx: mpsc::UnboundedSender<NewEvent>,
}

impl EventCenter for EventCenterHandle {
    fn add_event(&self, event: NewEvent) {
        debug!("event '{}'", event.text);
        if self.events_tx.send(event).is_err() {
            warn!("event center is stopped, dropping event");
        }
    }
}

struct EventWriter {
    storage: Arc<dyn Storage>,
    broker: Arc<Broker>,
    events_rx: mpsc::UnboundedReceiver<NewEvent>,
    shutdown_rx: oneshot::Receiver<()>,
}

impl EventWriter {
    #[instrument(name = "event_center", skip(self))]
    async fn run(mut self) {
        debug!("starting event center");

        loop {
            tokio::select! {
                biased;

                _ = &mut self.shutdown_rx => {
                    debug!("received shutdown signal");
                    self.drain().await;
                    break;
                }

                event = self.events_rx.recv() => {
                    match event {
                        Some(event) => self.persist_and_dispatch(event).await,
                        None => {
                            debug!("all event handles dropped");
                            break;
                        }
                    }
                }
            }
        }

        debug!("event center stopped");
    }

    /// Handle events queued before shutdown; later submissions are refused
    async fn drain(&mut self) {
        self.events_rx.close();
        let mut drained = 0usize;
        while let Some(event) = self.events_rx.recv().await {
            self.persist_and_dispatch(event).await;
            drained += 1;
        }
        if drained > 0 {
            debug!("drained {drained} queued event(s)");
        }
    }

    async fn persist_and_dispatch(&self, event: NewEvent) {
        match self.storage.add_event(event).await {
            Ok(persisted) => {
                trace!("persisted event {}", persisted.id);
                self.broker.dispatch_event(persisted);
            }
            Err(e) => {
                error!("problem with adding event to storage: {}", e);
            }
        }
    }
}

/// The running event center: writer task plus broker
pub struct EventCenterService {
    handle: EventCenterHandle,
    broker: Arc<Broker>,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl EventCenterService {
    /// Start the writer task with a fresh broker
    pub fn spawn(storage: Arc<dyn Storage>) -> Self {
        Self::with_broker(storage, Arc::new(Broker::new()))
    }

    pub fn with_broker(storage: Arc<dyn Storage>, broker: Arc<Broker>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let writer = EventWriter {
            storage,
            broker: Arc::clone(&broker),
            events_rx,
            shutdown_rx,
        };
        let task = tokio::spawn(writer.run());
        debug!("started event center");

        Self {
            handle: EventCenterHandle { events_tx },
            broker,
            shutdown_tx,
            task,
        }
    }

    pub fn handle(&self) -> EventCenterHandle {
        self.handle.clone()
    }

    pub fn broker(&self) -> Arc<Broker> {
        Arc::clone(&self.broker)
    }

    /// Stop the writer after it has handled every event queued so far
    pub async fn shutdown(self) {
        debug!("stopping event center");
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.task.await {
            error!("event center task failed: {e}");
        }
        debug!("stopped event center");
    }
}

impl EventCenter for EventCenterService {
    fn add_event(&self, event: NewEvent) {
        self.handle.add_event(event);
    }
}
