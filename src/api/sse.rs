//! Server-Sent Events stream of persisted events

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use chrono::{DateTime, Utc};
use futures::stream::{self, Stream};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::eventcenter::Broker;
use crate::model::{Event, EventLevel};

/// Payload of one `event` message on the stream
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMessage {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub level: EventLevel,
    pub text: String,
}

impl From<&Event> for EventMessage {
    fn from(event: &Event) -> Self {
        Self {
            id: event.id,
            created_at: event.created_at,
            level: event.level,
            text: event.text.clone(),
        }
    }
}

fn to_sse(event: &Event) -> SseEvent {
    SseEvent::default()
        .event("event")
        .json_data(EventMessage::from(event))
        .unwrap_or_else(|e| {
            warn!("failed to serialize event {}: {}", event.id, e);
            SseEvent::default().comment("unserializable event")
        })
}

/// Shared state of the SSE routes
#[derive(Clone)]
pub struct SseState {
    pub broker: Arc<Broker>,
    /// Flips to `true` when the server stops; open streams end then
    pub shutdown: watch::Receiver<bool>,
}

/// GET /sse
///
/// Registers a subscriber for the lifetime of the connection. The
/// subscriber is unregistered when the client goes away or the server
/// shuts down and the stream is dropped.
pub async fn sse_handler(
    State(state): State<SseState>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let subscriber = state.broker.register();
    debug!("SSE client connected as subscriber {}", subscriber.id());

    let events = stream::unfold(
        (subscriber, state.shutdown),
        |(mut subscriber, mut shutdown)| async move {
            let event = tokio::select! {
                event = subscriber.recv() => event?,
                _ = shutdown.changed() => {
                    debug!("closing SSE stream of subscriber {}", subscriber.id());
                    return None;
                }
            };
            Some((Ok(to_sse(&event)), (subscriber, shutdown)))
        },
    );

    Sse::new(events).keep_alive(KeepAlive::default())
}
