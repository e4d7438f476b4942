//! HTTP server for live event delivery
//!
//! ## Endpoints
//!
//! - `GET /sse` - Server-Sent Events stream of persisted events

#[cfg(feature = "api")]
pub mod sse;

use std::net::SocketAddr;

use serde::Deserialize;
#[cfg(feature = "api")]
use std::sync::Arc;
#[cfg(feature = "api")]
use tokio::{sync::watch, task::JoinHandle};
#[cfg(feature = "api")]
use tracing::{error, info};

#[cfg(feature = "api")]
use crate::eventcenter::Broker;

/// HTTP server configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ApiConfig {
    /// Bind address (e.g., "0.0.0.0:8081")
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// Enable CORS for browser clients
    #[serde(default = "default_enable_cors")]
    pub enable_cors: bool,
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8081))
}

fn default_enable_cors() -> bool {
    true
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            enable_cors: default_enable_cors(),
        }
    }
}

/// Handle to a running SSE server
#[cfg(feature = "api")]
#[derive(Debug)]
pub struct SseServer {
    addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

#[cfg(feature = "api")]
impl SseServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Close every open event stream and wait for the server task to end
    pub async fn shutdown(self) {
        info!("stopping SSE server on {}", self.addr);
        self.shutdown.send_replace(true);
        if let Err(e) = self.task.await {
            error!("SSE server task failed: {e}");
        }
    }
}

/// Spawn the SSE server
///
/// This starts an Axum HTTP server in a background task. The returned
/// handle stops it; open streams are closed before the task ends.
#[cfg(feature = "api")]
pub async fn spawn_sse_server(config: ApiConfig, broker: Arc<Broker>) -> anyhow::Result<SseServer> {
    use axum::{Router, routing::get};
    use tower_http::cors::{Any, CorsLayer};
    use tower_http::trace::TraceLayer;

    info!("starting SSE server on {}", config.bind_addr);

    let (shutdown, stopped) = watch::channel(false);
    let state = sse::SseState {
        broker,
        shutdown: stopped.clone(),
    };

    let mut app = Router::new()
        .route("/sse", get(sse::sse_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if config.enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let addr = listener.local_addr()?;

    info!("SSE server listening on {}", addr);

    let mut signal = stopped;
    let task = tokio::spawn(async move {
        let served = axum::serve(listener, app).with_graceful_shutdown(async move {
            let _ = signal.wait_for(|stopped| *stopped).await;
        });
        if let Err(e) = served.await {
            error!("SSE server error: {}", e);
        }
    });

    Ok(SseServer {
        addr,
        shutdown,
        task,
    })
}
