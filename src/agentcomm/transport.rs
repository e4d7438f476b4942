//! Transport carrying command batches to agents
//!
//! The agent relays each command to the Kea control agent at `ctrl_url`
//! and returns the raw answers in submission order.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{instrument, trace};

use super::command::Command;
use super::error::TransportError;
use crate::model::App;
use crate::util::host_with_port_url;

/// Where a batch goes: the agent on the machine and the control URL the
/// agent forwards to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardTarget {
    pub agent_address: String,
    pub agent_port: u16,
    pub ctrl_url: String,
}

impl ForwardTarget {
    pub fn from_app(app: &App) -> Self {
        Self {
            agent_address: app.machine.address.clone(),
            agent_port: app.machine.agent_port,
            ctrl_url: app.ctrl_url(),
        }
    }

    /// `address:port` of the agent, for logs and errors
    pub fn agent(&self) -> String {
        format!("{}:{}", self.agent_address, self.agent_port)
    }
}

/// Capability to forward commands through an agent
///
/// Implementations return exactly one raw response per command, in the
/// order the commands were given, or fail as a whole.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn forward(
        &self,
        target: &ForwardTarget,
        commands: &[Command],
    ) -> Result<Vec<Value>, TransportError>;
}

#[derive(Serialize)]
struct ForwardRequest<'a> {
    url: &'a str,
    commands: &'a [Command],
}

#[derive(Deserialize)]
struct ForwardResponse {
    responses: Vec<Value>,
}

/// Transport talking to the agent's `/forward` HTTP endpoint
///
/// The client is built once and reused for every call.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip_all, fields(agent = %target.agent()))]
    async fn forward(
        &self,
        target: &ForwardTarget,
        commands: &[Command],
    ) -> Result<Vec<Value>, TransportError> {
        let url = format!(
            "{}forward",
            host_with_port_url(&target.agent_address, target.agent_port)
        );
        trace!("forwarding {} command(s) via {url}", commands.len());

        let response = self
            .client
            .post(&url)
            .json(&ForwardRequest {
                url: &target.ctrl_url,
                commands,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(TransportError::Status(response.status()));
        }

        let body = response.bytes().await?;
        let envelope: ForwardResponse = serde_json::from_slice(&body)
            .map_err(|e| TransportError::Envelope(e.to_string()))?;

        trace!("received {} response(s)", envelope.responses.len());
        Ok(envelope.responses)
    }
}
