//! Errors of the command forwarding protocol

use thiserror::Error;

use super::response::ResultCode;

/// Failure of the transport carrying a batch to an agent
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("agent responded with status {0}")]
    Status(reqwest::StatusCode),

    #[error("malformed response envelope: {0}")]
    Envelope(String),
}

/// Failure of a whole forwarded batch
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("failed to forward commands to agent {agent}: {source}")]
    Transport {
        agent: String,
        #[source]
        source: TransportError,
    },

    #[error("agent returned {received} responses for {sent} commands")]
    ResponseCountMismatch { sent: usize, received: usize },

    #[error("refusing to forward an empty command batch")]
    EmptyBatch,

    #[error("failed to decode response to {command}: {reason}")]
    Decode { command: String, reason: String },
}

/// Application level error reported by one daemon for one command
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{command} failed on {daemon} ({code}): {text}")]
pub struct CommandError {
    pub command: String,
    pub daemon: String,
    pub code: ResultCode,
    pub text: String,
}
