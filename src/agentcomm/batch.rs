//! Batching of commands into one forwarded call
//!
//! ```text
//! CommandBatch::push ─► Slot<T> ─┐
//!                                │   forward_batch (one transport call)
//! CommandBatch ──────────────────┼──────────────────────────────────► BatchResponses
//!                                │                                        │
//!                                └──────────── BatchResponses::take(slot) ┘
//! ```
//!
//! Correlation is positional: the slot returned by the i-th `push` reads
//! the i-th raw response.

use std::marker::PhantomData;

use serde::de::{DeserializeOwned, IgnoredAny};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use super::command::Command;
use super::error::ForwardError;
use super::response::{CommandFailure, CommandsResult, Response, decode_entries};
use super::transport::{ForwardTarget, Transport};

/// Typed handle to the response of one command in a batch
#[derive(Debug)]
pub struct Slot<T> {
    index: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Slot<T> {
    pub fn index(&self) -> usize {
        self.index
    }
}

/// Ordered commands destined for the daemons behind one agent
#[derive(Debug, Default)]
pub struct CommandBatch {
    commands: Vec<Command>,
}

impl CommandBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a command, getting back the slot its response decodes into
    pub fn push<T: DeserializeOwned>(&mut self, command: Command) -> Slot<T> {
        self.commands.push(command);
        Slot {
            index: self.commands.len() - 1,
            _marker: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }
}

/// Raw responses of a forwarded batch, one per command
#[derive(Debug)]
pub struct BatchResponses {
    commands: Vec<Command>,
    raw: Vec<Option<Value>>,
    result: CommandsResult,
}

impl BatchResponses {
    fn new(commands: Vec<Command>, raw: Vec<Value>) -> Self {
        let result = summarize(&commands, &raw);
        Self {
            commands,
            raw: raw.into_iter().map(Some).collect(),
            result,
        }
    }

    /// Per-command outcome summary
    pub fn commands_result(&self) -> &CommandsResult {
        &self.result
    }

    /// Decode the response of the command behind `slot`
    pub fn take<T: DeserializeOwned>(
        &mut self,
        slot: Slot<T>,
    ) -> Result<Vec<Response<T>>, ForwardError> {
        let command = self
            .commands
            .get(slot.index)
            .ok_or_else(|| ForwardError::Decode {
                command: format!("#{}", slot.index),
                reason: "slot does not belong to this batch".to_string(),
            })?;

        let raw = self
            .raw
            .get_mut(slot.index)
            .and_then(Option::take)
            .ok_or_else(|| ForwardError::Decode {
                command: command.command.clone(),
                reason: "response already taken".to_string(),
            })?;

        decode_entries(raw, command.daemons.names()).map_err(|e| ForwardError::Decode {
            command: command.command.clone(),
            reason: e.to_string(),
        })
    }
}

fn summarize(commands: &[Command], raw: &[Value]) -> CommandsResult {
    let mut result = CommandsResult::default();
    for (index, (command, value)) in commands.iter().zip(raw).enumerate() {
        // Undecodable responses are reported when the slot is taken
        let Ok(entries) = decode_entries::<IgnoredAny>(value.clone(), command.daemons.names())
        else {
            continue;
        };
        for entry in entries {
            if let Some(error) = entry.error(&command.command) {
                result.failures.push(CommandFailure { index, error });
            }
        }
    }
    result
}

/// Forward all commands of `batch` to `target` in one transport call
///
/// Fails as a whole on transport errors, on an empty batch and when the
/// number of responses differs from the number of commands. Errors inside
/// individual responses are left to the caller.
#[instrument(skip_all, fields(agent = %target.agent(), commands = batch.len()))]
pub async fn forward_batch(
    transport: &dyn Transport,
    target: &ForwardTarget,
    batch: CommandBatch,
) -> Result<BatchResponses, ForwardError> {
    if batch.is_empty() {
        return Err(ForwardError::EmptyBatch);
    }

    let raw = transport
        .forward(target, batch.commands())
        .await
        .map_err(|source| ForwardError::Transport {
            agent: target.agent(),
            source,
        })?;

    if raw.len() != batch.len() {
        return Err(ForwardError::ResponseCountMismatch {
            sent: batch.len(),
            received: raw.len(),
        });
    }

    let responses = BatchResponses::new(batch.commands, raw);
    if responses.commands_result().is_ok() {
        debug!("all commands succeeded");
    } else {
        warn!(
            "{} command(s) failed in batch",
            responses.commands_result().failures.len()
        );
    }
    Ok(responses)
}
