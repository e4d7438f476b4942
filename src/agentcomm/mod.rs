//! Command forwarding to Kea daemons through the monitoring agents
//!
//! The hub never talks to Kea directly. Commands for the daemons of one app
//! are collected into a [`CommandBatch`], sent to the agent running on the
//! app's machine in a single [`Transport`] call, and the per-command answers
//! are decoded back through the typed [`Slot`]s handed out by the batch.
//!
//! ## Failure levels
//!
//! - **Batch**: transport errors, an empty batch, or a response count that
//!   differs from the command count fail the whole batch ([`ForwardError`])
//! - **Command**: a non-zero `result` from one daemon is reported through
//!   [`CommandsResult`] and [`Response::error`], the rest of the batch is usable

pub mod batch;
pub mod command;
pub mod error;
pub mod response;
pub mod transport;

pub use batch::{BatchResponses, CommandBatch, Slot, forward_batch};
pub use command::{Command, DaemonSet};
pub use error::{CommandError, ForwardError, TransportError};
pub use response::{CommandFailure, CommandsResult, Response, ResultCode};
pub use transport::{ForwardTarget, HttpTransport, Transport};
