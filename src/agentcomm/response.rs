//! Responses of Kea daemons and per-command outcomes

use std::fmt;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::error::CommandError;

/// Kea control channel result code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    Success,
    Error,
    Unsupported,
    /// The command succeeded but there was nothing to return
    Empty,
    Other(i64),
}

impl From<i64> for ResultCode {
    fn from(code: i64) -> Self {
        match code {
            0 => ResultCode::Success,
            1 => ResultCode::Error,
            2 => ResultCode::Unsupported,
            3 => ResultCode::Empty,
            other => ResultCode::Other(other),
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultCode::Success => write!(f, "success"),
            ResultCode::Error => write!(f, "error"),
            ResultCode::Unsupported => write!(f, "unsupported"),
            ResultCode::Empty => write!(f, "empty"),
            ResultCode::Other(code) => write!(f, "result {code}"),
        }
    }
}

/// Response of one daemon to one command
///
/// `A` is the shape of the command specific `arguments` object.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Response<A> {
    pub result: i64,
    pub text: Option<String>,
    pub arguments: Option<A>,

    /// Daemon that produced this response, filled in from the command's
    /// daemon list
    #[serde(skip)]
    pub daemon: String,
}

impl<A> Response<A> {
    pub fn code(&self) -> ResultCode {
        ResultCode::from(self.result)
    }

    /// Error carried by this response, if any. An empty result is not an error.
    pub fn error(&self, command: &str) -> Option<CommandError> {
        match self.code() {
            ResultCode::Success | ResultCode::Empty => None,
            code => Some(CommandError {
                command: command.to_string(),
                daemon: self.daemon.clone(),
                code,
                text: self.text.clone().unwrap_or_default(),
            }),
        }
    }
}

/// Decode the raw answer to one command into its per-daemon entries.
///
/// Kea answers with an array holding one entry per daemon; a bare object
/// is accepted as a single entry. Entries are tagged with the daemon names
/// in the order the command listed them.
pub(crate) fn decode_entries<T: DeserializeOwned>(
    raw: Value,
    daemons: &[String],
) -> Result<Vec<Response<T>>, serde_json::Error> {
    let mut entries: Vec<Response<T>> = match raw {
        Value::Array(_) => serde_json::from_value(raw)?,
        other => vec![serde_json::from_value(other)?],
    };
    for (entry, daemon) in entries.iter_mut().zip(daemons) {
        entry.daemon = daemon.clone();
    }
    Ok(entries)
}

/// A failed command within a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFailure {
    /// Position of the command in the batch
    pub index: usize,
    pub error: CommandError,
}

/// Summary of the per-command outcomes of a forwarded batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandsResult {
    pub failures: Vec<CommandFailure>,
}

impl CommandsResult {
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }

    /// The first failed command, if any
    pub fn first_error(&self) -> Option<&CommandError> {
        self.failures.first().map(|f| &f.error)
    }
}
