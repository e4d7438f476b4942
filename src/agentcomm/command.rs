//! Commands sent to Kea daemons through the agent

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Daemons a command is addressed to, in the order they were added
///
/// Serialized as the `service` list of a Kea control channel command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DaemonSet(Vec<String>);

impl DaemonSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a daemon; adding the same name twice is a no-op
    pub fn insert(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.0.contains(&name) {
            self.0.push(name);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|d| d == name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn names(&self) -> &[String] {
        &self.0
    }
}

impl<S: Into<String>> FromIterator<S> for DaemonSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = DaemonSet::new();
        for name in iter {
            set.insert(name);
        }
        set
    }
}

/// A single Kea control channel command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub command: String,

    #[serde(rename = "service", default, skip_serializing_if = "DaemonSet::is_empty")]
    pub daemons: DaemonSet,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

impl Command {
    pub fn new(command: impl Into<String>, daemons: DaemonSet, arguments: Option<Value>) -> Self {
        Self {
            command: command.into(),
            daemons,
            arguments,
        }
    }
}
