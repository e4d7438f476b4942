//! Domain records shared by the collectors, the event center and storage.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::util::host_with_port_url;

/// A machine running a monitoring agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Machine {
    /// Assigned by storage; ignored when a machine is added
    pub id: i64,
    pub address: String,
    pub agent_port: u16,
    pub hostname: Option<String>,
}

/// Kind of monitored application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppType {
    Kea,
    Bind9,
}

impl fmt::Display for AppType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppType::Kea => write!(f, "kea"),
            AppType::Bind9 => write!(f, "bind9"),
        }
    }
}

impl FromStr for AppType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "kea" => Ok(AppType::Kea),
            "bind9" => Ok(AppType::Bind9),
            other => Err(format!("unknown app type: {other}")),
        }
    }
}

/// A daemon belonging to an app, e.g. `dhcp4` of a Kea installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Daemon {
    pub id: i64,
    pub app_id: i64,
    pub name: String,
    pub active: bool,
}

/// A monitored application on a machine. This is the unit the collectors
/// iterate over: one app is one remote target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct App {
    pub id: i64,
    pub machine: Machine,
    pub app_type: AppType,
    /// Address of the app's control channel, as seen from the agent
    pub ctrl_address: String,
    pub ctrl_port: u16,
    pub version: Option<String>,
    pub daemons: Vec<Daemon>,
}

impl App {
    /// Control channel URL the agent forwards commands to
    pub fn ctrl_url(&self) -> String {
        host_with_port_url(&self.ctrl_address, self.ctrl_port)
    }

    /// Active daemons whose name is one of `names`, in declaration order
    pub fn active_daemons<'a>(&'a self, names: &'a [&'a str]) -> impl Iterator<Item = &'a Daemon> {
        self.daemons
            .iter()
            .filter(move |d| d.active && names.contains(&d.name.as_str()))
    }

    /// Find an active daemon by name
    pub fn active_daemon(&self, name: &str) -> Option<&Daemon> {
        self.daemons.iter().find(|d| d.active && d.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    pub id: i64,
    pub prefix: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Info,
    Warning,
    Error,
}

impl EventLevel {
    /// Numeric level as stored in the database
    pub fn as_i64(self) -> i64 {
        match self {
            EventLevel::Info => 0,
            EventLevel::Warning => 1,
            EventLevel::Error => 2,
        }
    }

    pub fn from_i64(level: i64) -> Option<Self> {
        match level {
            0 => Some(EventLevel::Info),
            1 => Some(EventLevel::Warning),
            2 => Some(EventLevel::Error),
            _ => None,
        }
    }
}

impl fmt::Display for EventLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventLevel::Info => write!(f, "info"),
            EventLevel::Warning => write!(f, "warning"),
            EventLevel::Error => write!(f, "error"),
        }
    }
}

/// Entities an event refers to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relations {
    pub machine: Option<i64>,
    pub app: Option<i64>,
    pub daemon: Option<i64>,
    pub subnet: Option<i64>,
}

/// An event that has been created but not yet persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    pub level: EventLevel,
    pub text: String,
    pub relations: Relations,
}

impl NewEvent {
    /// Attach the identity assigned by storage
    pub fn persisted(self, id: i64, created_at: DateTime<Utc>) -> Event {
        Event {
            id,
            created_at,
            level: self.level,
            text: self.text,
            relations: self.relations,
        }
    }
}

/// A persisted event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub level: EventLevel,
    pub text: String,
    pub relations: Relations,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpFamily {
    V4,
    V6,
}

impl fmt::Display for IpFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpFamily::V4 => write!(f, "v4"),
            IpFamily::V6 => write!(f, "v6"),
        }
    }
}

/// Lease counters of one subnet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "lowercase")]
pub enum LeaseCounters {
    V4 {
        total_addresses: i64,
        assigned_addresses: i64,
        declined_addresses: i64,
    },
    V6 {
        total_nas: i64,
        assigned_nas: i64,
        declined_nas: i64,
        total_pds: i64,
        assigned_pds: i64,
    },
}

impl LeaseCounters {
    pub fn family(&self) -> IpFamily {
        match self {
            LeaseCounters::V4 { .. } => IpFamily::V4,
            LeaseCounters::V6 { .. } => IpFamily::V6,
        }
    }
}

/// Normalized lease statistics of one subnet served by an app
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseStatsRecord {
    /// Subnet identifier local to the DHCP server
    pub subnet_id: i64,
    pub counters: LeaseCounters,
    pub collected_at: DateTime<Utc>,
}

/// Normalized host reservation fetched from an app
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostReservation {
    /// 0 for global reservations
    pub subnet_id: i64,
    /// e.g. `hw-address`, `duid`, `client-id`
    pub identifier_type: String,
    pub identifier: String,
    pub ip_addresses: Vec<String>,
    pub prefixes: Vec<String>,
    pub hostname: Option<String>,
}

/// Typed value of a persisted setting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum SettingValue {
    Int(i64),
    Bool(bool),
    Str(String),
    Passwd(String),
}

impl SettingValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            SettingValue::Int(_) => "int",
            SettingValue::Bool(_) => "bool",
            SettingValue::Str(_) => "str",
            SettingValue::Passwd(_) => "passwd",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Setting {
    pub name: String,
    pub value: SettingValue,
}
