use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, trace};

use crate::api::ApiConfig;
use crate::apps::kea::hosts_puller::DEFAULT_PAGE_LIMIT;
use crate::model::{App, AppType, Daemon, Machine};
use crate::storage::{Storage, StorageResult};

/// Storage backend configuration
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (no persistence)
    #[serde(rename = "none")]
    None,

    /// SQLite database
    Sqlite {
        /// Path to the SQLite database file
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./fleet.db")
}

/// Settings of the transport towards the agents
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct AgentsConfig {
    /// Timeout of one forwarded call, in seconds
    #[serde(default = "default_agent_timeout")]
    pub timeout_secs: u64,
}

impl AgentsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_agent_timeout(),
        }
    }
}

fn default_agent_timeout() -> u64 {
    30
}

/// Puller overrides; intervals not given here come from the stored settings
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct PullersConfig {
    pub stats_interval_secs: Option<u64>,
    pub hosts_interval_secs: Option<u64>,
    #[serde(default = "default_hosts_page_limit")]
    pub hosts_page_limit: usize,
}

impl PullersConfig {
    pub fn stats_interval(&self) -> Option<Duration> {
        self.stats_interval_secs.map(Duration::from_secs)
    }

    pub fn hosts_interval(&self) -> Option<Duration> {
        self.hosts_interval_secs.map(Duration::from_secs)
    }
}

impl Default for PullersConfig {
    fn default() -> Self {
        Self {
            stats_interval_secs: None,
            hosts_interval_secs: None,
            hosts_page_limit: default_hosts_page_limit(),
        }
    }
}

fn default_hosts_page_limit() -> usize {
    DEFAULT_PAGE_LIMIT
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct Config {
    /// Storage configuration (optional - defaults to SQLite)
    pub storage: Option<StorageConfig>,

    #[serde(default)]
    pub agents: AgentsConfig,

    #[serde(default)]
    pub pullers: PullersConfig,

    /// SSE server; absent means the default bind address
    #[serde(default)]
    pub api: ApiConfig,

    /// `trace`, `debug`, `info`, `warn` or `error`
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Machines registered at startup when storage holds no apps yet
    #[serde(default)]
    pub fleet: Vec<MachineConfig>,
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct MachineConfig {
    pub address: String,
    #[serde(default = "crate::util::get_default_agent_port")]
    pub agent_port: u16,
    pub hostname: Option<String>,
    #[serde(default)]
    pub apps: Vec<AppConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct AppConfig {
    #[serde(rename = "type")]
    pub app_type: AppType,
    #[serde(default = "default_ctrl_address")]
    pub ctrl_address: String,
    #[serde(default = "crate::util::get_default_ctrl_port")]
    pub ctrl_port: u16,
    pub version: Option<String>,
    #[serde(default)]
    pub daemons: Vec<DaemonConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct DaemonConfig {
    pub name: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_ctrl_address() -> String {
    "127.0.0.1".to_string()
}

fn default_active() -> bool {
    true
}

impl MachineConfig {
    fn to_machine(&self) -> Machine {
        Machine {
            id: 0,
            address: self.address.clone(),
            agent_port: self.agent_port,
            hostname: self.hostname.clone(),
        }
    }
}

impl AppConfig {
    fn to_app(&self, machine: Machine) -> App {
        App {
            id: 0,
            machine,
            app_type: self.app_type,
            ctrl_address: self.ctrl_address.clone(),
            ctrl_port: self.ctrl_port,
            version: self.version.clone(),
            daemons: self
                .daemons
                .iter()
                .map(|d| Daemon {
                    id: 0,
                    app_id: 0,
                    name: d.name.clone(),
                    active: d.active,
                })
                .collect(),
        }
    }
}

/// Register the configured machines and their apps; returns the number of
/// apps added.
///
/// Machines already registered with the same address and agent port are
/// left untouched, so seeding again on restart adds nothing.
pub async fn seed_fleet(storage: &dyn Storage, fleet: &[MachineConfig]) -> StorageResult<usize> {
    let mut known: HashSet<(String, u16)> = storage
        .list_machines()
        .await?
        .into_iter()
        .map(|m| (m.address, m.agent_port))
        .collect();

    let mut added = 0;
    for machine_config in fleet {
        if !known.insert((machine_config.address.clone(), machine_config.agent_port)) {
            debug!(
                "machine {}:{} already registered",
                machine_config.address, machine_config.agent_port
            );
            continue;
        }
        let machine = storage.add_machine(machine_config.to_machine()).await?;
        for app_config in &machine_config.apps {
            let app = storage.add_app(app_config.to_app(machine.clone())).await?;
            debug!(
                "registered {} app {} on {}",
                app.app_type, app.id, machine.address
            );
            added += 1;
        }
    }
    Ok(added)
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
