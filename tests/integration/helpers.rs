//! Helper functions and fakes for integration tests

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fleetwatch::{
    agentcomm::{Command, ForwardTarget, Transport, TransportError},
    eventcenter::EventCenter,
    model::{
        App, AppType, Daemon, Event, HostReservation, LeaseStatsRecord, Machine, NewEvent,
        Setting,
    },
    storage::{MemoryBackend, Storage, StorageError, StorageResult},
};
use parking_lot::Mutex;
use serde_json::{Value, json};

pub const V4_COLUMNS: [&str; 5] = [
    "subnet-id",
    "total-addresses",
    "cumulative-assigned-addresses",
    "assigned-addresses",
    "declined-addresses",
];

pub const V6_COLUMNS: [&str; 8] = [
    "subnet-id",
    "total-nas",
    "cumulative-assigned-nas",
    "assigned-nas",
    "declined-nas",
    "total-pds",
    "cumulative-assigned-pds",
    "assigned-pds",
];

type Responder = Box<dyn Fn(&[Command]) -> Result<Vec<Value>, TransportError> + Send + Sync>;

/// Transport answering from per-agent closures and recording every call
///
/// Agents without a responder are unreachable.
#[derive(Default)]
pub struct ScriptedTransport {
    responders: Mutex<HashMap<String, Responder>>,
    calls: Mutex<Vec<(ForwardTarget, Vec<Command>)>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on_agent(
        &self,
        address: &str,
        responder: impl Fn(&[Command]) -> Result<Vec<Value>, TransportError> + Send + Sync + 'static,
    ) {
        self.responders
            .lock()
            .insert(address.to_string(), Box::new(responder));
    }

    pub fn make_unreachable(&self, address: &str) {
        self.responders.lock().remove(address);
    }

    pub fn calls(&self) -> Vec<(ForwardTarget, Vec<Command>)> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, address: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|(target, _)| target.agent_address == address)
            .count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn forward(
        &self,
        target: &ForwardTarget,
        commands: &[Command],
    ) -> Result<Vec<Value>, TransportError> {
        self.calls
            .lock()
            .push((target.clone(), commands.to_vec()));

        let responders = self.responders.lock();
        match responders.get(&target.agent_address) {
            Some(responder) => responder(commands),
            None => Err(TransportError::Status(
                reqwest::StatusCode::SERVICE_UNAVAILABLE,
            )),
        }
    }
}

/// Answer statistics commands with the given v4 and v6 rows
pub fn stats_responder(
    v4_rows: Vec<Vec<Value>>,
    v6_rows: Vec<Vec<Value>>,
) -> impl Fn(&[Command]) -> Result<Vec<Value>, TransportError> + Send + Sync + 'static {
    move |commands| {
        Ok(commands
            .iter()
            .map(|cmd| match cmd.command.as_str() {
                "stat-lease4-get" => stat_response(&V4_COLUMNS, v4_rows.clone()),
                "stat-lease6-get" => stat_response(&V6_COLUMNS, v6_rows.clone()),
                other => json!([{"result": 2, "text": format!("'{other}' command not supported")}]),
            })
            .collect())
    }
}

pub fn stat_response(columns: &[&str], rows: Vec<Vec<Value>>) -> Value {
    json!([{
        "result": 0,
        "text": "stat-lease-get: 1 rows found",
        "arguments": {
            "result-set": {"columns": columns, "rows": rows},
            "timestamp": "2025-03-01 12:00:00.000000"
        }
    }])
}

pub fn row(values: &[i64]) -> Vec<Value> {
    values.iter().map(|v| json!(v)).collect()
}

/// Register a Kea app on a new machine; daemons are `(name, active)`
pub async fn add_kea_app(storage: &dyn Storage, address: &str, daemons: &[(&str, bool)]) -> App {
    let machine = storage
        .add_machine(Machine {
            id: 0,
            address: address.to_string(),
            agent_port: 8080,
            hostname: Some(format!("host-{address}")),
        })
        .await
        .unwrap();

    storage
        .add_app(App {
            id: 0,
            machine,
            app_type: AppType::Kea,
            ctrl_address: "127.0.0.1".to_string(),
            ctrl_port: 8000,
            version: Some("1.7.3".to_string()),
            daemons: daemons
                .iter()
                .map(|(name, active)| Daemon {
                    id: 0,
                    app_id: 0,
                    name: name.to_string(),
                    active: *active,
                })
                .collect(),
        })
        .await
        .unwrap()
}

/// Event center fake keeping submitted events in memory
#[derive(Default)]
pub struct RecordingEventCenter {
    events: Mutex<Vec<NewEvent>>,
}

impl RecordingEventCenter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<NewEvent> {
        self.events.lock().clone()
    }
}

impl EventCenter for RecordingEventCenter {
    fn add_event(&self, event: NewEvent) {
        self.events.lock().push(event);
    }
}

/// In-memory storage refusing to persist events whose text contains
/// `unpersistable`
#[derive(Default)]
pub struct FailingEventStorage {
    inner: MemoryBackend,
}

#[async_trait]
impl Storage for FailingEventStorage {
    async fn add_machine(&self, machine: Machine) -> StorageResult<Machine> {
        self.inner.add_machine(machine).await
    }

    async fn list_machines(&self) -> StorageResult<Vec<Machine>> {
        self.inner.list_machines().await
    }

    async fn add_app(&self, app: App) -> StorageResult<App> {
        self.inner.add_app(app).await
    }

    async fn list_apps_by_type(&self, app_type: AppType) -> StorageResult<Vec<App>> {
        self.inner.list_apps_by_type(app_type).await
    }

    async fn upsert_lease_stats(
        &self,
        app_id: i64,
        records: Vec<LeaseStatsRecord>,
    ) -> StorageResult<()> {
        self.inner.upsert_lease_stats(app_id, records).await
    }

    async fn get_lease_stats(&self, app_id: i64) -> StorageResult<Vec<LeaseStatsRecord>> {
        self.inner.get_lease_stats(app_id).await
    }

    async fn upsert_host_reservations(
        &self,
        app_id: i64,
        hosts: Vec<HostReservation>,
    ) -> StorageResult<()> {
        self.inner.upsert_host_reservations(app_id, hosts).await
    }

    async fn get_host_reservations(&self, app_id: i64) -> StorageResult<Vec<HostReservation>> {
        self.inner.get_host_reservations(app_id).await
    }

    async fn add_event(&self, event: NewEvent) -> StorageResult<Event> {
        if event.text.contains("unpersistable") {
            return Err(StorageError::QueryFailed("disk full".to_string()));
        }
        self.inner.add_event(event).await
    }

    async fn get_events(&self, offset: usize, limit: usize) -> StorageResult<(Vec<Event>, usize)> {
        self.inner.get_events(offset, limit).await
    }

    async fn get_setting(&self, name: &str) -> StorageResult<Option<Setting>> {
        self.inner.get_setting(name).await
    }

    async fn list_settings(&self) -> StorageResult<Vec<Setting>> {
        self.inner.list_settings().await
    }

    async fn set_setting(&self, setting: Setting) -> StorageResult<()> {
        self.inner.set_setting(setting).await
    }

    async fn close(&self) -> StorageResult<()> {
        self.inner.close().await
    }
}

/// Poll `condition` until it holds or `timeout` passes
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
