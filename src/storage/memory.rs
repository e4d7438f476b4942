//! In-memory storage backend (no persistence)
//!
//! This backend keeps everything in maps behind a lock.
//! It's useful for:
//! - Testing without database dependencies
//! - Running the hub without a database file
//!
//! ## Limitations
//!
//! - **No persistence**: All data lost on restart
//! - **Unbounded**: Events are never pruned

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

use super::backend::Storage;
use super::error::{StorageError, StorageResult};
use crate::model::{
    App, AppType, Event, HostReservation, IpFamily, LeaseStatsRecord, Machine, NewEvent, Setting,
};

type HostKey = (i64, String, String);

#[derive(Default)]
struct Inner {
    machines: BTreeMap<i64, Machine>,
    apps: BTreeMap<i64, App>,
    lease_stats: BTreeMap<i64, BTreeMap<(IpFamily, i64), LeaseStatsRecord>>,
    hosts: BTreeMap<i64, BTreeMap<HostKey, HostReservation>>,
    events: Vec<Event>,
    settings: BTreeMap<String, Setting>,
    next_machine_id: i64,
    next_app_id: i64,
    next_daemon_id: i64,
}

impl Inner {
    fn next_id(counter: &mut i64) -> i64 {
        *counter += 1;
        *counter
    }
}

/// In-memory storage backend
#[derive(Default)]
pub struct MemoryBackend {
    inner: RwLock<Inner>,
}

impl MemoryBackend {
    /// Create a new in-memory backend
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryBackend {
    async fn add_machine(&self, mut machine: Machine) -> StorageResult<Machine> {
        let mut inner = self.inner.write().await;
        machine.id = Inner::next_id(&mut inner.next_machine_id);
        inner.machines.insert(machine.id, machine.clone());
        debug!("in-memory backend: added machine {}", machine.id);
        Ok(machine)
    }

    async fn list_machines(&self) -> StorageResult<Vec<Machine>> {
        Ok(self.inner.read().await.machines.values().cloned().collect())
    }

    async fn add_app(&self, mut app: App) -> StorageResult<App> {
        let mut inner = self.inner.write().await;
        let machine = inner
            .machines
            .get(&app.machine.id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("machine {}", app.machine.id)))?;

        app.id = Inner::next_id(&mut inner.next_app_id);
        app.machine = machine;
        for daemon in &mut app.daemons {
            daemon.id = Inner::next_id(&mut inner.next_daemon_id);
            daemon.app_id = app.id;
        }
        inner.apps.insert(app.id, app.clone());
        debug!("in-memory backend: added app {}", app.id);
        Ok(app)
    }

    async fn list_apps_by_type(&self, app_type: AppType) -> StorageResult<Vec<App>> {
        let inner = self.inner.read().await;
        Ok(inner
            .apps
            .values()
            .filter(|a| a.app_type == app_type)
            .cloned()
            .collect())
    }

    async fn upsert_lease_stats(
        &self,
        app_id: i64,
        records: Vec<LeaseStatsRecord>,
    ) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        let stats = inner.lease_stats.entry(app_id).or_default();
        for record in records {
            stats.insert((record.counters.family(), record.subnet_id), record);
        }
        Ok(())
    }

    async fn get_lease_stats(&self, app_id: i64) -> StorageResult<Vec<LeaseStatsRecord>> {
        let inner = self.inner.read().await;
        Ok(inner
            .lease_stats
            .get(&app_id)
            .map(|stats| stats.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn upsert_host_reservations(
        &self,
        app_id: i64,
        hosts: Vec<HostReservation>,
    ) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        let stored = inner.hosts.entry(app_id).or_default();
        for host in hosts {
            let key = (
                host.subnet_id,
                host.identifier_type.clone(),
                host.identifier.clone(),
            );
            stored.insert(key, host);
        }
        Ok(())
    }

    async fn get_host_reservations(&self, app_id: i64) -> StorageResult<Vec<HostReservation>> {
        let inner = self.inner.read().await;
        let mut hosts: Vec<HostReservation> = inner
            .hosts
            .get(&app_id)
            .map(|hosts| hosts.values().cloned().collect())
            .unwrap_or_default();
        hosts.sort_by(|a, b| (a.subnet_id, &a.identifier).cmp(&(b.subnet_id, &b.identifier)));
        Ok(hosts)
    }

    async fn add_event(&self, event: NewEvent) -> StorageResult<Event> {
        let mut inner = self.inner.write().await;
        let id = inner.events.len() as i64 + 1;
        let event = event.persisted(id, Utc::now());
        inner.events.push(event.clone());
        Ok(event)
    }

    async fn get_events(&self, offset: usize, limit: usize) -> StorageResult<(Vec<Event>, usize)> {
        let inner = self.inner.read().await;
        let page = inner
            .events
            .iter()
            .rev()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();
        Ok((page, inner.events.len()))
    }

    async fn get_setting(&self, name: &str) -> StorageResult<Option<Setting>> {
        Ok(self.inner.read().await.settings.get(name).cloned())
    }

    async fn list_settings(&self) -> StorageResult<Vec<Setting>> {
        Ok(self.inner.read().await.settings.values().cloned().collect())
    }

    async fn set_setting(&self, setting: Setting) -> StorageResult<()> {
        self.inner
            .write()
            .await
            .settings
            .insert(setting.name.clone(), setting);
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory backend (no-op)");
        Ok(())
    }
}
