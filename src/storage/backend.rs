//! Storage backend trait definition
//!
//! The collectors and the event center only talk to storage through the
//! `Storage` trait. Calls are independent of each other: no transaction
//! spans more than one call.

use async_trait::async_trait;

use super::error::StorageResult;
use crate::model::{
    App, AppType, Event, HostReservation, LeaseStatsRecord, Machine, NewEvent, Setting,
};

/// Trait for persistent storage backends
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync`: every puller and the event
/// center writer issue their own calls concurrently.
///
/// ## Error Handling
///
/// Methods return `StorageResult<T>` which wraps `StorageError`.
/// Implementations should convert backend-specific errors to
/// `StorageError` variants.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Register a machine. The `id` of the argument is ignored and the
    /// stored machine, with its assigned id, is returned.
    async fn add_machine(&self, machine: Machine) -> StorageResult<Machine>;

    /// All registered machines, ordered by id
    async fn list_machines(&self) -> StorageResult<Vec<Machine>>;

    /// Register an app on an already registered machine (`app.machine.id`).
    ///
    /// App and daemon ids are assigned by storage.
    async fn add_app(&self, app: App) -> StorageResult<App>;

    /// All apps of the given type, ordered by id
    async fn list_apps_by_type(&self, app_type: AppType) -> StorageResult<Vec<App>>;

    /// Insert or replace lease statistics keyed by (app, family, subnet)
    async fn upsert_lease_stats(
        &self,
        app_id: i64,
        records: Vec<LeaseStatsRecord>,
    ) -> StorageResult<()>;

    /// Lease statistics of an app, ordered by family and subnet id
    async fn get_lease_stats(&self, app_id: i64) -> StorageResult<Vec<LeaseStatsRecord>>;

    /// Insert or replace host reservations keyed by
    /// (app, subnet, identifier type, identifier)
    async fn upsert_host_reservations(
        &self,
        app_id: i64,
        hosts: Vec<HostReservation>,
    ) -> StorageResult<()>;

    /// Host reservations of an app, ordered by subnet id and identifier
    async fn get_host_reservations(&self, app_id: i64) -> StorageResult<Vec<HostReservation>>;

    /// Persist an event, assigning its id and creation timestamp
    async fn add_event(&self, event: NewEvent) -> StorageResult<Event>;

    /// Page of events, newest first, together with the total event count
    async fn get_events(&self, offset: usize, limit: usize) -> StorageResult<(Vec<Event>, usize)>;

    /// Get a setting by name
    async fn get_setting(&self, name: &str) -> StorageResult<Option<Setting>>;

    /// All settings, ordered by name
    async fn list_settings(&self) -> StorageResult<Vec<Setting>>;

    /// Insert or overwrite a setting
    async fn set_setting(&self, setting: Setting) -> StorageResult<()>;

    /// Close the backend and release resources
    async fn close(&self) -> StorageResult<()>;
}
