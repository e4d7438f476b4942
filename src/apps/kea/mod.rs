//! Periodic collection from Kea DHCP apps
//!
//! Two pullers share the same cycle ([`Collector`]):
//!
//! - [`StatsPuller`]: per-subnet lease statistics
//! - [`HostsPuller`]: host reservations
//!
//! Each remembers whether every app was reachable on its last attempt and
//! reports transitions through the event center.

pub mod collector;
pub mod hosts_puller;
pub mod resultset;
pub mod stats_puller;

use std::time::Duration;

use crate::storage::StorageResult;
use crate::storage::settings::get_setting_int;
use crate::storage::Storage;

pub use collector::{CollectError, CollectionOutcome, Collector, TargetCollector, TargetStatus};
pub use hosts_puller::{HostReservationsCollector, HostsPuller};
pub use resultset::{ResultSet, ResultSetError};
pub use stats_puller::{LeaseStatsCollector, StatsPuller};

/// Interval in seconds stored under the setting `name`
async fn puller_interval(storage: &dyn Storage, name: &str) -> StorageResult<Duration> {
    let secs = get_setting_int(storage, name).await?;
    Ok(Duration::from_secs(secs.max(0) as u64))
}
