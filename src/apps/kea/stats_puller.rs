//! Lease statistics puller
//!
//! Every cycle asks each Kea app for `stat-lease4-get` (when its dhcp4
//! daemon is active) and `stat-lease6-get` (when dhcp6 is active) in a
//! single batch, and stores the per-subnet counters.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use super::collector::{CollectError, Collector, TargetCollector, TargetStatus};
use super::resultset::{ResultRow, ResultSet, SUBNET_ID_COLUMN};
use super::puller_interval;
use crate::agentcomm::{Command, CommandBatch, ForwardTarget, Response, Transport, forward_batch};
use crate::eventcenter::EventCenter;
use crate::model::{App, IpFamily, LeaseCounters, LeaseStatsRecord};
use crate::puller::Puller;
use crate::storage::settings::KEA_STATS_PULLER_INTERVAL;
use crate::storage::{Storage, StorageResult};

/// `arguments` of a `stat-lease4-get` / `stat-lease6-get` response
#[derive(Debug, Clone, Deserialize)]
pub struct StatLeaseGetArgs {
    #[serde(rename = "result-set")]
    pub result_set: ResultSet,
    pub timestamp: Option<String>,
}

/// Collects lease statistics of one app
pub struct LeaseStatsCollector {
    storage: Arc<dyn Storage>,
    transport: Arc<dyn Transport>,
}

impl LeaseStatsCollector {
    pub fn new(storage: Arc<dyn Storage>, transport: Arc<dyn Transport>) -> Self {
        Self { storage, transport }
    }
}

/// Columns a `stat-lease4-get` result set must declare
const V4_COLUMNS: [&str; 4] = [
    SUBNET_ID_COLUMN,
    "total-addresses",
    "assigned-addresses",
    "declined-addresses",
];

/// Columns a `stat-lease6-get` result set must declare
const V6_COLUMNS: [&str; 6] = [
    SUBNET_ID_COLUMN,
    "total-nas",
    "assigned-nas",
    "declined-nas",
    "total-pds",
    "assigned-pds",
];

fn required_columns(family: IpFamily) -> &'static [&'static str] {
    match family {
        IpFamily::V4 => &V4_COLUMNS,
        IpFamily::V6 => &V6_COLUMNS,
    }
}

/// Counters of a validated row; `None` if a required cell is absent
fn lease_counters(family: IpFamily, row: &ResultRow<'_>) -> Option<LeaseCounters> {
    let counters = match family {
        IpFamily::V4 => LeaseCounters::V4 {
            total_addresses: row.get("total-addresses")?,
            assigned_addresses: row.get("assigned-addresses")?,
            declined_addresses: row.get("declined-addresses")?,
        },
        IpFamily::V6 => LeaseCounters::V6 {
            total_nas: row.get("total-nas")?,
            assigned_nas: row.get("assigned-nas")?,
            declined_nas: row.get("declined-nas")?,
            total_pds: row.get("total-pds")?,
            assigned_pds: row.get("assigned-pds")?,
        },
    };
    Some(counters)
}

/// Turn the responses to one statistics command into records
///
/// Command errors are returned separately so the records of the other
/// daemons can still be stored.
fn records_from_responses(
    family: IpFamily,
    command: &str,
    responses: Vec<Response<StatLeaseGetArgs>>,
    collected_at: DateTime<Utc>,
    records: &mut Vec<LeaseStatsRecord>,
) -> Result<Option<CollectError>, CollectError> {
    let mut command_error = None;

    for response in responses {
        if let Some(e) = response.error(command) {
            warn!("{}", e);
            command_error = Some(CollectError::Command(e));
            continue;
        }
        let Some(args) = response.arguments else {
            continue;
        };

        let rows = args
            .result_set
            .rows_with_columns(required_columns(family))
            .map_err(|source| CollectError::ResultSet {
                daemon: response.daemon.clone(),
                source,
            })?;

        for row in rows {
            let (Some(subnet_id), Some(counters)) =
                (row.get(SUBNET_ID_COLUMN), lease_counters(family, &row))
            else {
                continue;
            };
            records.push(LeaseStatsRecord {
                subnet_id,
                counters,
                collected_at,
            });
        }
    }

    Ok(command_error)
}

#[async_trait]
impl TargetCollector for LeaseStatsCollector {
    fn subject(&self) -> &'static str {
        "lease statistics"
    }

    #[instrument(skip_all, fields(app_id = app.id))]
    async fn collect_target(&self, app: &App) -> Result<TargetStatus, CollectError> {
        let dhcp4 = app.active_daemon("dhcp4").is_some();
        let dhcp6 = app.active_daemon("dhcp6").is_some();
        if !dhcp4 && !dhcp6 {
            return Ok(TargetStatus::Skipped);
        }

        let mut batch = CommandBatch::new();
        let v4_slot = dhcp4.then(|| {
            batch.push::<StatLeaseGetArgs>(Command::new(
                "stat-lease4-get",
                ["dhcp4"].into_iter().collect(),
                None,
            ))
        });
        let v6_slot = dhcp6.then(|| {
            batch.push::<StatLeaseGetArgs>(Command::new(
                "stat-lease6-get",
                ["dhcp6"].into_iter().collect(),
                None,
            ))
        });

        let target = ForwardTarget::from_app(app);
        let mut responses = forward_batch(self.transport.as_ref(), &target, batch).await?;

        let now = Utc::now();
        let mut records = Vec::new();
        let mut command_error = None;

        if let Some(slot) = v4_slot {
            let v4 = responses.take(slot)?;
            if let Some(e) =
                records_from_responses(IpFamily::V4, "stat-lease4-get", v4, now, &mut records)?
            {
                command_error = Some(e);
            }
        }
        if let Some(slot) = v6_slot {
            let v6 = responses.take(slot)?;
            if let Some(e) =
                records_from_responses(IpFamily::V6, "stat-lease6-get", v6, now, &mut records)?
            {
                command_error = Some(e);
            }
        }

        debug!("storing {} lease stats record(s)", records.len());
        self.storage.upsert_lease_stats(app.id, records).await?;

        match command_error {
            Some(e) => Err(e),
            None => Ok(TargetStatus::Collected),
        }
    }
}

/// Puller gathering lease statistics from all Kea apps
pub struct StatsPuller {
    puller: Puller,
    collector: Arc<Collector<LeaseStatsCollector>>,
}

impl StatsPuller {
    /// Start the puller. The interval is read from the
    /// `kea_stats_puller_interval` setting unless `interval` overrides it.
    pub async fn new(
        storage: Arc<dyn Storage>,
        transport: Arc<dyn Transport>,
        events: Arc<dyn EventCenter>,
        interval: Option<Duration>,
    ) -> StorageResult<Self> {
        let interval = match interval {
            Some(interval) => interval,
            None => puller_interval(storage.as_ref(), KEA_STATS_PULLER_INTERVAL).await?,
        };

        let collector = Arc::new(Collector::new(
            LeaseStatsCollector::new(Arc::clone(&storage), transport),
            storage,
            events,
        ));
        let puller = Puller::new("kea-stats-puller", interval, collector.clone());

        Ok(Self { puller, collector })
    }

    pub fn collector(&self) -> &Arc<Collector<LeaseStatsCollector>> {
        &self.collector
    }

    pub async fn update_interval(&self, interval: Duration) {
        self.puller.update_interval(interval).await;
    }

    pub async fn shutdown(self) {
        self.puller.shutdown().await;
    }
}
