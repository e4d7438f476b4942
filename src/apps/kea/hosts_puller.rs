//! Host reservations puller
//!
//! Reservations are fetched page by page with `reservation-get-page`, one
//! batch per page, separately for every active DHCP daemon of an app.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{debug, instrument, trace, warn};

use super::collector::{CollectError, Collector, TargetCollector, TargetStatus};
use super::puller_interval;
use crate::agentcomm::{Command, CommandBatch, ForwardTarget, ResultCode, Transport, forward_batch};
use crate::eventcenter::EventCenter;
use crate::model::{App, HostReservation};
use crate::puller::Puller;
use crate::storage::settings::KEA_HOSTS_PULLER_INTERVAL;
use crate::storage::{Storage, StorageResult};

/// Hosts requested per page
pub const DEFAULT_PAGE_LIMIT: usize = 1000;

/// Upper bound on pages fetched from one daemon in one cycle
pub const MAX_PAGES: usize = 10_000;

/// Identifier types in the order they are looked up on a host
const IDENTIFIER_TYPES: [&str; 5] = ["hw-address", "duid", "circuit-id", "client-id", "flex-id"];

/// Position from which the next page is read
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct PageCursor {
    #[serde(default)]
    pub from: i64,
    #[serde(rename = "source-index", default)]
    pub source_index: i64,
}

/// `arguments` of a `reservation-get-page` response
#[derive(Debug, Clone, Deserialize)]
pub struct ReservationPage {
    #[serde(default)]
    pub count: usize,
    #[serde(default)]
    pub hosts: Vec<Value>,
    pub next: Option<PageCursor>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct KeaHost {
    #[serde(flatten)]
    identifiers: Map<String, Value>,
    ip_address: Option<String>,
    #[serde(default)]
    ip_addresses: Vec<String>,
    #[serde(default)]
    prefixes: Vec<String>,
    hostname: Option<String>,
    #[serde(default)]
    subnet_id: i64,
}

/// Normalize one host entry of a page; `None` when it is unusable
fn parse_host(value: Value) -> Option<HostReservation> {
    let host: KeaHost = match serde_json::from_value(value) {
        Ok(host) => host,
        Err(e) => {
            warn!("skipping malformed host reservation: {}", e);
            return None;
        }
    };

    let (identifier_type, identifier) = IDENTIFIER_TYPES.iter().find_map(|kind| {
        host.identifiers
            .get(*kind)
            .and_then(Value::as_str)
            .filter(|v| !v.is_empty())
            .map(|v| (kind.to_string(), v.to_string()))
    })?;

    let mut ip_addresses = host.ip_addresses;
    if let Some(address) = host.ip_address.filter(|a| !a.is_empty() && a != "0.0.0.0") {
        ip_addresses.insert(0, address);
    }

    Some(HostReservation {
        subnet_id: host.subnet_id,
        identifier_type,
        identifier,
        ip_addresses,
        prefixes: host.prefixes,
        hostname: host.hostname.filter(|h| !h.is_empty()),
    })
}

fn page_arguments(limit: usize, cursor: PageCursor) -> Value {
    let mut args = json!({ "limit": limit });
    if cursor.source_index != 0 {
        args["source-index"] = json!(cursor.source_index);
    }
    if cursor.from != 0 {
        args["from"] = json!(cursor.from);
    }
    args
}

/// Collects host reservations of one app
pub struct HostReservationsCollector {
    storage: Arc<dyn Storage>,
    transport: Arc<dyn Transport>,
    page_limit: usize,
}

impl HostReservationsCollector {
    pub fn new(storage: Arc<dyn Storage>, transport: Arc<dyn Transport>, page_limit: usize) -> Self {
        Self {
            storage,
            transport,
            page_limit: page_limit.max(1),
        }
    }

    /// All reservations of one daemon, following page cursors
    async fn fetch_daemon_hosts(
        &self,
        target: &ForwardTarget,
        daemon: &str,
        hosts: &mut Vec<HostReservation>,
    ) -> Result<(), CollectError> {
        let mut cursor = PageCursor::default();

        for page in 0..MAX_PAGES {
            let mut batch = CommandBatch::new();
            let slot = batch.push::<ReservationPage>(Command::new(
                "reservation-get-page",
                [daemon].into_iter().collect(),
                Some(page_arguments(self.page_limit, cursor)),
            ));

            let mut responses = forward_batch(self.transport.as_ref(), target, batch).await?;
            let Some(response) = responses.take(slot)?.into_iter().next() else {
                break;
            };

            if response.code() == ResultCode::Empty {
                trace!("no more hosts on {daemon} after page {page}");
                break;
            }
            if let Some(e) = response.error("reservation-get-page") {
                return Err(e.into());
            }
            let Some(args) = response.arguments else {
                break;
            };
            if args.hosts.is_empty() {
                break;
            }

            trace!("page {page} from {daemon}: {} host(s)", args.count);
            hosts.extend(args.hosts.into_iter().filter_map(parse_host));

            match args.next {
                Some(next) if next != cursor => cursor = next,
                _ => break,
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TargetCollector for HostReservationsCollector {
    fn subject(&self) -> &'static str {
        "host reservations"
    }

    #[instrument(skip_all, fields(app_id = app.id))]
    async fn collect_target(&self, app: &App) -> Result<TargetStatus, CollectError> {
        let daemons: Vec<&str> = app
            .active_daemons(&["dhcp4", "dhcp6"])
            .map(|d| d.name.as_str())
            .collect();
        if daemons.is_empty() {
            return Ok(TargetStatus::Skipped);
        }

        let target = ForwardTarget::from_app(app);
        let mut hosts = Vec::new();
        for daemon in daemons {
            self.fetch_daemon_hosts(&target, daemon, &mut hosts).await?;
        }

        debug!("storing {} host reservation(s)", hosts.len());
        self.storage.upsert_host_reservations(app.id, hosts).await?;
        Ok(TargetStatus::Collected)
    }
}

/// Puller gathering host reservations from all Kea apps
pub struct HostsPuller {
    puller: Puller,
    collector: Arc<Collector<HostReservationsCollector>>,
}

impl HostsPuller {
    /// Start the puller. The interval is read from the
    /// `kea_hosts_puller_interval` setting unless `interval` overrides it.
    pub async fn new(
        storage: Arc<dyn Storage>,
        transport: Arc<dyn Transport>,
        events: Arc<dyn EventCenter>,
        interval: Option<Duration>,
        page_limit: usize,
    ) -> StorageResult<Self> {
        let interval = match interval {
            Some(interval) => interval,
            None => puller_interval(storage.as_ref(), KEA_HOSTS_PULLER_INTERVAL).await?,
        };

        let collector = Arc::new(Collector::new(
            HostReservationsCollector::new(Arc::clone(&storage), transport, page_limit),
            storage,
            events,
        ));
        let puller = Puller::new("kea-hosts-puller", interval, collector.clone());

        Ok(Self { puller, collector })
    }

    pub fn collector(&self) -> &Arc<Collector<HostReservationsCollector>> {
        &self.collector
    }

    pub async fn update_interval(&self, interval: Duration) {
        self.puller.update_interval(interval).await;
    }

    pub async fn shutdown(self) {
        self.puller.shutdown().await;
    }
}
