use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use fleetwatch::{
    agentcomm::{HttpTransport, Transport},
    apps::kea::{HostsPuller, StatsPuller},
    config::{Config, StorageConfig, read_config_file, seed_fleet},
    eventcenter::{EventCenter, EventCenterService},
    storage::{MemoryBackend, Storage, settings::initialize_settings},
};
use tracing::{error, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,
}

fn init(level: LevelFilter) {
    let filter = filter::Targets::new().with_targets(vec![
        ("fleetwatch", level),
        ("hub", level),
        ("tower_http", LevelFilter::INFO.min(level)),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

async fn open_storage(config: &Config) -> anyhow::Result<Arc<dyn Storage>> {
    match config.storage.clone().unwrap_or_default() {
        StorageConfig::None => {
            warn!("using in-memory storage, collected data is lost on exit");
            Ok(Arc::new(MemoryBackend::new()))
        }
        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite { path } => {
            let backend = fleetwatch::storage::sqlite::SqliteBackend::new(&path)
                .await
                .with_context(|| format!("failed to open database {}", path.display()))?;
            Ok(Arc::new(backend))
        }
        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => {
            anyhow::bail!("SQLite storage requested but the storage-sqlite feature is disabled")
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = read_config_file(&args.file)
        .with_context(|| format!("failed to read config file {}", args.file))?;

    let level = LevelFilter::from_str(&config.log_level)
        .with_context(|| format!("invalid log level {}", config.log_level))?;
    init(level);
    trace!("started with args: {args:?}");

    let storage = open_storage(&config).await?;
    initialize_settings(storage.as_ref())
        .await
        .context("failed to initialize settings")?;

    if !config.fleet.is_empty() {
        let added = seed_fleet(storage.as_ref(), &config.fleet)
            .await
            .context("failed to register configured fleet")?;
        info!("registered {added} new app(s) from the config file");
    }

    let transport: Arc<dyn Transport> = Arc::new(
        HttpTransport::new(config.agents.timeout()).context("failed to build HTTP client")?,
    );

    let event_center = EventCenterService::spawn(Arc::clone(&storage));
    let events: Arc<dyn EventCenter> = Arc::new(event_center.handle());

    let stats_puller = StatsPuller::new(
        Arc::clone(&storage),
        Arc::clone(&transport),
        Arc::clone(&events),
        config.pullers.stats_interval(),
    )
    .await
    .context("failed to start stats puller")?;

    let hosts_puller = HostsPuller::new(
        Arc::clone(&storage),
        Arc::clone(&transport),
        Arc::clone(&events),
        config.pullers.hosts_interval(),
        config.pullers.hosts_page_limit,
    )
    .await
    .context("failed to start hosts puller")?;

    #[cfg(feature = "api")]
    let sse_server = {
        let server = fleetwatch::api::spawn_sse_server(config.api.clone(), event_center.broker())
            .await
            .context("failed to start SSE server")?;
        info!("serving events on http://{}/sse", server.local_addr());
        server
    };

    info!("hub running, press Ctrl-C to stop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {e}");
    }

    info!("shutting down");
    stats_puller.shutdown().await;
    hosts_puller.shutdown().await;
    event_center.shutdown().await;
    #[cfg(feature = "api")]
    sse_server.shutdown().await;
    if let Err(e) = storage.close().await {
        error!("failed to close storage: {e}");
    }

    Ok(())
}
