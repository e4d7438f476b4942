//! Puller scheduling and shutdown, standalone and driving the Kea collectors

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use fleetwatch::{
    apps::kea::StatsPuller,
    model::{Setting, SettingValue},
    puller::{PullAction, Puller},
    storage::{
        MemoryBackend, Storage,
        settings::{KEA_STATS_PULLER_INTERVAL, initialize_settings},
    },
};

use crate::helpers::*;

/// Action that sleeps while tracking how many invocations overlap
#[derive(Default)]
struct SlowAction {
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    started: AtomicUsize,
    finished: AtomicUsize,
}

impl SlowAction {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Default::default()
        })
    }
}

#[async_trait]
impl PullAction for SlowAction {
    async fn pull(&self) -> anyhow::Result<()> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn test_slow_action_never_overlaps() {
    let action = SlowAction::new(Duration::from_millis(40));
    let puller = Puller::with_period("slow", Duration::from_millis(5), action.clone());

    tokio::time::sleep(Duration::from_millis(300)).await;
    puller.shutdown().await;

    assert!(action.started.load(Ordering::SeqCst) >= 2);
    assert_eq!(action.max_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_shutdown_waits_for_running_action() {
    let action = SlowAction::new(Duration::from_millis(200));
    let puller = Puller::with_period("blocking", Duration::from_millis(5), action.clone());

    assert!(
        wait_until(Duration::from_secs(2), || action.started.load(Ordering::SeqCst) == 1).await
    );
    puller.shutdown().await;

    // The action that was running when shutdown was requested has completed
    let started = action.started.load(Ordering::SeqCst);
    assert_eq!(action.finished.load(Ordering::SeqCst), started);
    assert_eq!(action.in_flight.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(action.started.load(Ordering::SeqCst), started);
}

#[tokio::test]
async fn test_closure_action_runs_on_every_tick() {
    let ran = Arc::new(AtomicBool::new(false));
    let flag = ran.clone();
    let action = move || {
        let flag = flag.clone();
        async move {
            flag.store(true, Ordering::SeqCst);
            anyhow::Ok(())
        }
    };

    let puller = Puller::with_period("closure", Duration::from_millis(10), Arc::new(action));
    assert_eq!(puller.name(), "closure");
    assert!(wait_until(Duration::from_secs(2), || ran.load(Ordering::SeqCst)).await);
    puller.shutdown().await;
}

#[tokio::test]
async fn test_stats_puller_uses_stored_interval() {
    let storage = Arc::new(MemoryBackend::new());
    initialize_settings(storage.as_ref()).await.unwrap();
    storage
        .set_setting(Setting {
            name: KEA_STATS_PULLER_INTERVAL.to_string(),
            value: SettingValue::Int(1),
        })
        .await
        .unwrap();

    let app = add_kea_app(storage.as_ref(), "192.0.2.1", &[("dhcp4", true)]).await;
    let transport = ScriptedTransport::new();
    transport.on_agent("192.0.2.1", stats_responder(vec![row(&[1, 256, 12, 10, 0])], vec![]));
    let events = RecordingEventCenter::new();

    let puller = StatsPuller::new(storage.clone(), transport.clone(), events.clone(), None)
        .await
        .unwrap();

    assert!(wait_until(Duration::from_secs(3), || transport.calls_to("192.0.2.1") >= 1).await);
    puller.shutdown().await;

    let stats = storage.get_lease_stats(app.id).await.unwrap();
    assert_eq!(stats.len(), 1);
    assert!(events.events().is_empty());
}

#[tokio::test]
async fn test_stats_puller_without_settings_fails_to_start() {
    let storage = Arc::new(MemoryBackend::new());
    let transport = ScriptedTransport::new();
    let events = RecordingEventCenter::new();

    let result = StatsPuller::new(storage, transport, events, None).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_stats_puller_reports_unreachable_app() {
    let storage = Arc::new(MemoryBackend::new());
    let app = add_kea_app(storage.as_ref(), "192.0.2.9", &[("dhcp4", true)]).await;
    let transport = ScriptedTransport::new();
    let events = RecordingEventCenter::new();

    let puller = StatsPuller::new(
        storage.clone(),
        transport.clone(),
        events.clone(),
        Some(Duration::from_secs(1)),
    )
    .await
    .unwrap();

    assert!(wait_until(Duration::from_secs(3), || !events.events().is_empty()).await);
    puller.shutdown().await;

    let recorded = events.events();
    assert_eq!(recorded[0].relations.app, Some(app.id));
    assert!(recorded[0].text.contains("failed"));
}
