//! Collection cycles of the Kea pullers against a scripted transport

use std::sync::Arc;

use assert_matches::assert_matches;
use fleetwatch::{
    agentcomm::ForwardError,
    apps::kea::{
        CollectError, Collector, HostReservationsCollector, LeaseStatsCollector,
    },
    model::{EventLevel, LeaseCounters},
    storage::{MemoryBackend, Storage},
};
use serde_json::{Value, json};

use crate::helpers::*;

fn stats_collector(
    storage: &Arc<MemoryBackend>,
    transport: &Arc<ScriptedTransport>,
    events: &Arc<RecordingEventCenter>,
) -> Collector<LeaseStatsCollector> {
    Collector::new(
        LeaseStatsCollector::new(storage.clone(), transport.clone()),
        storage.clone(),
        events.clone(),
    )
}

#[tokio::test]
async fn test_app_without_active_dhcp_daemons_is_skipped() {
    let storage = Arc::new(MemoryBackend::new());
    let transport = ScriptedTransport::new();
    let events = RecordingEventCenter::new();

    let active = add_kea_app(storage.as_ref(), "192.0.2.1", &[("ca", true), ("dhcp4", true)]).await;
    let idle = add_kea_app(
        storage.as_ref(),
        "192.0.2.2",
        &[("ca", true), ("dhcp4", false), ("dhcp6", false)],
    )
    .await;

    transport.on_agent("192.0.2.1", stats_responder(vec![row(&[1, 256, 12, 10, 0])], vec![]));

    let outcome = stats_collector(&storage, &transport, &events)
        .collect()
        .await
        .unwrap();

    assert_eq!(outcome.succeeded, 1);
    assert_eq!(outcome.skipped, 1);
    assert_eq!(outcome.failed, 0);
    assert!(outcome.last_error.is_none());
    assert_eq!(transport.calls_to("192.0.2.2"), 0);

    assert_eq!(storage.get_lease_stats(active.id).await.unwrap().len(), 1);
    assert!(storage.get_lease_stats(idle.id).await.unwrap().is_empty());
    assert!(events.events().is_empty());
}

#[tokio::test]
async fn test_failing_app_does_not_stop_the_cycle() {
    let storage = Arc::new(MemoryBackend::new());
    let transport = ScriptedTransport::new();
    let events = RecordingEventCenter::new();

    let broken = add_kea_app(storage.as_ref(), "192.0.2.1", &[("dhcp4", true)]).await;
    let healthy = add_kea_app(storage.as_ref(), "192.0.2.2", &[("dhcp4", true)]).await;

    transport.on_agent(
        "192.0.2.2",
        stats_responder(vec![row(&[1, 256, 12, 10, 0]), row(&[2, 128, 3, 3, 1])], vec![]),
    );

    let outcome = stats_collector(&storage, &transport, &events)
        .collect()
        .await
        .unwrap();

    assert_eq!(outcome.succeeded, 1);
    assert_eq!(outcome.failed, 1);
    assert_matches!(
        outcome.last_error,
        Some(CollectError::Forward(ForwardError::Transport { .. }))
    );

    assert!(storage.get_lease_stats(broken.id).await.unwrap().is_empty());
    let stats = storage.get_lease_stats(healthy.id).await.unwrap();
    assert_eq!(stats.len(), 2);
    assert_eq!(
        stats[1].counters,
        LeaseCounters::V4 {
            total_addresses: 128,
            assigned_addresses: 3,
            declined_addresses: 1,
        }
    );

    let recorded = events.events();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].level, EventLevel::Warning);
    assert!(recorded[0].text.starts_with("Communication with <app id="));
    assert!(recorded[0].text.contains(r#"address="192.0.2.1""#));
    assert_eq!(recorded[0].relations.app, Some(broken.id));
    assert_eq!(recorded[0].relations.machine, Some(broken.machine.id));
}

#[tokio::test]
async fn test_row_with_wrong_value_count_is_skipped() {
    let storage = Arc::new(MemoryBackend::new());
    let transport = ScriptedTransport::new();
    let events = RecordingEventCenter::new();

    let app = add_kea_app(storage.as_ref(), "192.0.2.1", &[("dhcp4", true)]).await;
    transport.on_agent(
        "192.0.2.1",
        stats_responder(
            vec![
                row(&[1, 256, 12, 10, 0]),
                row(&[2, 128, 3]),
                row(&[3, 64, 1, 1, 0]),
            ],
            vec![],
        ),
    );

    let outcome = stats_collector(&storage, &transport, &events)
        .collect()
        .await
        .unwrap();
    assert_eq!(outcome.succeeded, 1);

    let subnets: Vec<i64> = storage
        .get_lease_stats(app.id)
        .await
        .unwrap()
        .iter()
        .map(|r| r.subnet_id)
        .collect();
    assert_eq!(subnets, vec![1, 3]);
}

#[tokio::test]
async fn test_batch_follows_active_daemons() {
    let storage = Arc::new(MemoryBackend::new());
    let transport = ScriptedTransport::new();
    let events = RecordingEventCenter::new();

    let both = add_kea_app(storage.as_ref(), "192.0.2.1", &[("dhcp4", true), ("dhcp6", true)]).await;
    add_kea_app(storage.as_ref(), "192.0.2.2", &[("dhcp4", false), ("dhcp6", true)]).await;

    for address in ["192.0.2.1", "192.0.2.2"] {
        transport.on_agent(
            address,
            stats_responder(
                vec![row(&[1, 256, 12, 10, 0])],
                vec![row(&[2, 4096, 5, 3, 0, 16, 2, 2])],
            ),
        );
    }

    let outcome = stats_collector(&storage, &transport, &events)
        .collect()
        .await
        .unwrap();
    assert_eq!(outcome.succeeded, 2);

    let calls = transport.calls();
    assert_eq!(calls.len(), 2);

    let first: Vec<(&str, Vec<String>)> = calls[0]
        .1
        .iter()
        .map(|c| (c.command.as_str(), c.daemons.names().to_vec()))
        .collect();
    assert_eq!(
        first,
        vec![
            ("stat-lease4-get", vec!["dhcp4".to_string()]),
            ("stat-lease6-get", vec!["dhcp6".to_string()]),
        ]
    );
    assert_eq!(calls[0].0.ctrl_url, "http://127.0.0.1:8000/");

    let second: Vec<&str> = calls[1].1.iter().map(|c| c.command.as_str()).collect();
    assert_eq!(second, vec!["stat-lease6-get"]);

    let stats = storage.get_lease_stats(both.id).await.unwrap();
    assert_eq!(stats.len(), 2);
    assert_eq!(
        stats[1].counters,
        LeaseCounters::V6 {
            total_nas: 4096,
            assigned_nas: 3,
            declined_nas: 0,
            total_pds: 16,
            assigned_pds: 2,
        }
    );
}

#[tokio::test]
async fn test_result_set_without_subnet_column_fails_app() {
    let storage = Arc::new(MemoryBackend::new());
    let transport = ScriptedTransport::new();
    let events = RecordingEventCenter::new();

    add_kea_app(storage.as_ref(), "192.0.2.1", &[("dhcp4", true)]).await;
    transport.on_agent("192.0.2.1", |_| {
        Ok(vec![stat_response(
            &["total-addresses", "assigned-addresses"],
            vec![row(&[256, 10])],
        )])
    });

    let outcome = stats_collector(&storage, &transport, &events)
        .collect()
        .await
        .unwrap();

    assert_eq!(outcome.failed, 1);
    assert_matches!(
        outcome.last_error,
        Some(CollectError::ResultSet { ref daemon, .. }) if daemon == "dhcp4"
    );
    // Not a communication problem
    assert!(events.events().is_empty());
}

#[tokio::test]
async fn test_missing_counter_column_keeps_stored_counters() {
    let storage = Arc::new(MemoryBackend::new());
    let transport = ScriptedTransport::new();
    let events = RecordingEventCenter::new();
    let collector = stats_collector(&storage, &transport, &events);

    let app = add_kea_app(storage.as_ref(), "192.0.2.1", &[("dhcp4", true)]).await;
    transport.on_agent("192.0.2.1", stats_responder(vec![row(&[7, 256, 12, 10, 1])], vec![]));
    collector.collect().await.unwrap();

    transport.on_agent("192.0.2.1", |_| {
        Ok(vec![stat_response(
            &["subnet-id", "assigned-addresses", "declined-addresses"],
            vec![row(&[7, 0, 0])],
        )])
    });
    let outcome = collector.collect().await.unwrap();

    assert_eq!(outcome.failed, 1);
    assert_matches!(
        outcome.last_error,
        Some(CollectError::ResultSet { ref daemon, .. }) if daemon == "dhcp4"
    );

    let stats = storage.get_lease_stats(app.id).await.unwrap();
    assert_eq!(stats.len(), 1);
    assert_eq!(
        stats[0].counters,
        LeaseCounters::V4 {
            total_addresses: 256,
            assigned_addresses: 10,
            declined_addresses: 1,
        }
    );
}

#[tokio::test]
async fn test_command_error_keeps_other_daemon_records() {
    let storage = Arc::new(MemoryBackend::new());
    let transport = ScriptedTransport::new();
    let events = RecordingEventCenter::new();

    let app = add_kea_app(storage.as_ref(), "192.0.2.1", &[("dhcp4", true), ("dhcp6", true)]).await;
    transport.on_agent("192.0.2.1", |commands| {
        Ok(commands
            .iter()
            .map(|cmd| match cmd.command.as_str() {
                "stat-lease4-get" => stat_response(&V4_COLUMNS, vec![row(&[1, 256, 12, 10, 0])]),
                _ => json!([{"result": 1, "text": "lease database unavailable"}]),
            })
            .collect())
    });

    let outcome = stats_collector(&storage, &transport, &events)
        .collect()
        .await
        .unwrap();

    assert_eq!(outcome.failed, 1);
    assert_matches!(
        outcome.last_error,
        Some(CollectError::Command(ref e)) if e.daemon == "dhcp6" && e.command == "stat-lease6-get"
    );
    assert_eq!(storage.get_lease_stats(app.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_reachability_events_only_on_transitions() {
    let storage = Arc::new(MemoryBackend::new());
    let transport = ScriptedTransport::new();
    let events = RecordingEventCenter::new();
    let collector = stats_collector(&storage, &transport, &events);

    let app = add_kea_app(storage.as_ref(), "192.0.2.1", &[("dhcp4", true)]).await;

    collector.collect().await.unwrap();
    collector.collect().await.unwrap();
    assert_eq!(events.events().len(), 1);

    transport.on_agent("192.0.2.1", stats_responder(vec![row(&[1, 256, 12, 10, 0])], vec![]));
    collector.collect().await.unwrap();
    collector.collect().await.unwrap();

    let recorded = events.events();
    assert_eq!(recorded.len(), 2);
    assert_eq!(recorded[1].level, EventLevel::Info);
    assert!(recorded[1].text.ends_with("restored"));
    assert_eq!(recorded[1].relations.app, Some(app.id));

    transport.make_unreachable("192.0.2.1");
    collector.collect().await.unwrap();
    assert_eq!(events.events().len(), 3);
    assert_eq!(events.events()[2].level, EventLevel::Warning);
}

fn host(mac: &str, ip: &str) -> Value {
    json!({"hw-address": mac, "ip-address": ip, "hostname": "", "subnet-id": 1})
}

#[tokio::test]
async fn test_hosts_are_fetched_page_by_page() {
    let storage = Arc::new(MemoryBackend::new());
    let transport = ScriptedTransport::new();
    let events = RecordingEventCenter::new();

    let app = add_kea_app(storage.as_ref(), "192.0.2.1", &[("dhcp4", true)]).await;

    transport.on_agent("192.0.2.1", |commands| {
        let args = commands[0].arguments.clone().unwrap_or_default();
        let from = args.get("from").and_then(Value::as_i64).unwrap_or(0);
        let page = match from {
            0 => json!([{
                "result": 0,
                "arguments": {
                    "count": 2,
                    "hosts": [host("00:00:00:00:00:01", "192.0.2.10"), host("00:00:00:00:00:02", "192.0.2.11")],
                    "next": {"from": 2, "source-index": 1}
                }
            }]),
            2 => json!([{
                "result": 0,
                "arguments": {
                    "count": 1,
                    "hosts": [host("00:00:00:00:00:03", "192.0.2.12")],
                    "next": {"from": 3, "source-index": 1}
                }
            }]),
            _ => json!([{"result": 3, "text": "0 IPv4 host(s) found."}]),
        };
        Ok(vec![page])
    });

    let collector = Collector::new(
        HostReservationsCollector::new(storage.clone(), transport.clone(), 2),
        storage.clone(),
        events.clone(),
    );
    let outcome = collector.collect().await.unwrap();
    assert_eq!(outcome.succeeded, 1);

    let calls = transport.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[0].1[0].command, "reservation-get-page");
    assert_eq!(calls[0].1[0].arguments, Some(json!({"limit": 2})));
    assert_eq!(
        calls[1].1[0].arguments,
        Some(json!({"limit": 2, "source-index": 1, "from": 2}))
    );

    let hosts = storage.get_host_reservations(app.id).await.unwrap();
    let addresses: Vec<&str> = hosts
        .iter()
        .map(|h| h.ip_addresses[0].as_str())
        .collect();
    assert_eq!(addresses, vec!["192.0.2.10", "192.0.2.11", "192.0.2.12"]);
    assert!(hosts.iter().all(|h| h.hostname.is_none()));
}

#[tokio::test]
async fn test_hosts_collected_per_daemon() {
    let storage = Arc::new(MemoryBackend::new());
    let transport = ScriptedTransport::new();
    let events = RecordingEventCenter::new();

    let app = add_kea_app(storage.as_ref(), "192.0.2.1", &[("dhcp4", true), ("dhcp6", true)]).await;

    transport.on_agent("192.0.2.1", |commands| {
        let page = if commands[0].daemons.contains("dhcp4") {
            json!([{"result": 0, "arguments": {"count": 1, "hosts": [host("00:00:00:00:00:01", "192.0.2.10")]}}])
        } else {
            json!([{"result": 0, "arguments": {"count": 1, "hosts": [{
                "duid": "01:02:03",
                "ip-addresses": ["2001:db8::10"],
                "subnet-id": 2
            }]}}])
        };
        Ok(vec![page])
    });

    let collector = Collector::new(
        HostReservationsCollector::new(storage.clone(), transport.clone(), 100),
        storage.clone(),
        events.clone(),
    );
    collector.collect().await.unwrap();

    // No `next` cursor: one page per daemon
    assert_eq!(transport.calls().len(), 2);
    let hosts = storage.get_host_reservations(app.id).await.unwrap();
    assert_eq!(hosts.len(), 2);
    assert_eq!(hosts[1].identifier_type, "duid");
}
