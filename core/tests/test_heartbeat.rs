// Integration tests for the directed heartbeat
//
// Real nodes on loopback with a short idle timeout, so the connection to the
// target is closed between pings and has to be re-established.

use oracle_core::{HeartbeatReport, NodeBuilder, NodeConfig, OracleNode};
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

fn test_config(dir: &Path, name: &str) -> NodeConfig {
    NodeConfig {
        key_path: dir.join(format!("{}.key", name)),
        listen_addr: "/ip4/127.0.0.1/tcp/0".parse().unwrap(),
        enable_fanout: false,
        discovery_interval: Duration::from_secs(3600),
        discovery_timeout: Duration::from_secs(5),
        ..NodeConfig::default()
    }
}

/// Everything received on `reports` within `window`, with arrival offsets
async fn collect_for(
    reports: &mut mpsc::Receiver<HeartbeatReport>,
    window: Duration,
) -> Vec<(Duration, HeartbeatReport)> {
    let started = Instant::now();
    let deadline = started + window;
    let mut seen = Vec::new();
    while let Ok(Some(report)) = tokio::time::timeout_at(deadline, reports.recv()).await {
        seen.push((started.elapsed(), report));
    }
    seen
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reports_continue_after_idle_close() {
    let dir = tempfile::tempdir().unwrap();
    let b = OracleNode::start(test_config(dir.path(), "b"))
        .await
        .expect("Failed to start node B");
    let c = OracleNode::start(test_config(dir.path(), "c"))
        .await
        .expect("Failed to start node C");

    // A is also connected to C; only B's pings may be reported
    let (tx, mut reports) = mpsc::channel(64);
    let a = NodeBuilder::new(NodeConfig {
        heartbeat_target: Some(b.address().clone()),
        heartbeat_interval: Duration::from_secs(1),
        idle_timeout: Duration::from_secs(2),
        bootstrap_peers: vec![c.address().clone()],
        ..test_config(dir.path(), "a")
    })
    .with_heartbeat_reports(tx)
    .start()
    .await
    .expect("Failed to start node A");

    let seen = collect_for(&mut reports, Duration::from_secs(10)).await;

    assert!(!seen.is_empty(), "no heartbeat reports at all");
    for (_, report) in &seen {
        assert_eq!(report.peer, b.peer_id(), "report for a non-target peer");
    }
    let late = seen
        .iter()
        .filter(|(at, report)| *at >= Duration::from_secs(5) && report.rtt.is_ok())
        .count();
    assert!(late > 0, "pings stopped once the idle connection closed: {:?}", seen);

    a.shutdown().await;
    b.shutdown().await;
    c.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_lost_target_is_reported_every_interval() {
    let dir = tempfile::tempdir().unwrap();
    let b = OracleNode::start(test_config(dir.path(), "b"))
        .await
        .expect("Failed to start node B");
    let b_peer = b.peer_id();

    let (tx, mut reports) = mpsc::channel(64);
    let a = NodeBuilder::new(NodeConfig {
        heartbeat_target: Some(b.address().clone()),
        heartbeat_interval: Duration::from_secs(1),
        bootstrap_timeout: Duration::from_secs(2),
        ..test_config(dir.path(), "a")
    })
    .with_heartbeat_reports(tx)
    .start()
    .await
    .expect("Failed to start node A");

    b.shutdown().await;

    let seen = collect_for(&mut reports, Duration::from_secs(8)).await;
    let failures = seen
        .iter()
        .filter(|(_, report)| report.peer == b_peer && report.rtt.is_err())
        .count();
    assert!(failures >= 2, "expected repeated failures, got {:?}", seen);

    a.shutdown().await;
}
