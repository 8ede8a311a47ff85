// Liveness: directed ping reports and random greeting fan-out

use crate::protocol::{LineSender, ORACLE_PROTOCOL};
use crate::transport::{PeerSet, SwarmHandle};
use libp2p::{Multiaddr, PeerId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Outcome of one ping round trip to the heartbeat target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatReport {
    pub peer: PeerId,
    pub rtt: Result<Duration, String>,
}

/// The directed ping target: a `/p2p/` address and the peer it names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatTarget {
    pub peer: PeerId,
    pub addr: Multiaddr,
}

/// Log every report until the channel closes or the node shuts down, and
/// forward it to `output` if one is given.
/// Failures are logged and do not stop subsequent ticks.
pub fn spawn_ping_reporter(
    mut reports: mpsc::Receiver<HeartbeatReport>,
    output: Option<mpsc::Sender<HeartbeatReport>>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                report = reports.recv() => {
                    let Some(report) = report else { break };
                    match &report.rtt {
                        Ok(rtt) => tracing::info!("Ping {}: {:?}", report.peer, rtt),
                        Err(e) => tracing::warn!("Ping {} failed: {}", report.peer, e),
                    }
                    if let Some(output) = &output {
                        if output.send(report).await.is_err() {
                            tracing::debug!("Heartbeat report consumer went away");
                        }
                    }
                }
            }
        }
    })
}

/// Make sure the heartbeat target is connected, redialing it if the
/// connection went away (idle timeout, remote restart).
pub async fn ensure_connected(
    handle: &SwarmHandle,
    peers: &PeerSet,
    target: &HeartbeatTarget,
    dial_timeout: Duration,
) -> Result<(), String> {
    if peers.contains(&target.peer) {
        return Ok(());
    }
    tracing::info!("Heartbeat target {} not connected, redialing", target.peer);
    match tokio::time::timeout(dial_timeout, handle.dial(target.addr.clone())).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("redial timed out after {:?}", dial_timeout)),
    }
}

/// Every `interval`, check the heartbeat target is still connected and
/// redial it if not. Ping only runs over live connections, so this keeps the
/// pings going; a failed redial is reported as a failed heartbeat.
pub fn spawn_target_redial(
    handle: SwarmHandle,
    peers: PeerSet,
    target: HeartbeatTarget,
    interval: Duration,
    dial_timeout: Duration,
    reports: mpsc::Sender<HeartbeatReport>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // connected at startup
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let outcome = tokio::select! {
                        _ = shutdown.cancelled() => break,
                        outcome = ensure_connected(&handle, &peers, &target, dial_timeout) => outcome,
                    };
                    if let Err(e) = outcome {
                        let report = HeartbeatReport {
                            peer: target.peer,
                            rtt: Err(e),
                        };
                        if reports.send(report).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    })
}

/// One fan-out round: pick a random connected peer and greet it.
/// Returns the peer picked, or `None` when nobody is connected.
pub async fn fanout_tick(peers: &PeerSet, sender: &dyn LineSender, greeting: &str) -> Option<PeerId> {
    let target = peers.pick_random()?;
    if let Err(e) = sender
        .send_line(target.peer_id, ORACLE_PROTOCOL, greeting.to_string())
        .await
    {
        tracing::warn!("Fan-out to {} failed: {}", target.peer_id, e);
    }
    Some(target.peer_id)
}

/// Every `interval`, greet one uniformly chosen connected peer.
pub fn spawn_random_fanout(
    peers: PeerSet,
    sender: Arc<dyn LineSender>,
    greeting: String,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // the first tick fires immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    fanout_tick(&peers, sender.as_ref(), &greeting).await;
                }
            }
        }
    })
}
