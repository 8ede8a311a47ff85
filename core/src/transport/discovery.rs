// Peer directory: join the overlay, announce ourselves, find other nodes
//
// Discovery runs over the Kademlia DHT: every node publishes a provider
// record under a shared topic and looks up the other providers of it.
// Bootstrap peers are only the entry point; once the routing table is warm
// any node can answer.

use super::peers::PeerRecord;
use super::swarm::{peer_id_from_addr, SwarmHandle};
use super::TransportError;
use crate::protocol::{greeting, LineSender, DISCOVERY_TOPIC, ORACLE_PROTOCOL};
use futures::{Stream, StreamExt};
use libp2p::multiaddr::Protocol;
use libp2p::{Multiaddr, PeerId};
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("failed to announce: {0}")]
    Announce(String),
    #[error("discovery timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Providers found by one lookup round. Finite; every call to
/// [`Directory::find_peers`] starts a fresh lookup.
pub type PeerStream = Pin<Box<dyn Stream<Item = PeerRecord> + Send>>;

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub bootstrap_peers: Vec<Multiaddr>,
    /// DHT key nodes announce themselves under
    pub topic: String,
    /// Per-address deadline for bootstrap dials
    pub bootstrap_timeout: Duration,
    /// Provider re-announce period; must stay below the provider TTL
    pub announce_interval: Duration,
    pub discovery_interval: Duration,
    /// Upper bound on one lookup round
    pub discovery_timeout: Duration,
    pub max_peers_per_round: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            bootstrap_peers: Vec::new(),
            topic: DISCOVERY_TOPIC.to_string(),
            bootstrap_timeout: Duration::from_secs(10),
            announce_interval: Duration::from_secs(60 * 60),
            discovery_interval: Duration::from_secs(60),
            discovery_timeout: Duration::from_secs(30),
            max_peers_per_round: 64,
        }
    }
}

/// What happened to each configured bootstrap address
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    pub connected: Vec<PeerId>,
    pub failed: Vec<(Multiaddr, String)>,
    /// Addresses naming this node itself
    pub skipped_self: usize,
}

#[derive(Clone)]
pub struct Directory {
    handle: SwarmHandle,
    config: DiscoveryConfig,
    greeting: String,
}

impl Directory {
    /// Connect to every bootstrap address in parallel, greet the peers that
    /// answered and seed the DHT. Individual failures land in the report;
    /// only a stopped swarm is an error.
    pub async fn bootstrap(
        handle: SwarmHandle,
        config: DiscoveryConfig,
    ) -> Result<(Self, BootstrapReport), DiscoveryError> {
        let own = own_address(&handle).await?;
        let directory = Self {
            greeting: greeting(&own),
            handle,
            config,
        };

        let report = directory.dial_bootstrap_peers().await;
        if !report.connected.is_empty() {
            directory.handle.kad_bootstrap().await?;
        }
        for peer in &report.connected {
            directory.greet(*peer);
        }

        tracing::info!(
            "Bootstrap finished: {} connected, {} failed",
            report.connected.len(),
            report.failed.len()
        );
        Ok((directory, report))
    }

    async fn dial_bootstrap_peers(&self) -> BootstrapReport {
        let local = self.handle.local_peer_id();
        let timeout = self.config.bootstrap_timeout;
        let mut report = BootstrapReport::default();
        let mut attempts = Vec::new();

        for addr in &self.config.bootstrap_peers {
            match peer_id_from_addr(addr) {
                Some(peer) if peer == local => {
                    tracing::debug!("Skipping bootstrap address for this node: {}", addr);
                    report.skipped_self += 1;
                }
                Some(_) => attempts.push(addr.clone()),
                None => {
                    tracing::warn!("Bootstrap address {} has no /p2p/ peer id", addr);
                    report
                        .failed
                        .push((addr.clone(), "missing /p2p/ peer id".to_string()));
                }
            }
        }

        let outcomes = futures::future::join_all(attempts.into_iter().map(|addr| async move {
            let outcome = match tokio::time::timeout(timeout, self.handle.dial(addr.clone())).await {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(_) => Err(format!("timed out after {:?}", timeout)),
            };
            (addr, outcome)
        }))
        .await;

        for (addr, outcome) in outcomes {
            match outcome {
                Ok(peer) => {
                    tracing::info!("Connected to bootstrap peer {}", addr);
                    if !report.connected.contains(&peer) {
                        report.connected.push(peer);
                    }
                }
                Err(reason) => {
                    tracing::warn!("Failed to connect to bootstrap peer {}: {}", addr, reason);
                    report.failed.push((addr, reason));
                }
            }
        }
        report
    }

    /// Publish (or refresh) our provider record under the discovery topic
    pub async fn announce(&self) -> Result<(), DiscoveryError> {
        let timeout = self.config.discovery_timeout;
        tokio::time::timeout(timeout, self.handle.start_providing(&self.config.topic))
            .await
            .map_err(|_| DiscoveryError::Timeout(timeout))??;
        tracing::debug!("Announced under {}", self.config.topic);
        Ok(())
    }

    /// Look up other providers of the discovery topic. The stream ends after
    /// `max_peers_per_round` peers or `discovery_timeout`, whichever is first.
    pub async fn find_peers(&self) -> Result<PeerStream, DiscoveryError> {
        let found = self
            .handle
            .find_providers(&self.config.topic, self.config.max_peers_per_round)
            .await?;
        let deadline = tokio::time::sleep(self.config.discovery_timeout);
        Ok(Box::pin(ReceiverStream::new(found).take_until(deadline)))
    }

    /// Send our greeting to `peer` on its own task
    pub fn greet(&self, peer: PeerId) -> JoinHandle<()> {
        let handle = self.handle.clone();
        let line = self.greeting.clone();
        tokio::spawn(async move {
            if let Err(e) = handle.send_line(peer, ORACLE_PROTOCOL, line).await {
                tracing::warn!("Failed to greet {}: {}", peer, e);
            }
        })
    }

    /// Re-announce every `announce_interval` and run a discovery round
    /// every `discovery_interval`, greeting each peer found.
    pub fn spawn_maintenance(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let directory = self.clone();
        tokio::spawn(async move {
            let mut announce = tokio::time::interval(directory.config.announce_interval);
            let mut discover = tokio::time::interval(directory.config.discovery_interval);
            announce.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            discover.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // announced at startup already
            announce.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = announce.tick() => {
                        if let Err(e) = directory.announce().await {
                            tracing::warn!("Re-announce failed: {}", e);
                        }
                    }
                    _ = discover.tick() => directory.discovery_round(&shutdown).await,
                }
            }
        })
    }

    async fn discovery_round(&self, shutdown: &CancellationToken) {
        let mut found = match self.find_peers().await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!("Peer discovery failed: {}", e);
                return;
            }
        };

        let mut count = 0usize;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                next = found.next() => match next {
                    Some(record) => {
                        tracing::info!("Found peer: {}", record.peer_id);
                        self.greet(record.peer_id);
                        count += 1;
                    }
                    None => break,
                },
            }
        }
        tracing::debug!("Discovery round found {} peers", count);
    }
}

/// This node's first listen address with its `/p2p/` component
pub async fn own_address(handle: &SwarmHandle) -> Result<Multiaddr, TransportError> {
    let listen = handle
        .listen_addrs()
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| TransportError::InvalidAddress("no listen address".to_string()))?;
    Ok(with_p2p(listen, handle.local_peer_id()))
}

/// Append `/p2p/<peer>` unless the address already carries a peer id
pub fn with_p2p(addr: Multiaddr, peer: PeerId) -> Multiaddr {
    if peer_id_from_addr(&addr).is_some() {
        addr
    } else {
        addr.with(Protocol::P2p(peer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_p2p_appends_once() {
        let peer = PeerId::random();
        let addr: Multiaddr = "/ip4/127.0.0.1/tcp/4001".parse().unwrap();

        let qualified = with_p2p(addr, peer);
        assert_eq!(qualified.to_string(), format!("/ip4/127.0.0.1/tcp/4001/p2p/{}", peer));
        assert_eq!(with_p2p(qualified.clone(), peer), qualified);
    }

    #[test]
    fn test_default_announce_interval_is_below_provider_ttl() {
        let config = DiscoveryConfig::default();
        assert!(config.announce_interval < Duration::from_secs(24 * 60 * 60));
        assert_eq!(config.topic, "/oracle/1.0.0");
    }

    #[tokio::test(start_paused = true)]
    async fn test_peer_stream_ends_at_deadline() {
        let (tx, rx) = tokio::sync::mpsc::channel(4);
        tx.send(PeerRecord::new(PeerId::random())).await.unwrap();

        let deadline = tokio::time::sleep(Duration::from_secs(30));
        let mut stream: PeerStream = Box::pin(ReceiverStream::new(rx).take_until(deadline));

        assert!(stream.next().await.is_some());
        // sender still open: only the deadline can end the round
        assert!(stream.next().await.is_none());
        drop(tx);
    }
}
