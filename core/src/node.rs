// Oracle node: wires identity, transport, discovery, liveness and pub/sub

use crate::bridge::{Authenticator, WebhookBridge};
use crate::heartbeat::{
    spawn_ping_reporter, spawn_random_fanout, spawn_target_redial, HeartbeatReport, HeartbeatTarget,
};
use crate::identity::{load_or_create_identity, NodeIdentity};
use crate::protocol::{greeting, HandlerRegistry, LineSender, StreamHandler, StreamProtocolError};
use crate::protocol::{DISCOVERY_TOPIC, WORKER_STATUS_TOPIC};
use crate::pubsub::{
    spawn_subscription, PubSubError, SubscriptionHandler, WorkerStatusHandler, SUBSCRIPTION_BUFFER,
};
use crate::transport::discovery::{own_address, with_p2p};
use crate::transport::{
    peer_id_from_addr, start_swarm, BootstrapReport, DiscoveryConfig, Directory, PeerSet,
    ResourceLimits, SwarmHandle, TransportConfig, TransportError,
};
use crate::{ConfigError, NodeError};
use libp2p::multiaddr::Protocol;
use libp2p::{Multiaddr, PeerId, StreamProtocol};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Everything needed to start a node
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Private key file, created on first run
    pub key_path: PathBuf,
    pub listen_addr: Multiaddr,
    pub bootstrap_peers: Vec<Multiaddr>,
    /// Peer to dial at startup and ping every `heartbeat_interval`
    pub heartbeat_target: Option<Multiaddr>,
    pub limits: ResourceLimits,
    pub discovery_topic: String,

    pub heartbeat_interval: Duration,
    /// Random greeting fan-out period
    pub fanout_interval: Duration,
    pub enable_fanout: bool,
    pub request_timeout: Duration,
    pub idle_timeout: Duration,
    pub listen_timeout: Duration,
    pub bootstrap_timeout: Duration,
    pub announce_interval: Duration,
    pub provider_ttl: Duration,
    pub discovery_interval: Duration,
    pub discovery_timeout: Duration,
    pub max_peers_per_round: usize,

    /// Worker status reports kept in memory
    pub worker_status_capacity: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let transport = TransportConfig::default();
        let discovery = DiscoveryConfig::default();
        Self {
            key_path: PathBuf::from("private.key"),
            listen_addr: transport.listen_addr,
            bootstrap_peers: Vec::new(),
            heartbeat_target: None,
            limits: transport.limits,
            discovery_topic: DISCOVERY_TOPIC.to_string(),
            heartbeat_interval: transport.heartbeat_interval,
            fanout_interval: Duration::from_secs(5),
            enable_fanout: true,
            request_timeout: transport.request_timeout,
            idle_timeout: transport.idle_timeout,
            listen_timeout: transport.listen_timeout,
            bootstrap_timeout: discovery.bootstrap_timeout,
            announce_interval: discovery.announce_interval,
            provider_ttl: transport.provider_ttl,
            discovery_interval: discovery.discovery_interval,
            discovery_timeout: discovery.discovery_timeout,
            max_peers_per_round: discovery.max_peers_per_round,
            worker_status_capacity: crate::pubsub::worker_status::DEFAULT_HISTORY_CAPACITY,
        }
    }
}

impl NodeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.listen_addr.iter().any(|p| matches!(p, Protocol::Tcp(_))) {
            return Err(ConfigError::InvalidAddress(format!(
                "listen address {} is not a TCP address",
                self.listen_addr
            )));
        }
        if let Some(target) = &self.heartbeat_target {
            if peer_id_from_addr(target).is_none() {
                return Err(ConfigError::InvalidAddress(format!(
                    "heartbeat target {} has no /p2p/ peer id",
                    target
                )));
            }
        }

        let intervals = [
            ("heartbeat_interval", self.heartbeat_interval),
            ("fanout_interval", self.fanout_interval),
            ("request_timeout", self.request_timeout),
            ("listen_timeout", self.listen_timeout),
            ("bootstrap_timeout", self.bootstrap_timeout),
            ("announce_interval", self.announce_interval),
            ("provider_ttl", self.provider_ttl),
            ("discovery_interval", self.discovery_interval),
            ("discovery_timeout", self.discovery_timeout),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, d)| d.is_zero()) {
            return Err(ConfigError::InvalidInterval(format!("{} must be non-zero", name)));
        }
        if self.announce_interval >= self.provider_ttl {
            return Err(ConfigError::InvalidInterval(format!(
                "announce_interval ({:?}) must be shorter than provider_ttl ({:?})",
                self.announce_interval, self.provider_ttl
            )));
        }
        Ok(())
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            listen_addr: self.listen_addr.clone(),
            limits: self.limits,
            heartbeat_interval: self.heartbeat_interval,
            request_timeout: self.request_timeout,
            idle_timeout: self.idle_timeout,
            discovery_timeout: self.discovery_timeout,
            provider_ttl: self.provider_ttl,
            listen_timeout: self.listen_timeout,
        }
    }

    pub fn discovery_config(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            bootstrap_peers: self.bootstrap_peers.clone(),
            topic: self.discovery_topic.clone(),
            bootstrap_timeout: self.bootstrap_timeout,
            announce_interval: self.announce_interval,
            discovery_interval: self.discovery_interval,
            discovery_timeout: self.discovery_timeout,
            max_peers_per_round: self.max_peers_per_round,
        }
    }
}

/// Optional wiring applied when the node starts
pub struct NodeBuilder {
    config: NodeConfig,
    handlers: HandlerRegistry,
    worker_status_output: Option<mpsc::Sender<Vec<u8>>>,
    heartbeat_output: Option<mpsc::Sender<HeartbeatReport>>,
    subscriptions: Vec<(String, Arc<dyn SubscriptionHandler>)>,
}

impl NodeBuilder {
    pub fn new(config: NodeConfig) -> Self {
        Self {
            config,
            handlers: HandlerRegistry::with_defaults(),
            worker_status_output: None,
            heartbeat_output: None,
            subscriptions: Vec::new(),
        }
    }

    /// Replace the handler for one stream protocol id
    pub fn with_stream_handler(mut self, protocol: StreamProtocol, handler: Arc<dyn StreamHandler>) -> Self {
        self.handlers.register(protocol, handler);
        self
    }

    /// Aggregate worker status reports and emit each one on `output`
    pub fn with_worker_status(mut self, output: mpsc::Sender<Vec<u8>>) -> Self {
        self.worker_status_output = Some(output);
        self
    }

    /// Also deliver heartbeat reports for the target peer on `output`
    pub fn with_heartbeat_reports(mut self, output: mpsc::Sender<HeartbeatReport>) -> Self {
        self.heartbeat_output = Some(output);
        self
    }

    pub fn with_subscription(mut self, topic: impl Into<String>, handler: Arc<dyn SubscriptionHandler>) -> Self {
        self.subscriptions.push((topic.into(), handler));
        self
    }

    pub async fn start(self) -> Result<OracleNode, NodeError> {
        OracleNode::start_with(self).await
    }
}

/// A running oracle node
pub struct OracleNode {
    identity: NodeIdentity,
    address: Multiaddr,
    peers: PeerSet,
    handle: SwarmHandle,
    directory: Directory,
    bootstrap_report: BootstrapReport,
    worker_status: Option<Arc<WorkerStatusHandler>>,
    shutdown: CancellationToken,
    swarm_task: TaskTracker,
    background: Vec<JoinHandle<()>>,
}

impl OracleNode {
    pub async fn start(config: NodeConfig) -> Result<Self, NodeError> {
        NodeBuilder::new(config).start().await
    }

    async fn start_with(builder: NodeBuilder) -> Result<Self, NodeError> {
        let NodeBuilder {
            config,
            handlers,
            worker_status_output,
            heartbeat_output,
            subscriptions,
        } = builder;
        config.validate()?;

        let identity = load_or_create_identity(&config.key_path)?;
        let shutdown = CancellationToken::new();
        let swarm_task = TaskTracker::new();
        let peers = PeerSet::new();

        let handle = start_swarm(
            &identity,
            config.transport_config(),
            handlers,
            peers.clone(),
            &swarm_task,
            shutdown.clone(),
        )
        .await?;
        let address = own_address(&handle).await?;
        tracing::info!("libp2p host address: {}", address);

        // From here on a failure must not leave the swarm task behind
        let mut background = Vec::new();
        let wired = Self::wire_services(
            &config,
            &handle,
            &peers,
            &address,
            worker_status_output,
            heartbeat_output,
            subscriptions,
            &shutdown,
            &mut background,
        )
        .await;

        let (directory, bootstrap_report, worker_status) = match wired {
            Ok(wired) => wired,
            Err(e) => {
                shutdown.cancel();
                for task in background {
                    let _ = task.await;
                }
                swarm_task.close();
                swarm_task.wait().await;
                return Err(e);
            }
        };

        Ok(Self {
            identity,
            address,
            peers,
            handle,
            directory,
            bootstrap_report,
            worker_status,
            shutdown,
            swarm_task,
            background,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn wire_services(
        config: &NodeConfig,
        handle: &SwarmHandle,
        peers: &PeerSet,
        address: &Multiaddr,
        worker_status_output: Option<mpsc::Sender<Vec<u8>>>,
        heartbeat_output: Option<mpsc::Sender<HeartbeatReport>>,
        subscriptions: Vec<(String, Arc<dyn SubscriptionHandler>)>,
        shutdown: &CancellationToken,
        background: &mut Vec<JoinHandle<()>>,
    ) -> Result<(Directory, BootstrapReport, Option<Arc<WorkerStatusHandler>>), NodeError> {
        if let Some(target) = &config.heartbeat_target {
            let dial_timeout = config.bootstrap_timeout;
            let peer = tokio::time::timeout(dial_timeout, handle.dial(target.clone()))
                .await
                .map_err(|_| {
                    TransportError::Dial(format!(
                        "heartbeat target {} not reachable within {:?}",
                        target, dial_timeout
                    ))
                })??;
            tracing::info!("Connected to heartbeat target {}", target);

            let (reports_tx, reports_rx) = mpsc::channel(16);
            handle.watch_pings(peer, reports_tx.clone()).await?;
            background.push(spawn_ping_reporter(reports_rx, heartbeat_output, shutdown.clone()));
            background.push(spawn_target_redial(
                handle.clone(),
                peers.clone(),
                HeartbeatTarget {
                    peer,
                    addr: target.clone(),
                },
                config.heartbeat_interval,
                dial_timeout,
                reports_tx,
                shutdown.clone(),
            ));
        }

        let worker_status = match worker_status_output {
            Some(output) => {
                let handler = Arc::new(WorkerStatusHandler::new(config.worker_status_capacity, output));
                let messages = handle.subscribe(WORKER_STATUS_TOPIC, SUBSCRIPTION_BUFFER).await?;
                background.push(spawn_subscription(messages, handler.clone(), shutdown.clone()));
                Some(handler)
            }
            None => None,
        };
        for (topic, handler) in subscriptions {
            let messages = handle.subscribe(&topic, SUBSCRIPTION_BUFFER).await?;
            background.push(spawn_subscription(messages, handler, shutdown.clone()));
        }

        let (directory, report) = Directory::bootstrap(handle.clone(), config.discovery_config()).await?;
        if let Err(e) = directory.announce().await {
            tracing::warn!("Initial announce failed: {}", e);
        }
        background.push(directory.spawn_maintenance(shutdown.clone()));

        if config.enable_fanout {
            background.push(spawn_random_fanout(
                peers.clone(),
                Arc::new(handle.clone()),
                greeting(address),
                config.fanout_interval,
                shutdown.clone(),
            ));
        }

        Ok((directory, report, worker_status))
    }

    pub fn peer_id(&self) -> PeerId {
        self.identity.peer_id()
    }

    /// Our first listen address with its `/p2p/` component
    pub fn address(&self) -> &Multiaddr {
        &self.address
    }

    /// Every current listen address, `/p2p/`-qualified
    pub async fn addresses(&self) -> Result<Vec<Multiaddr>, TransportError> {
        let peer = self.peer_id();
        Ok(self
            .handle
            .listen_addrs()
            .await?
            .into_iter()
            .map(|addr| with_p2p(addr, peer))
            .collect())
    }

    pub fn peers(&self) -> &PeerSet {
        &self.peers
    }

    pub fn handle(&self) -> &SwarmHandle {
        &self.handle
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn bootstrap_report(&self) -> &BootstrapReport {
        &self.bootstrap_report
    }

    pub fn worker_status(&self) -> Option<&Arc<WorkerStatusHandler>> {
        self.worker_status.as_ref()
    }

    /// Token cancelled when the node shuts down
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Dial a `/p2p/` address and wait until the connection is up
    pub async fn connect(&self, addr: Multiaddr) -> Result<PeerId, TransportError> {
        self.handle.dial(addr).await
    }

    pub async fn send_line(
        &self,
        peer: PeerId,
        protocol: StreamProtocol,
        line: impl Into<String>,
    ) -> Result<(), StreamProtocolError> {
        self.handle.send_line(peer, protocol, line.into()).await
    }

    pub async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<(), PubSubError> {
        self.handle.publish(topic, data).await
    }

    pub fn webhook_bridge(&self, auth: Arc<dyn Authenticator>) -> WebhookBridge {
        WebhookBridge::new(auth, self.peers.clone(), Arc::new(self.handle.clone()))
    }

    /// Stop timers, subscriptions and the swarm, closing all listeners
    pub async fn shutdown(self) {
        tracing::info!("Shutting down node {}", self.peer_id());
        self.shutdown.cancel();
        for task in self.background {
            let _ = task.await;
        }
        self.swarm_task.close();
        self.swarm_task.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        NodeConfig::default().validate().unwrap();
    }

    #[test]
    fn test_announce_must_be_shorter_than_ttl() {
        let config = NodeConfig {
            announce_interval: Duration::from_secs(3600),
            provider_ttl: Duration::from_secs(3600),
            ..NodeConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidInterval(_))));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = NodeConfig {
            heartbeat_interval: Duration::ZERO,
            ..NodeConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("heartbeat_interval"));
    }

    #[test]
    fn test_listen_address_must_be_tcp() {
        let config = NodeConfig {
            listen_addr: "/ip4/127.0.0.1/udp/4001".parse().unwrap(),
            ..NodeConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidAddress(_))));
    }

    #[test]
    fn test_heartbeat_target_needs_peer_id() {
        let config = NodeConfig {
            heartbeat_target: Some("/ip4/127.0.0.1/tcp/4001".parse().unwrap()),
            ..NodeConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidAddress(_))));
    }

    #[test]
    fn test_sub_configs_carry_settings() {
        let config = NodeConfig {
            discovery_timeout: Duration::from_secs(7),
            max_peers_per_round: 3,
            ..NodeConfig::default()
        };
        assert_eq!(config.transport_config().discovery_timeout, Duration::from_secs(7));
        assert_eq!(config.discovery_config().max_peers_per_round, 3);
        assert_eq!(config.discovery_config().topic, DISCOVERY_TOPIC);
    }

    #[tokio::test]
    async fn test_corrupt_key_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("node.key");
        std::fs::write(&key_path, b"garbage").unwrap();

        let config = NodeConfig {
            key_path,
            listen_addr: "/ip4/127.0.0.1/tcp/0".parse().unwrap(),
            ..NodeConfig::default()
        };
        let result = OracleNode::start(config).await;
        assert!(matches!(result, Err(NodeError::Identity(_))));
    }

    #[tokio::test]
    async fn test_unreachable_heartbeat_target_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let target = format!("/ip4/127.0.0.1/tcp/1/p2p/{}", PeerId::random());
        let config = NodeConfig {
            key_path: dir.path().join("node.key"),
            listen_addr: "/ip4/127.0.0.1/tcp/0".parse().unwrap(),
            heartbeat_target: Some(target.parse().unwrap()),
            ..NodeConfig::default()
        };
        let result = OracleNode::start(config).await;
        assert!(matches!(result, Err(NodeError::Transport(_))));
    }

    #[tokio::test]
    async fn test_silent_heartbeat_target_gives_up_after_dial_timeout() {
        let dir = tempfile::tempdir().unwrap();
        // TEST-NET-1, never answers
        let target = format!("/ip4/192.0.2.1/tcp/4001/p2p/{}", PeerId::random());
        let config = NodeConfig {
            key_path: dir.path().join("node.key"),
            listen_addr: "/ip4/127.0.0.1/tcp/0".parse().unwrap(),
            heartbeat_target: Some(target.parse().unwrap()),
            bootstrap_timeout: Duration::from_secs(1),
            ..NodeConfig::default()
        };

        let result = tokio::time::timeout(Duration::from_secs(10), OracleNode::start(config))
            .await
            .expect("startup must not hang on a silent target");
        assert!(matches!(result, Err(NodeError::Transport(_))));
    }
}
