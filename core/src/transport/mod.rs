// Transport module: libp2p swarm and networking

pub mod behaviour;
pub mod codec;
pub mod discovery;
pub mod limits;
pub mod peers;
pub mod swarm;

use libp2p::Multiaddr;
use std::time::Duration;
use thiserror::Error;

pub use behaviour::OracleBehaviour;
pub use codec::{Ack, LineCodec, ProtocolMessage, ACK, MAX_LINE_LEN};
pub use discovery::{BootstrapReport, DiscoveryConfig, DiscoveryError, Directory, PeerStream};
pub use limits::{HostCapacity, ResourceLimits};
pub use peers::{PeerRecord, PeerSet};
pub use swarm::{peer_id_from_addr, start_swarm, SwarmCommand, SwarmHandle};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to listen on {addr}: {reason}")]
    Bind { addr: Multiaddr, reason: String },
    #[error("security transport init failed: {0}")]
    SecurityInit(String),
    #[error("network behaviour init failed: {0}")]
    Behaviour(String),
    #[error("no listen address reported within {0:?}")]
    ListenTimeout(Duration),
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("dial failed: {0}")]
    Dial(String),
    #[error("swarm task not running")]
    NotRunning,
}

/// Settings for the libp2p host
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub listen_addr: Multiaddr,
    pub limits: ResourceLimits,
    /// Ping interval
    pub heartbeat_interval: Duration,
    /// Per-stream deadline for the line/ACK exchange and ping replies
    pub request_timeout: Duration,
    pub idle_timeout: Duration,
    /// Upper bound on a single DHT query
    pub discovery_timeout: Duration,
    /// Lifetime of provider records we publish
    pub provider_ttl: Duration,
    /// How long to wait for the first listen address after binding
    pub listen_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            listen_addr: Multiaddr::empty()
                .with(libp2p::multiaddr::Protocol::Ip4(std::net::Ipv4Addr::UNSPECIFIED))
                .with(libp2p::multiaddr::Protocol::Tcp(0)),
            limits: ResourceLimits::default(),
            heartbeat_interval: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(300),
            discovery_timeout: Duration::from_secs(30),
            provider_ttl: Duration::from_secs(24 * 60 * 60),
            listen_timeout: Duration::from_secs(10),
        }
    }
}
