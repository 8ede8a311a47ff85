// Oracle Node: peer-to-peer oracle overlay
//
// A node owns one long-term identity, listens on an encrypted TCP transport,
// finds other nodes through the DHT and exchanges single-line messages with
// them. An authenticated webhook can push a line to a random connected peer.

pub mod bridge;
pub mod heartbeat;
pub mod identity;
pub mod node;
pub mod protocol;
pub mod pubsub;
pub mod transport;

use thiserror::Error;

pub use bridge::{Authenticator, RelayError, StaticTokenAuthenticator, WebhookBridge, WebhookReply};
pub use heartbeat::{HeartbeatReport, HeartbeatTarget};
pub use identity::{load_or_create_identity, IdentityError, NodeIdentity};
pub use node::{NodeBuilder, NodeConfig, OracleNode};
pub use protocol::{
    greeting, protocol_with_version, HandlerRegistry, LineSender, StreamHandler,
    StreamProtocolError, DISCOVERY_TOPIC, MESSAGE_PROTOCOL, ORACLE_PROTOCOL, WORKER_STATUS_TOPIC,
};
pub use pubsub::{DecodeError, PubSubError, PubSubMessage, SubscriptionHandler, WorkerStatus};
pub use transport::{
    BootstrapReport, DiscoveryError, PeerRecord, PeerSet, ProtocolMessage, ResourceLimits,
    TransportError,
};

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("invalid interval: {0}")]
    InvalidInterval(String),
}

/// Errors that stop a node from starting
#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error(transparent)]
    PubSub(#[from] PubSubError),
}
