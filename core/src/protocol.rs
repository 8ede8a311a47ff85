//! Stream protocol ids, topics and inbound handler dispatch.
//!
//! Every inbound stream carries exactly one line. The protocol id the stream
//! was opened under selects the [`StreamHandler`] that sees it; the
//! acknowledgement is written by the transport once the handler returns.

use crate::transport::codec::ProtocolMessage;
use crate::transport::TransportError;
use async_trait::async_trait;
use libp2p::{Multiaddr, PeerId, StreamProtocol};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

pub const PROTOCOL_PREFIX: &str = "/oracle";

/// Greetings and direct node-to-node messages
pub const ORACLE_PROTOCOL: StreamProtocol = StreamProtocol::new("/oracle/1.0.0");

/// Messages relayed from the webhook bridge
pub const MESSAGE_PROTOCOL: StreamProtocol = StreamProtocol::new("/oracle/message/1.0.0");

pub const IDENTIFY_PROTOCOL: &str = "/oracle/id/1.0.0";

/// DHT topic under which nodes announce themselves
pub const DISCOVERY_TOPIC: &str = "/oracle/1.0.0";

/// Pub/sub topic carrying worker status reports
pub const WORKER_STATUS_TOPIC: &str = "/oracle/worker-status/1.0.0";

/// Build a versioned protocol id or topic, e.g. `/oracle/nodeData/1.0.0-test`.
pub fn protocol_with_version(name: &str, version: &str, environment: Option<&str>) -> String {
    match environment.filter(|env| !env.is_empty()) {
        Some(env) => format!("{}/{}/{}-{}", PROTOCOL_PREFIX, name, version, env),
        None => format!("{}/{}/{}", PROTOCOL_PREFIX, name, version),
    }
}

/// The line a node sends to announce its reachable address to a peer
pub fn greeting(address: &Multiaddr) -> String {
    format!("Hello from {}", address)
}

#[derive(Debug, Error)]
pub enum StreamProtocolError {
    #[error("malformed message from {peer}: {reason}")]
    Malformed { peer: PeerId, reason: String },
    #[error("failed to send to {peer} over {protocol}: {reason}")]
    Outbound {
        peer: PeerId,
        protocol: StreamProtocol,
        reason: String,
    },
    #[error("unknown stream protocol {0}")]
    UnknownProtocol(StreamProtocol),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Receives every well-formed line arriving under one protocol id
pub trait StreamHandler: Send + Sync {
    fn handle(&self, peer: &PeerId, protocol: &StreamProtocol, message: &ProtocolMessage);
}

/// Default handler: log the line and let the transport acknowledge it
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl StreamHandler for LoggingHandler {
    fn handle(&self, peer: &PeerId, protocol: &StreamProtocol, message: &ProtocolMessage) {
        tracing::info!("Message from '{}' on {}: {}", peer, protocol, message.line());
    }
}

/// Protocol id → handler map consulted by the swarm task for each inbound stream
#[derive(Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<StreamProtocol, Arc<dyn StreamHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registry with the logging handler on both oracle protocols
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(ORACLE_PROTOCOL, Arc::new(LoggingHandler));
        registry.register(MESSAGE_PROTOCOL, Arc::new(LoggingHandler));
        registry
    }

    /// Register a handler, replacing any previous one for the same id
    pub fn register(&mut self, protocol: StreamProtocol, handler: Arc<dyn StreamHandler>) {
        self.handlers.insert(protocol, handler);
    }

    pub fn get(&self, protocol: &StreamProtocol) -> Option<&Arc<dyn StreamHandler>> {
        self.handlers.get(protocol)
    }

    /// Hand a message to the handler registered for `protocol`.
    /// Returns `false` if no handler is registered.
    pub fn dispatch(&self, peer: &PeerId, protocol: &StreamProtocol, message: &ProtocolMessage) -> bool {
        match self.get(protocol) {
            Some(handler) => {
                handler.handle(peer, protocol, message);
                true
            }
            None => false,
        }
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Opens a stream to a peer and writes one line on it.
///
/// Implemented by the swarm handle; tests substitute a double to observe
/// (or forbid) outbound streams.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LineSender: Send + Sync {
    async fn send_line(
        &self,
        peer: PeerId,
        protocol: StreamProtocol,
        line: String,
    ) -> Result<(), StreamProtocolError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(PeerId, String)>>,
    }

    impl StreamHandler for Recorder {
        fn handle(&self, peer: &PeerId, _: &StreamProtocol, message: &ProtocolMessage) {
            self.seen.lock().push((*peer, message.line().to_string()));
        }
    }

    #[test]
    fn test_protocol_with_version() {
        assert_eq!(
            protocol_with_version("nodeData", "1.0.0", None),
            "/oracle/nodeData/1.0.0"
        );
        assert_eq!(
            protocol_with_version("nodeData", "1.0.0", Some("test")),
            "/oracle/nodeData/1.0.0-test"
        );
        assert_eq!(
            protocol_with_version("nodeData", "1.0.0", Some("")),
            "/oracle/nodeData/1.0.0"
        );
    }

    #[test]
    fn test_greeting_carries_address() {
        let addr: Multiaddr = "/ip4/127.0.0.1/tcp/4001".parse().unwrap();
        assert_eq!(greeting(&addr), "Hello from /ip4/127.0.0.1/tcp/4001");
    }

    #[test]
    fn test_dispatch_by_protocol_id() {
        let oracle = Arc::new(Recorder::default());
        let relay = Arc::new(Recorder::default());
        let mut registry = HandlerRegistry::new();
        registry.register(ORACLE_PROTOCOL, oracle.clone());
        registry.register(MESSAGE_PROTOCOL, relay.clone());

        let peer = PeerId::random();
        assert!(registry.dispatch(&peer, &ORACLE_PROTOCOL, &ProtocolMessage::new("hello")));
        assert!(registry.dispatch(&peer, &MESSAGE_PROTOCOL, &ProtocolMessage::new("relayed")));

        assert_eq!(oracle.seen.lock().as_slice(), &[(peer, "hello".to_string())]);
        assert_eq!(relay.seen.lock().as_slice(), &[(peer, "relayed".to_string())]);
    }

    #[test]
    fn test_dispatch_unknown_protocol() {
        let registry = HandlerRegistry::new();
        let unknown = StreamProtocol::new("/other/1.0.0");
        assert!(registry.get(&unknown).is_none());
        assert!(!registry.dispatch(&PeerId::random(), &unknown, &ProtocolMessage::new("x")));
    }

    #[test]
    fn test_register_replaces_handler() {
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());
        let mut registry = HandlerRegistry::with_defaults();
        assert!(registry.get(&ORACLE_PROTOCOL).is_some());
        assert!(registry.get(&MESSAGE_PROTOCOL).is_some());
        registry.register(ORACLE_PROTOCOL, first.clone());
        registry.register(ORACLE_PROTOCOL, second.clone());

        registry.dispatch(&PeerId::random(), &ORACLE_PROTOCOL, &ProtocolMessage::new("x"));
        assert!(first.seen.lock().is_empty());
        assert_eq!(second.seen.lock().len(), 1);
    }
}
