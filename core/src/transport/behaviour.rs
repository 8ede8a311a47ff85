// Combined NetworkBehaviour for the oracle node
//
// This combines all the libp2p protocols we need:
// - connection_limits / memory_connection_limits: hard resource ceilings
// - oracle / message: line + ACK stream protocols (greetings, webhook relay)
// - kademlia: DHT for provider-based peer discovery
// - gossipsub: pub/sub for worker status reports
// - identify: exchange listen addresses so the DHT can route
// - ping: round-trip heartbeat

use super::codec::LineCodec;
use super::{TransportConfig, TransportError};
use crate::protocol::{IDENTIFY_PROTOCOL, MESSAGE_PROTOCOL, ORACLE_PROTOCOL};
use libp2p::{
    connection_limits, gossipsub, identify, kad, memory_connection_limits, ping,
    request_response::{self, ProtocolSupport},
    swarm::NetworkBehaviour,
    StreamProtocol,
};
use std::time::Duration;

/// The oracle network behaviour combining all protocols.
#[derive(NetworkBehaviour)]
pub struct OracleBehaviour {
    /// Connection count ceilings
    pub limits: connection_limits::Behaviour,
    /// Deny new connections under memory pressure
    pub memory: memory_connection_limits::Behaviour,
    /// Greetings and direct messages
    pub oracle: request_response::Behaviour<LineCodec>,
    /// Webhook-relayed messages
    pub message: request_response::Behaviour<LineCodec>,
    /// DHT for WAN peer discovery
    pub kademlia: kad::Behaviour<kad::store::MemoryStore>,
    /// Pub/sub for worker status
    pub gossipsub: gossipsub::Behaviour,
    /// Peer identification
    pub identify: identify::Behaviour,
    /// Heartbeat
    pub ping: ping::Behaviour,
}

impl OracleBehaviour {
    /// Create a new behaviour with the given keypair
    pub fn new(
        keypair: &libp2p::identity::Keypair,
        config: &TransportConfig,
    ) -> Result<Self, TransportError> {
        let peer_id = keypair.public().to_peer_id();

        let limits = connection_limits::Behaviour::new(config.limits.connection_limits());
        let memory = memory_connection_limits::Behaviour::with_max_percentage(
            config.limits.max_memory_fraction,
        );

        let oracle = line_protocol(ORACLE_PROTOCOL, config);
        let message = line_protocol(MESSAGE_PROTOCOL, config);

        // Provider records are refreshed by the directory, not by kad itself
        #[allow(deprecated)]
        let mut kad_config = kad::Config::default();
        kad_config
            .set_query_timeout(config.discovery_timeout)
            .set_provider_record_ttl(Some(config.provider_ttl))
            .set_provider_publication_interval(None);
        let kademlia =
            kad::Behaviour::with_config(peer_id, kad::store::MemoryStore::new(peer_id), kad_config);

        let gossipsub_config = gossipsub::ConfigBuilder::default()
            .heartbeat_interval(Duration::from_secs(10))
            .validation_mode(gossipsub::ValidationMode::Strict)
            .build()
            .map_err(|e| TransportError::Behaviour(format!("gossipsub config: {}", e)))?;

        let gossipsub = gossipsub::Behaviour::new(
            gossipsub::MessageAuthenticity::Signed(keypair.clone()),
            gossipsub_config,
        )
        .map_err(|e| TransportError::Behaviour(format!("gossipsub: {}", e)))?;

        let identify = identify::Behaviour::new(
            identify::Config::new(IDENTIFY_PROTOCOL.to_string(), keypair.public())
                .with_push_listen_addr_updates(true)
                .with_interval(Duration::from_secs(60)),
        );

        let ping = ping::Behaviour::new(
            ping::Config::new()
                .with_interval(config.heartbeat_interval)
                .with_timeout(config.request_timeout),
        );

        Ok(Self {
            limits,
            memory,
            oracle,
            message,
            kademlia,
            gossipsub,
            identify,
            ping,
        })
    }

    /// The request-response behaviour serving `protocol`, if it is one of ours
    pub(crate) fn line_behaviour_mut(
        &mut self,
        protocol: &StreamProtocol,
    ) -> Option<&mut request_response::Behaviour<LineCodec>> {
        if *protocol == ORACLE_PROTOCOL {
            Some(&mut self.oracle)
        } else if *protocol == MESSAGE_PROTOCOL {
            Some(&mut self.message)
        } else {
            None
        }
    }
}

fn line_protocol(
    protocol: StreamProtocol,
    config: &TransportConfig,
) -> request_response::Behaviour<LineCodec> {
    request_response::Behaviour::new(
        [(protocol, ProtocolSupport::Full)],
        request_response::Config::default()
            .with_request_timeout(config.request_timeout)
            .with_max_concurrent_streams(config.limits.max_concurrent_streams),
    )
}
