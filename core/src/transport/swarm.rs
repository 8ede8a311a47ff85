// libp2p swarm setup: the actual running network node
//
// This creates and manages the libp2p Swarm with:
// - TCP transport (DNS resolution for bootstrap names)
// - Noise encryption, mandatory on every connection
// - Yamux multiplexing
// - All behaviours from behaviour.rs
//
// One task owns the swarm. Everything else talks to it through SwarmHandle.

use super::behaviour::{OracleBehaviour, OracleBehaviourEvent};
use super::codec::{Ack, ProtocolMessage};
use super::discovery::DiscoveryError;
use super::peers::{PeerRecord, PeerSet};
use super::{TransportConfig, TransportError};
use crate::heartbeat::HeartbeatReport;
use crate::identity::NodeIdentity;
use crate::protocol::{
    HandlerRegistry, LineSender, StreamProtocolError, MESSAGE_PROTOCOL, ORACLE_PROTOCOL,
};
use crate::pubsub::{PubSubError, PubSubMessage};
use async_trait::async_trait;
use futures::StreamExt;
use libp2p::{
    gossipsub, identify, kad,
    multiaddr::Protocol,
    ping,
    request_response::{self, OutboundRequestId},
    swarm::{dial_opts::DialOpts, SwarmEvent},
    Multiaddr, PeerId, StreamProtocol, Swarm,
};
use std::collections::{HashMap, HashSet};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Commands that can be sent to the swarm task
#[derive(Debug)]
pub enum SwarmCommand {
    /// Open a stream to a peer, write one line and wait for the ACK
    SendLine {
        peer: PeerId,
        protocol: StreamProtocol,
        line: String,
        reply: oneshot::Sender<Result<(), StreamProtocolError>>,
    },
    /// Dial a peer and resolve once the connection is established
    Dial {
        peer: PeerId,
        addr: Multiaddr,
        reply: oneshot::Sender<Result<(), TransportError>>,
    },
    /// Start a DHT bootstrap query
    KadBootstrap,
    /// Publish a provider record for a topic
    StartProviding {
        topic: String,
        reply: oneshot::Sender<Result<(), DiscoveryError>>,
    },
    /// Look up providers of a topic, streaming them into `results`
    FindProviders {
        topic: String,
        limit: usize,
        results: mpsc::Sender<PeerRecord>,
    },
    /// Join a gossipsub topic
    Subscribe {
        topic: String,
        buffer: usize,
        reply: oneshot::Sender<Result<mpsc::Receiver<PubSubMessage>, PubSubError>>,
    },
    /// Publish to a gossipsub topic
    Publish {
        topic: String,
        data: Vec<u8>,
        reply: oneshot::Sender<Result<(), PubSubError>>,
    },
    /// Report ping round trips for one peer
    WatchPings {
        peer: PeerId,
        reports: mpsc::Sender<HeartbeatReport>,
    },
    /// Get the addresses we are listening on
    ListenAddrs { reply: oneshot::Sender<Vec<Multiaddr>> },
}

/// Handle to communicate with the running swarm task
#[derive(Clone)]
pub struct SwarmHandle {
    command_tx: mpsc::Sender<SwarmCommand>,
    local_peer_id: PeerId,
}

impl SwarmHandle {
    pub fn local_peer_id(&self) -> PeerId {
        self.local_peer_id
    }

    /// A handle with no swarm behind it; commands land on the returned receiver
    #[cfg(test)]
    pub(crate) fn detached(local_peer_id: PeerId) -> (Self, mpsc::Receiver<SwarmCommand>) {
        let (command_tx, command_rx) = mpsc::channel(16);
        (
            Self {
                command_tx,
                local_peer_id,
            },
            command_rx,
        )
    }

    async fn call<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> SwarmCommand,
    ) -> Result<T, TransportError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(command(reply_tx))
            .await
            .map_err(|_| TransportError::NotRunning)?;
        reply_rx.await.map_err(|_| TransportError::NotRunning)
    }

    async fn notify(&self, command: SwarmCommand) -> Result<(), TransportError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| TransportError::NotRunning)
    }

    /// Dial a `/p2p/`-qualified address and wait for the connection.
    /// Returns the remote peer id.
    pub async fn dial(&self, addr: Multiaddr) -> Result<PeerId, TransportError> {
        let peer = peer_id_from_addr(&addr).ok_or_else(|| {
            TransportError::InvalidAddress(format!("{} has no /p2p/ peer id", addr))
        })?;
        if peer == self.local_peer_id {
            return Err(TransportError::InvalidAddress(format!(
                "{} names this node",
                addr
            )));
        }
        self.call(|reply| SwarmCommand::Dial { peer, addr, reply })
            .await??;
        Ok(peer)
    }

    pub async fn kad_bootstrap(&self) -> Result<(), TransportError> {
        self.notify(SwarmCommand::KadBootstrap).await
    }

    pub async fn start_providing(&self, topic: &str) -> Result<(), DiscoveryError> {
        let topic = topic.to_string();
        self.call(|reply| SwarmCommand::StartProviding { topic, reply })
            .await?
    }

    /// Start a provider lookup. The receiver yields at most `limit` distinct
    /// peers and closes when the query finishes.
    pub async fn find_providers(
        &self,
        topic: &str,
        limit: usize,
    ) -> Result<mpsc::Receiver<PeerRecord>, TransportError> {
        let (results, rx) = mpsc::channel(limit.max(1));
        self.notify(SwarmCommand::FindProviders {
            topic: topic.to_string(),
            limit,
            results,
        })
        .await?;
        Ok(rx)
    }

    /// Join a pub/sub topic. Messages beyond `buffer` unread ones are dropped.
    pub async fn subscribe(
        &self,
        topic: &str,
        buffer: usize,
    ) -> Result<mpsc::Receiver<PubSubMessage>, PubSubError> {
        let topic = topic.to_string();
        self.call(|reply| SwarmCommand::Subscribe {
            topic,
            buffer,
            reply,
        })
        .await?
    }

    pub async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<(), PubSubError> {
        let topic = topic.to_string();
        self.call(|reply| SwarmCommand::Publish { topic, data, reply })
            .await?
    }

    pub async fn watch_pings(
        &self,
        peer: PeerId,
        reports: mpsc::Sender<HeartbeatReport>,
    ) -> Result<(), TransportError> {
        self.notify(SwarmCommand::WatchPings { peer, reports }).await
    }

    pub async fn listen_addrs(&self) -> Result<Vec<Multiaddr>, TransportError> {
        self.call(|reply| SwarmCommand::ListenAddrs { reply }).await
    }
}

#[async_trait]
impl LineSender for SwarmHandle {
    async fn send_line(
        &self,
        peer: PeerId,
        protocol: StreamProtocol,
        line: String,
    ) -> Result<(), StreamProtocolError> {
        self.call(|reply| SwarmCommand::SendLine {
            peer,
            protocol,
            line,
            reply,
        })
        .await?
    }
}

/// The peer id carried by a `/p2p/` component, if any
pub fn peer_id_from_addr(addr: &Multiaddr) -> Option<PeerId> {
    addr.iter().find_map(|protocol| match protocol {
        Protocol::P2p(peer_id) => Some(peer_id),
        _ => None,
    })
}

/// Build and start the libp2p swarm, returning a handle for communication.
///
/// Binds `config.listen_addr` and waits for the first listen address before
/// returning, so a successful return means the node is reachable. The event
/// loop runs on `tasks` until `shutdown` is cancelled.
pub async fn start_swarm(
    identity: &NodeIdentity,
    config: TransportConfig,
    handlers: HandlerRegistry,
    peers: PeerSet,
    tasks: &TaskTracker,
    shutdown: CancellationToken,
) -> Result<SwarmHandle, TransportError> {
    let behaviour = OracleBehaviour::new(identity.keypair(), &config)?;
    let idle_timeout = config.idle_timeout;

    let mut swarm = libp2p::SwarmBuilder::with_existing_identity(identity.keypair().clone())
        .with_tokio()
        .with_tcp(
            libp2p::tcp::Config::default().nodelay(true),
            libp2p::noise::Config::new,
            libp2p::yamux::Config::default,
        )
        .map_err(|e| TransportError::SecurityInit(e.to_string()))?
        .with_dns()
        .map_err(|e| TransportError::Behaviour(format!("dns: {}", e)))?
        .with_behaviour(move |_| behaviour)
        .map_err(|e| TransportError::Behaviour(e.to_string()))?
        .with_swarm_config(|cfg| cfg.with_idle_connection_timeout(idle_timeout))
        .build();

    swarm
        .listen_on(config.listen_addr.clone())
        .map_err(|e| TransportError::Bind {
            addr: config.listen_addr.clone(),
            reason: e.to_string(),
        })?;

    // Set Kademlia to server mode (so we can be found)
    swarm
        .behaviour_mut()
        .kademlia
        .set_mode(Some(kad::Mode::Server));

    let first = tokio::time::timeout(config.listen_timeout, async {
        loop {
            match swarm.select_next_some().await {
                SwarmEvent::NewListenAddr { address, .. } => break Ok(address),
                SwarmEvent::ListenerClosed { reason, .. } => {
                    break Err(TransportError::Bind {
                        addr: config.listen_addr.clone(),
                        reason: match reason {
                            Ok(()) => "listener closed".to_string(),
                            Err(e) => e.to_string(),
                        },
                    })
                }
                SwarmEvent::ListenerError { error, .. } => {
                    break Err(TransportError::Bind {
                        addr: config.listen_addr.clone(),
                        reason: error.to_string(),
                    })
                }
                _ => {}
            }
        }
    })
    .await
    .map_err(|_| TransportError::ListenTimeout(config.listen_timeout))??;

    tracing::info!("Listening on {}", first);

    let (command_tx, command_rx) = mpsc::channel::<SwarmCommand>(256);
    let handle = SwarmHandle {
        command_tx,
        local_peer_id: identity.peer_id(),
    };

    let event_loop = EventLoop {
        swarm,
        commands: command_rx,
        handlers,
        peers,
        shutdown,
        pending_sends: HashMap::new(),
        pending_dials: HashMap::new(),
        pending_announces: HashMap::new(),
        provider_queries: HashMap::new(),
        subscriptions: HashMap::new(),
        ping_watch: None,
    };
    tasks.spawn(event_loop.run());

    Ok(handle)
}

struct ProviderQuery {
    results: mpsc::Sender<PeerRecord>,
    remaining: usize,
    seen: HashSet<PeerId>,
}

struct EventLoop {
    swarm: Swarm<OracleBehaviour>,
    commands: mpsc::Receiver<SwarmCommand>,
    handlers: HandlerRegistry,
    peers: PeerSet,
    shutdown: CancellationToken,
    pending_sends:
        HashMap<(StreamProtocol, OutboundRequestId), oneshot::Sender<Result<(), StreamProtocolError>>>,
    pending_dials: HashMap<PeerId, Vec<oneshot::Sender<Result<(), TransportError>>>>,
    pending_announces: HashMap<kad::QueryId, oneshot::Sender<Result<(), DiscoveryError>>>,
    provider_queries: HashMap<kad::QueryId, ProviderQuery>,
    subscriptions: HashMap<gossipsub::TopicHash, mpsc::Sender<PubSubMessage>>,
    ping_watch: Option<(PeerId, mpsc::Sender<HeartbeatReport>)>,
}

impl EventLoop {
    async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("Swarm shutting down");
                    break;
                }
                event = self.swarm.select_next_some() => self.on_swarm_event(event),
                command = self.commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => break,
                },
            }
        }
    }

    fn on_swarm_event(&mut self, event: SwarmEvent<OracleBehaviourEvent>) {
        match event {
            SwarmEvent::Behaviour(OracleBehaviourEvent::Oracle(event)) => {
                self.on_line_event(ORACLE_PROTOCOL, event)
            }
            SwarmEvent::Behaviour(OracleBehaviourEvent::Message(event)) => {
                self.on_line_event(MESSAGE_PROTOCOL, event)
            }
            SwarmEvent::Behaviour(OracleBehaviourEvent::Kademlia(event)) => self.on_kad_event(event),
            SwarmEvent::Behaviour(OracleBehaviourEvent::Gossipsub(gossipsub::Event::Message {
                propagation_source,
                message,
                ..
            })) => self.on_gossip_message(propagation_source, message),
            SwarmEvent::Behaviour(OracleBehaviourEvent::Identify(identify::Event::Received {
                peer_id,
                info,
                ..
            })) => {
                tracing::debug!(
                    "Identified peer {} with {} addresses",
                    peer_id,
                    info.listen_addrs.len()
                );
                for addr in &info.listen_addrs {
                    self.swarm
                        .behaviour_mut()
                        .kademlia
                        .add_address(&peer_id, addr.clone());
                }
                self.peers.learn_addresses(&peer_id, info.listen_addrs);
            }
            SwarmEvent::Behaviour(OracleBehaviourEvent::Ping(event)) => self.on_ping(event),

            SwarmEvent::NewListenAddr { address, .. } => {
                tracing::info!("Listening on {}", address);
            }
            SwarmEvent::ExpiredListenAddr { address, .. } => {
                tracing::info!("Stopped listening on {}", address);
            }
            SwarmEvent::ListenerClosed {
                addresses, reason, ..
            } => match reason {
                Ok(()) => tracing::info!("Listener closed: {:?}", addresses),
                Err(e) => tracing::warn!("Listener closed on {:?}: {}", addresses, e),
            },
            SwarmEvent::ConnectionEstablished {
                peer_id, endpoint, ..
            } => {
                let remote = endpoint.get_remote_address().clone();
                tracing::info!("Connected to peer {} at {}", peer_id, remote);
                // Inbound remotes are ephemeral ports, not dialable
                if endpoint.is_dialer() {
                    self.peers.add(peer_id, [remote]);
                } else {
                    self.peers.add(peer_id, []);
                }
                for reply in self.pending_dials.remove(&peer_id).unwrap_or_default() {
                    let _ = reply.send(Ok(()));
                }
            }
            SwarmEvent::ConnectionClosed {
                peer_id,
                num_established,
                cause,
                ..
            } => {
                if num_established == 0 {
                    self.peers.remove(&peer_id);
                    match cause {
                        Some(cause) => tracing::info!("Disconnected from {}: {}", peer_id, cause),
                        None => tracing::info!("Disconnected from {}", peer_id),
                    }
                }
            }
            SwarmEvent::OutgoingConnectionError {
                peer_id: Some(peer_id),
                error,
                ..
            } => {
                tracing::warn!("Failed to connect to {}: {}", peer_id, error);
                if !self.swarm.is_connected(&peer_id) {
                    for reply in self.pending_dials.remove(&peer_id).unwrap_or_default() {
                        let _ = reply.send(Err(TransportError::Dial(error.to_string())));
                    }
                }
            }
            SwarmEvent::IncomingConnectionError {
                send_back_addr,
                error,
                ..
            } => {
                tracing::debug!("Rejected inbound connection from {}: {}", send_back_addr, error);
            }
            _ => {}
        }
    }

    fn on_line_event(
        &mut self,
        protocol: StreamProtocol,
        event: request_response::Event<ProtocolMessage, Ack>,
    ) {
        match event {
            request_response::Event::Message { peer, message, .. } => match message {
                request_response::Message::Request {
                    request, channel, ..
                } => {
                    if !self.handlers.dispatch(&peer, &protocol, &request) {
                        // Dropping the channel resets the stream without an ACK
                        tracing::warn!("No handler for {} (from {})", protocol, peer);
                        return;
                    }
                    if let Some(behaviour) = self.swarm.behaviour_mut().line_behaviour_mut(&protocol) {
                        if behaviour.send_response(channel, Ack).is_err() {
                            tracing::debug!("Stream from {} closed before ACK", peer);
                        }
                    }
                }
                request_response::Message::Response { request_id, .. } => {
                    if let Some(reply) = self.pending_sends.remove(&(protocol, request_id)) {
                        let _ = reply.send(Ok(()));
                    }
                }
            },
            request_response::Event::OutboundFailure {
                peer,
                request_id,
                error,
                ..
            } => {
                let failure = StreamProtocolError::Outbound {
                    peer,
                    protocol: protocol.clone(),
                    reason: error.to_string(),
                };
                tracing::warn!("{}", failure);
                if let Some(reply) = self.pending_sends.remove(&(protocol, request_id)) {
                    let _ = reply.send(Err(failure));
                }
            }
            request_response::Event::InboundFailure { peer, error, .. } => {
                let failure = StreamProtocolError::Malformed {
                    peer,
                    reason: error.to_string(),
                };
                tracing::warn!("{}", failure);
            }
            request_response::Event::ResponseSent { .. } => {}
        }
    }

    fn on_kad_event(&mut self, event: kad::Event) {
        match event {
            kad::Event::OutboundQueryProgressed {
                id, result, step, ..
            } => {
                match result {
                    kad::QueryResult::GetProviders(Ok(kad::GetProvidersOk::FoundProviders {
                        providers,
                        ..
                    })) => self.on_providers(id, providers),
                    kad::QueryResult::GetProviders(Ok(_)) => {}
                    kad::QueryResult::GetProviders(Err(e)) => {
                        tracing::debug!("Provider lookup ended: {}", e);
                    }
                    kad::QueryResult::StartProviding(result) => {
                        if let Some(reply) = self.pending_announces.remove(&id) {
                            let _ = reply.send(
                                result
                                    .map(|_| ())
                                    .map_err(|e| DiscoveryError::Announce(e.to_string())),
                            );
                        }
                    }
                    kad::QueryResult::Bootstrap(Ok(ok)) => {
                        tracing::debug!("DHT bootstrap step, {} buckets remaining", ok.num_remaining);
                    }
                    kad::QueryResult::Bootstrap(Err(e)) => {
                        tracing::debug!("DHT bootstrap failed: {}", e);
                    }
                    _ => {}
                }
                if step.last {
                    self.provider_queries.remove(&id);
                }
            }
            kad::Event::RoutingUpdated { peer, .. } => {
                tracing::debug!("DHT routing table updated with {}", peer);
            }
            _ => {}
        }
    }

    fn on_providers(&mut self, id: kad::QueryId, providers: HashSet<PeerId>) {
        let local = *self.swarm.local_peer_id();
        let Some(query) = self.provider_queries.get_mut(&id) else {
            return;
        };

        for provider in providers {
            if query.remaining == 0 {
                break;
            }
            if provider == local || !query.seen.insert(provider) {
                continue;
            }
            let record = self
                .peers
                .get(&provider)
                .unwrap_or_else(|| PeerRecord::new(provider));
            match query.results.try_send(record) {
                Ok(()) => query.remaining -= 1,
                // Receiver gone: nobody wants the rest of this round
                Err(mpsc::error::TrySendError::Closed(_)) => query.remaining = 0,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!("Discovery buffer full, dropping provider {}", provider);
                }
            }
        }

        if query.remaining == 0 {
            self.provider_queries.remove(&id);
            if let Some(mut running) = self.swarm.behaviour_mut().kademlia.query_mut(&id) {
                running.finish();
            }
        }
    }

    fn on_gossip_message(&mut self, propagation_source: PeerId, message: gossipsub::Message) {
        let Some(subscriber) = self.subscriptions.get(&message.topic) else {
            return;
        };
        let topic = message.topic.clone();
        let delivery = PubSubMessage {
            source: message.source,
            propagation_source,
            topic: topic.as_str().to_string(),
            data: message.data,
        };

        match subscriber.try_send(delivery) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Subscription to {} is lagging, dropping message", topic);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("Subscriber for {} went away, leaving topic", topic);
                self.subscriptions.remove(&topic);
                let _ = self
                    .swarm
                    .behaviour_mut()
                    .gossipsub
                    .unsubscribe(&gossipsub::IdentTopic::new(topic.as_str()));
            }
        }
    }

    fn on_ping(&mut self, event: ping::Event) {
        let Some((target, reports)) = &self.ping_watch else {
            return;
        };
        if event.peer != *target {
            return;
        }
        let report = HeartbeatReport {
            peer: event.peer,
            rtt: event.result.map_err(|e| e.to_string()),
        };
        if reports.try_send(report).is_err() {
            tracing::debug!("Heartbeat report for {} dropped", event.peer);
        }
    }

    fn on_command(&mut self, command: SwarmCommand) {
        match command {
            SwarmCommand::SendLine {
                peer,
                protocol,
                line,
                reply,
            } => match self.swarm.behaviour_mut().line_behaviour_mut(&protocol) {
                Some(behaviour) => {
                    let request_id = behaviour.send_request(&peer, ProtocolMessage::new(line));
                    self.pending_sends.insert((protocol, request_id), reply);
                }
                None => {
                    let _ = reply.send(Err(StreamProtocolError::UnknownProtocol(protocol)));
                }
            },

            SwarmCommand::Dial { peer, addr, reply } => {
                if self.swarm.is_connected(&peer) {
                    let _ = reply.send(Ok(()));
                    return;
                }
                // A second dial while one is in flight would be refused by the swarm
                if let Some(waiting) = self.pending_dials.get_mut(&peer) {
                    waiting.push(reply);
                    return;
                }
                self.swarm
                    .behaviour_mut()
                    .kademlia
                    .add_address(&peer, addr.clone());
                let opts = DialOpts::peer_id(peer).addresses(vec![addr]).build();
                match self.swarm.dial(opts) {
                    Ok(()) => self.pending_dials.entry(peer).or_default().push(reply),
                    Err(e) => {
                        let _ = reply.send(Err(TransportError::Dial(e.to_string())));
                    }
                }
            }

            SwarmCommand::KadBootstrap => {
                if let Err(e) = self.swarm.behaviour_mut().kademlia.bootstrap() {
                    tracing::debug!("DHT bootstrap skipped: {}", e);
                }
            }

            SwarmCommand::StartProviding { topic, reply } => {
                let key = kad::RecordKey::new(&topic);
                match self.swarm.behaviour_mut().kademlia.start_providing(key) {
                    Ok(id) => {
                        self.pending_announces.insert(id, reply);
                    }
                    Err(e) => {
                        let _ = reply.send(Err(DiscoveryError::Announce(e.to_string())));
                    }
                }
            }

            SwarmCommand::FindProviders {
                topic,
                limit,
                results,
            } => {
                if limit == 0 {
                    return;
                }
                let key = kad::RecordKey::new(&topic);
                let id = self.swarm.behaviour_mut().kademlia.get_providers(key);
                self.provider_queries.insert(
                    id,
                    ProviderQuery {
                        results,
                        remaining: limit,
                        seen: HashSet::new(),
                    },
                );
            }

            SwarmCommand::Subscribe {
                topic,
                buffer,
                reply,
            } => {
                let topic = gossipsub::IdentTopic::new(topic);
                let result = match self.swarm.behaviour_mut().gossipsub.subscribe(&topic) {
                    Ok(_) => {
                        let (tx, rx) = mpsc::channel(buffer.max(1));
                        self.subscriptions.insert(topic.hash(), tx);
                        tracing::info!("Subscribed to {}", topic);
                        Ok(rx)
                    }
                    Err(e) => Err(PubSubError::Subscribe(e.to_string())),
                };
                let _ = reply.send(result);
            }

            SwarmCommand::Publish { topic, data, reply } => {
                let topic = gossipsub::IdentTopic::new(topic);
                let result = self
                    .swarm
                    .behaviour_mut()
                    .gossipsub
                    .publish(topic.hash(), data)
                    .map(|_| ())
                    .map_err(|e| PubSubError::Publish(e.to_string()));
                let _ = reply.send(result);
            }

            SwarmCommand::WatchPings { peer, reports } => {
                self.ping_watch = Some((peer, reports));
            }

            SwarmCommand::ListenAddrs { reply } => {
                let _ = reply.send(self.swarm.listeners().cloned().collect());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id_from_addr() {
        let peer = PeerId::random();
        let addr: Multiaddr = format!("/ip4/10.0.0.1/tcp/4001/p2p/{}", peer).parse().unwrap();
        assert_eq!(peer_id_from_addr(&addr), Some(peer));

        let bare: Multiaddr = "/ip4/10.0.0.1/tcp/4001".parse().unwrap();
        assert_eq!(peer_id_from_addr(&bare), None);
    }

    #[tokio::test]
    async fn test_handle_reports_stopped_swarm() {
        let (command_tx, command_rx) = mpsc::channel(1);
        drop(command_rx);
        let handle = SwarmHandle {
            command_tx,
            local_peer_id: PeerId::random(),
        };

        let result = handle.listen_addrs().await;
        assert!(matches!(result, Err(TransportError::NotRunning)));

        let sent = handle
            .send_line(PeerId::random(), ORACLE_PROTOCOL, "hello".into())
            .await;
        assert!(matches!(
            sent,
            Err(StreamProtocolError::Transport(TransportError::NotRunning))
        ));
    }

    #[tokio::test]
    async fn test_dial_rejects_unqualified_and_self_addresses() {
        let (command_tx, _command_rx) = mpsc::channel(1);
        let local = PeerId::random();
        let handle = SwarmHandle {
            command_tx,
            local_peer_id: local,
        };

        let bare: Multiaddr = "/ip4/127.0.0.1/tcp/4001".parse().unwrap();
        assert!(matches!(
            handle.dial(bare).await,
            Err(TransportError::InvalidAddress(_))
        ));

        let own: Multiaddr = format!("/ip4/127.0.0.1/tcp/4001/p2p/{}", local).parse().unwrap();
        assert!(matches!(
            handle.dial(own).await,
            Err(TransportError::InvalidAddress(_))
        ));
    }
}
