//! Topic subscriptions on top of gossipsub.
//!
//! The swarm task owns the gossipsub behaviour and forwards each message to a
//! bounded per-topic channel. [`spawn_subscription`] drains such a channel
//! into a [`SubscriptionHandler`] on its own task.

pub mod worker_status;

use crate::transport::TransportError;
use async_trait::async_trait;
use libp2p::PeerId;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use worker_status::{WorkerStatus, WorkerStatusHandler};

/// Default number of undelivered messages buffered per subscription
pub const SUBSCRIPTION_BUFFER: usize = 256;

#[derive(Debug, Error)]
pub enum PubSubError {
    #[error("failed to subscribe: {0}")]
    Subscribe(String),
    #[error("failed to publish: {0}")]
    Publish(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// A pub/sub payload could not be decoded
#[derive(Debug, Error)]
#[error("failed to decode message: {0}")]
pub struct DecodeError(#[from] serde_json::Error);

/// A message delivered on a subscribed topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubSubMessage {
    /// Publishing peer, when the message is signed
    pub source: Option<PeerId>,
    /// Peer that forwarded it to us
    pub propagation_source: PeerId,
    pub topic: String,
    pub data: Vec<u8>,
}

#[async_trait]
pub trait SubscriptionHandler: Send + Sync {
    async fn handle_message(&self, message: PubSubMessage);
}

/// Feed every message from `messages` to `handler` until the subscription
/// closes or the node shuts down.
pub fn spawn_subscription(
    mut messages: mpsc::Receiver<PubSubMessage>,
    handler: Arc<dyn SubscriptionHandler>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                message = messages.recv() => match message {
                    Some(message) => handler.handle_message(message).await,
                    None => break,
                },
            }
        }
    })
}
