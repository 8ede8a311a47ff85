//! Webhook relay bridge.
//!
//! Turns an authenticated webhook call into exactly one line sent to one
//! uniformly chosen connected peer on the message protocol. There is no
//! retry and no queue: a failed send is reported to the caller and dropped.

use crate::protocol::{LineSender, StreamProtocolError, MESSAGE_PROTOCOL};
use crate::transport::codec::ProtocolMessage;
use crate::transport::PeerSet;
use libp2p::PeerId;
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// Line relayed when the webhook body is empty
pub const DEFAULT_RELAY_MESSAGE: &str = "Webhook called";

/// Decides whether a webhook caller may trigger a relay
pub trait Authenticator: Send + Sync {
    fn authorize(&self, authorization: Option<&str>) -> bool;
}

/// Accepts exactly one shared token in the `Authorization` header
pub struct StaticTokenAuthenticator {
    token: String,
}

impl StaticTokenAuthenticator {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl Authenticator for StaticTokenAuthenticator {
    fn authorize(&self, authorization: Option<&str>) -> bool {
        match authorization {
            Some(presented) => !self.token.is_empty() && presented == self.token,
            None => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Unauthorized")]
    Unauthorized,
    #[error("No peers available")]
    NoPeers,
    #[error("Failed to send message to peer: {0}")]
    Stream(#[from] StreamProtocolError),
}

impl RelayError {
    /// HTTP status reported for this failure
    pub fn status(&self) -> u16 {
        match self {
            RelayError::Unauthorized => 401,
            RelayError::NoPeers | RelayError::Stream(_) => 500,
        }
    }
}

/// JSON body of a webhook reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ReplyBody {
    Message { message: String },
    Error { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookReply {
    pub status: u16,
    pub body: ReplyBody,
}

impl WebhookReply {
    fn ok() -> Self {
        Self {
            status: 200,
            body: ReplyBody::Message {
                message: DEFAULT_RELAY_MESSAGE.to_string(),
            },
        }
    }
}

impl From<RelayError> for WebhookReply {
    fn from(err: RelayError) -> Self {
        Self {
            status: err.status(),
            body: ReplyBody::Error {
                error: err.to_string(),
            },
        }
    }
}

#[derive(Clone)]
pub struct WebhookBridge {
    auth: Arc<dyn Authenticator>,
    peers: PeerSet,
    sender: Arc<dyn LineSender>,
}

impl WebhookBridge {
    pub fn new(auth: Arc<dyn Authenticator>, peers: PeerSet, sender: Arc<dyn LineSender>) -> Self {
        Self {
            auth,
            peers,
            sender,
        }
    }

    /// Handle one webhook call and build the HTTP reply for it
    pub async fn relay(&self, authorization: Option<&str>, payload: Option<&str>) -> WebhookReply {
        let target = self.pick_target(authorization, &mut rand::thread_rng());
        self.deliver(target, payload).await
    }

    pub async fn relay_with<R: Rng + ?Sized>(
        &self,
        authorization: Option<&str>,
        payload: Option<&str>,
        rng: &mut R,
    ) -> WebhookReply {
        let target = self.pick_target(authorization, rng);
        self.deliver(target, payload).await
    }

    fn pick_target<R: Rng + ?Sized>(
        &self,
        authorization: Option<&str>,
        rng: &mut R,
    ) -> Result<PeerId, RelayError> {
        if !self.auth.authorize(authorization) {
            return Err(RelayError::Unauthorized);
        }
        let target = self.peers.pick_random_with(rng).ok_or(RelayError::NoPeers)?;
        Ok(target.peer_id)
    }

    async fn deliver(&self, target: Result<PeerId, RelayError>, payload: Option<&str>) -> WebhookReply {
        let result = match target {
            Ok(peer) => {
                tracing::info!("Relaying webhook to {}", peer);
                self.sender
                    .send_line(peer, MESSAGE_PROTOCOL, relay_line(payload))
                    .await
                    .map_err(RelayError::from)
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => WebhookReply::ok(),
            Err(e) => {
                tracing::warn!("Webhook relay failed: {}", e);
                e.into()
            }
        }
    }
}

/// The request body folded onto one line, or the default message
pub fn relay_line(payload: Option<&str>) -> String {
    match payload.map(str::trim).filter(|body| !body.is_empty()) {
        Some(body) => ProtocolMessage::new(body).into_line(),
        None => DEFAULT_RELAY_MESSAGE.to_string(),
    }
}
