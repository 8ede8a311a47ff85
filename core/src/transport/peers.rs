// Connected-peers set
//
// Owned by the swarm task, which adds and removes entries as connections
// open and close. Everything else reads snapshots or picks a random peer;
// the underlying map is never exposed.

use libp2p::{Multiaddr, PeerId};
use parking_lot::RwLock;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;

/// A known peer and the addresses it has been seen at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub peer_id: PeerId,
    pub addresses: Vec<Multiaddr>,
}

impl PeerRecord {
    pub fn new(peer_id: PeerId) -> Self {
        Self {
            peer_id,
            addresses: Vec::new(),
        }
    }

    fn learn(&mut self, addr: Multiaddr) -> bool {
        if self.addresses.contains(&addr) {
            return false;
        }
        self.addresses.push(addr);
        true
    }
}

/// Thread-safe set of currently connected peers
#[derive(Debug, Clone, Default)]
pub struct PeerSet {
    inner: Arc<RwLock<HashMap<PeerId, PeerRecord>>>,
}

impl PeerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a peer, or merge new addresses into an existing record.
    /// Returns `true` if the peer was not present before.
    pub fn add(&self, peer_id: PeerId, addresses: impl IntoIterator<Item = Multiaddr>) -> bool {
        let mut peers = self.inner.write();
        let is_new = !peers.contains_key(&peer_id);
        let record = peers
            .entry(peer_id)
            .or_insert_with(|| PeerRecord::new(peer_id));
        for addr in addresses {
            record.learn(addr);
        }
        is_new
    }

    /// Merge addresses into a record only if the peer is already present.
    pub(crate) fn learn_addresses(
        &self,
        peer_id: &PeerId,
        addresses: impl IntoIterator<Item = Multiaddr>,
    ) {
        if let Some(record) = self.inner.write().get_mut(peer_id) {
            for addr in addresses {
                record.learn(addr);
            }
        }
    }

    pub(crate) fn remove(&self, peer_id: &PeerId) -> Option<PeerRecord> {
        self.inner.write().remove(peer_id)
    }

    pub fn get(&self, peer_id: &PeerId) -> Option<PeerRecord> {
        self.inner.read().get(peer_id).cloned()
    }

    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.inner.read().contains_key(peer_id)
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Copy of every record at this instant
    pub fn snapshot_all(&self) -> Vec<PeerRecord> {
        self.inner.read().values().cloned().collect()
    }

    /// Pick one connected peer uniformly at random
    pub fn pick_random(&self) -> Option<PeerRecord> {
        self.pick_random_with(&mut rand::thread_rng())
    }

    pub fn pick_random_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<PeerRecord> {
        let peers = self.inner.read();
        if peers.is_empty() {
            return None;
        }
        let index = rng.gen_range(0..peers.len());
        peers.values().nth(index).cloned()
    }
}
