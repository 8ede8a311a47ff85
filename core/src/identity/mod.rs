// Node identity: long-term keypair and the peer id derived from it

mod store;

pub use store::KeyFile;

use libp2p::identity::{DecodingError, Keypair, PublicKey};
use libp2p::PeerId;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("failed to read key file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("key file {path} is corrupt: {source}")]
    CorruptKey {
        path: PathBuf,
        #[source]
        source: DecodingError,
    },
    #[error("failed to persist key file {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode keypair: {0}")]
    Encode(#[source] DecodingError),
}

/// The node's keypair and its stable peer identifier.
///
/// Immutable for the lifetime of the process. The peer id is freely copied;
/// the keypair itself is only handed to the transport builder inside this crate.
#[derive(Clone)]
pub struct NodeIdentity {
    keypair: Keypair,
    peer_id: PeerId,
}

impl NodeIdentity {
    /// Generate a fresh, unpersisted Ed25519 identity
    pub fn generate() -> Self {
        Self::from_keypair(Keypair::generate_ed25519())
    }

    pub fn from_keypair(keypair: Keypair) -> Self {
        let peer_id = keypair.public().to_peer_id();
        Self { keypair, peer_id }
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn public_key(&self) -> PublicKey {
        self.keypair.public()
    }

    pub(crate) fn keypair(&self) -> &Keypair {
        &self.keypair
    }
}

impl std::fmt::Debug for NodeIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeIdentity")
            .field("peer_id", &self.peer_id)
            .finish_non_exhaustive()
    }
}

/// Load the identity stored at `path`, generating and persisting one on first run.
///
/// A key file that exists but cannot be decoded is an error: silently
/// replacing it would change the node's identity.
pub fn load_or_create_identity(path: impl AsRef<Path>) -> Result<NodeIdentity, IdentityError> {
    let store = KeyFile::new(path.as_ref());

    if let Some(keypair) = store.load()? {
        let identity = NodeIdentity::from_keypair(keypair);
        tracing::info!(
            "🔑 Loaded private key from {} ({})",
            store.path().display(),
            identity.peer_id()
        );
        return Ok(identity);
    }

    let identity = NodeIdentity::generate();
    store.save(identity.keypair())?;
    tracing::info!(
        "🔑 Generated and saved a new private key to {} ({})",
        store.path().display(),
        identity.peer_id()
    );
    Ok(identity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_identity_generation() {
        let a = NodeIdentity::generate();
        let b = NodeIdentity::generate();
        assert_ne!(a.peer_id(), b.peer_id());
        assert_eq!(a.public_key().to_peer_id(), a.peer_id());
    }

    #[test]
    fn test_load_or_create_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("private.key");

        let first = load_or_create_identity(&path).unwrap();
        let second = load_or_create_identity(&path).unwrap();
        let third = load_or_create_identity(&path).unwrap();

        assert_eq!(first.peer_id(), second.peer_id());
        assert_eq!(second.peer_id(), third.peer_id());
    }

    #[test]
    fn test_corrupt_key_is_not_replaced() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("private.key");
        std::fs::write(&path, b"definitely not a protobuf key").unwrap();

        let err = load_or_create_identity(&path).unwrap_err();
        assert!(matches!(err, IdentityError::CorruptKey { .. }));

        let contents = std::fs::read(&path).unwrap();
        assert_eq!(contents, b"definitely not a protobuf key");
    }

    #[test]
    fn test_empty_key_file_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("private.key");
        std::fs::write(&path, b"").unwrap();

        assert!(matches!(
            load_or_create_identity(&path),
            Err(IdentityError::CorruptKey { .. })
        ));
    }

    #[test]
    fn test_debug_does_not_leak_key() {
        let identity = NodeIdentity::generate();
        let rendered = format!("{:?}", identity);
        assert!(rendered.contains(&identity.peer_id().to_string()));
        assert!(!rendered.contains("keypair"));
    }
}
