// Key file storage for the node identity

use super::IdentityError;
use libp2p::identity::Keypair;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

/// On-disk location of the node's private key.
///
/// The file holds the libp2p protobuf encoding of the private key and is
/// written once, with owner-only permissions.
#[derive(Debug, Clone)]
pub struct KeyFile {
    path: PathBuf,
}

impl KeyFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the keypair, or `None` if no key file exists yet.
    pub fn load(&self) -> Result<Option<Keypair>, IdentityError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => Zeroizing::new(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(IdentityError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let keypair =
            Keypair::from_protobuf_encoding(&bytes).map_err(|source| IdentityError::CorruptKey {
                path: self.path.clone(),
                source,
            })?;
        Ok(Some(keypair))
    }

    /// Persist a keypair. Fails if a key file is already present.
    pub fn save(&self, keypair: &Keypair) -> Result<(), IdentityError> {
        let encoded = Zeroizing::new(
            keypair
                .to_protobuf_encoding()
                .map_err(IdentityError::Encode)?,
        );

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| self.persist_error(source))?;
        }

        if self.path.exists() {
            return Err(self.persist_error(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "key file already exists",
            )));
        }

        // Staged next to the target; only a complete key is renamed into place
        let staging = self.staging_path();
        let written =
            Self::write_staging(&staging, &encoded).and_then(|_| fs::rename(&staging, &self.path));
        if let Err(source) = written {
            let _ = fs::remove_file(&staging);
            return Err(self.persist_error(source));
        }
        Ok(())
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn write_staging(staging: &Path, encoded: &[u8]) -> io::Result<()> {
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(staging)?;
        // A stale staging file keeps its old mode; tighten it
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(fs::Permissions::from_mode(0o600))?;
        }
        file.write_all(encoded)?;
        file.sync_all()
    }

    fn persist_error(&self, source: io::Error) -> IdentityError {
        IdentityError::Persist {
            path: self.path.clone(),
            source,
        }
    }
}
