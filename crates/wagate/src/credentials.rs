use std::fmt;
use std::path::{Path, PathBuf};

use base64::Engine;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::SessionError;
use crate::identity::Identity;
use crate::registry::now_ms;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

const SESSION_FILE_SUFFIX: &str = ".session.json";

/// Opaque authentication state produced by a login or restore.
///
/// Never inspected here; only persisted and handed back to the transport.
#[derive(Clone)]
pub struct CredentialBlob(Zeroizing<Vec<u8>>);

impl CredentialBlob {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl PartialEq for CredentialBlob {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for CredentialBlob {}

impl fmt::Debug for CredentialBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CredentialBlob({} bytes)", self.0.len())
    }
}

/// Durable per-identity credential persistence.
///
/// Callers must hold the identity's lock before `save`/`delete` for that
/// identity; different identities may be accessed concurrently.
pub trait CredentialStore: Send + Sync {
    /// Returns `CredentialNotFound` when nothing is stored for `identity`.
    fn load(&self, identity: &Identity) -> Result<CredentialBlob, SessionError>;

    fn save(&self, identity: &Identity, blob: &CredentialBlob) -> Result<(), SessionError>;

    /// Deleting a missing credential succeeds.
    fn delete(&self, identity: &Identity) -> Result<(), SessionError>;

    fn exists(&self, identity: &Identity) -> bool;

    /// Every identity with a stored credential.
    fn list(&self) -> Result<Vec<Identity>, SessionError>;
}

#[derive(Serialize, Deserialize)]
struct StoredCredential {
    identity: Identity,
    blob_b64: String,
    saved_at_ms: u64,
}

/// One JSON file per identity under a private directory.
pub struct FileCredentialStore {
    dir: PathBuf,
}

impl FileCredentialStore {
    /// Open the store, creating `dir` with `0700` permissions if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, SessionError> {
        let dir = dir.into();
        if !dir.exists() {
            std::fs::create_dir_all(&dir).map_err(|e| SessionError::persistence(&dir, e))?;
        }
        #[cfg(unix)]
        {
            std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))
                .map_err(|e| SessionError::persistence(&dir, e))?;
        }
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File that holds `identity`'s credential.
    pub fn path_for(&self, identity: &Identity) -> PathBuf {
        self.dir
            .join(format!("{}{SESSION_FILE_SUFFIX}", identity.as_str()))
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self, identity: &Identity) -> Result<CredentialBlob, SessionError> {
        let path = self.path_for(identity);
        let data = match std::fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SessionError::CredentialNotFound(identity.clone()));
            }
            Err(e) => return Err(SessionError::persistence(&path, e)),
        };

        let stored: StoredCredential =
            serde_json::from_str(&data).map_err(|e| SessionError::CorruptCredential {
                path: path.clone(),
                message: e.to_string(),
            })?;
        if stored.identity != *identity {
            return Err(SessionError::CorruptCredential {
                path,
                message: format!("file belongs to {}", stored.identity.masked()),
            });
        }
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(stored.blob_b64.as_bytes())
            .map_err(|e| SessionError::CorruptCredential {
                path: path.clone(),
                message: e.to_string(),
            })?;

        Ok(CredentialBlob::new(bytes))
    }

    fn save(&self, identity: &Identity, blob: &CredentialBlob) -> Result<(), SessionError> {
        let path = self.path_for(identity);
        let stored = StoredCredential {
            identity: identity.clone(),
            blob_b64: base64::engine::general_purpose::STANDARD.encode(blob.as_bytes()),
            saved_at_ms: now_ms(),
        };
        let json = Zeroizing::new(serde_json::to_string_pretty(&stored).map_err(|e| {
            SessionError::CorruptCredential {
                path: path.clone(),
                message: e.to_string(),
            }
        })?);

        // Write beside the target and rename so readers never see a partial file.
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json.as_bytes())
            .map_err(|e| SessionError::persistence(&tmp_path, e))?;
        #[cfg(unix)]
        {
            std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))
                .map_err(|e| SessionError::persistence(&tmp_path, e))?;
        }
        std::fs::rename(&tmp_path, &path).map_err(|e| SessionError::persistence(&path, e))?;

        tracing::debug!(identity = %identity.masked(), "credential saved");
        Ok(())
    }

    fn delete(&self, identity: &Identity) -> Result<(), SessionError> {
        let path = self.path_for(identity);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!(identity = %identity.masked(), "credential deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SessionError::persistence(&path, e)),
        }
    }

    fn exists(&self, identity: &Identity) -> bool {
        self.path_for(identity).is_file()
    }

    fn list(&self) -> Result<Vec<Identity>, SessionError> {
        let entries =
            std::fs::read_dir(&self.dir).map_err(|e| SessionError::persistence(&self.dir, e))?;
        let mut identities = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| SessionError::persistence(&self.dir, e))?;
            let name = entry.file_name();
            let Some(stem) = name
                .to_str()
                .and_then(|n| n.strip_suffix(SESSION_FILE_SUFFIX))
            else {
                continue;
            };
            if let Ok(identity) = Identity::parse(stem) {
                identities.push(identity);
            }
        }
        identities.sort();
        Ok(identities)
    }
}
