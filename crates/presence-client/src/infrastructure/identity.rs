//! Local device identity.
//!
//! A device is known to the server by a 32-byte random token kept in a small
//! file next to the client (`.info` by default).  The first run creates it;
//! every later run reads it back, so the device id survives restarts.
//!
//! The token is stored raw and exposed hex-encoded as `ClientInfo::id`.
//! A file shorter than 32 bytes is treated as missing and rewritten.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rand::RngCore;
use thiserror::Error;
use tracing::{debug, info};

/// Length of the raw identity token in bytes.
pub const IDENTITY_LEN: usize = 32;

/// Default identity file, relative to the working directory.
pub const DEFAULT_IDENTITY_FILE: &str = ".info";

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("failed to read identity file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write identity file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// File-backed identity token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityStore {
    path: PathBuf,
}

impl Default for IdentityStore {
    fn default() -> Self {
        Self::new(DEFAULT_IDENTITY_FILE)
    }
}

impl IdentityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the stored id, creating and persisting a fresh one if the file
    /// is missing or too short.
    ///
    /// Only the first [`IDENTITY_LEN`] bytes of an existing file are used.
    ///
    /// # Errors
    ///
    /// [`IdentityError::Read`] for I/O errors other than a missing file, and
    /// [`IdentityError::Write`] if a fresh token cannot be persisted.
    pub fn load_or_generate(&self) -> Result<String, IdentityError> {
        if let Some(token) = self.load()? {
            debug!(path = %self.path.display(), "using existing device identity");
            return Ok(hex::encode(token));
        }

        let token = generate_token();
        self.store(&token)?;
        info!(path = %self.path.display(), "generated new device identity");
        Ok(hex::encode(token))
    }

    fn load(&self) -> Result<Option<[u8; IDENTITY_LEN]>, IdentityError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(IdentityError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let mut token = [0u8; IDENTITY_LEN];
        match bytes.get(..IDENTITY_LEN) {
            Some(prefix) => {
                token.copy_from_slice(prefix);
                Ok(Some(token))
            }
            None => {
                debug!(len = bytes.len(), "identity file too short; regenerating");
                Ok(None)
            }
        }
    }

    fn store(&self, token: &[u8; IDENTITY_LEN]) -> Result<(), IdentityError> {
        let write_err = |source| IdentityError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        fs::write(&self.path, token).map_err(write_err)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600)).map_err(write_err)?;
        }
        Ok(())
    }
}

fn generate_token() -> [u8; IDENTITY_LEN] {
    let mut token = [0u8; IDENTITY_LEN];
    rand::thread_rng().fill_bytes(&mut token);
    token
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (PathBuf, IdentityStore) {
        let dir = std::env::temp_dir().join(format!("presence-identity-{}", uuid::Uuid::new_v4()));
        let store = IdentityStore::new(dir.join(".info"));
        (dir, store)
    }

    #[test]
    fn test_empty_store_generates_and_persists_token() {
        // Arrange
        let (dir, store) = temp_store();

        // Act
        let id = store.load_or_generate().unwrap();

        // Assert
        assert_eq!(id.len(), IDENTITY_LEN * 2);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        let on_disk = fs::read(store.path()).unwrap();
        assert_eq!(on_disk.len(), IDENTITY_LEN);
        assert_eq!(hex::encode(&on_disk), id);

        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_second_bootstrap_returns_same_id() {
        let (dir, store) = temp_store();

        let first = store.load_or_generate().unwrap();
        let second = IdentityStore::new(store.path()).load_or_generate().unwrap();

        assert_eq!(first, second);
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_short_file_is_regenerated() {
        let (dir, store) = temp_store();
        fs::create_dir_all(&dir).unwrap();
        fs::write(store.path(), [0xAB; 10]).unwrap();

        let id = store.load_or_generate().unwrap();

        assert_ne!(id, hex::encode([0xAB; 10]));
        assert_eq!(fs::read(store.path()).unwrap().len(), IDENTITY_LEN);
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_only_first_32_bytes_of_longer_file_are_used() {
        let (dir, store) = temp_store();
        fs::create_dir_all(&dir).unwrap();
        let mut contents = vec![0x11; IDENTITY_LEN];
        contents.extend_from_slice(b"trailing");
        fs::write(store.path(), &contents).unwrap();

        let id = store.load_or_generate().unwrap();

        assert_eq!(id, "11".repeat(IDENTITY_LEN));
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_unreadable_path_is_read_error() {
        // A directory where the file should be.
        let (dir, store) = temp_store();
        fs::create_dir_all(store.path()).unwrap();

        let err = store.load_or_generate().unwrap_err();

        assert!(matches!(err, IdentityError::Read { .. }));
        fs::remove_dir_all(dir).ok();
    }
}
