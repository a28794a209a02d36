//! File-backed credential store for platforms without a usable keychain.
//!
//! The serialized session is sealed with ChaCha20-Poly1305. The key is
//! derived with Argon2 from an application-supplied device secret and a
//! random per-file salt, so a copied or edited file fails to open.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use argon2::Argon2;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::credentials::{CredentialError, CredentialStore};
use super::Session;

const FORMAT_VERSION: u8 = 1;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

#[derive(Serialize, Deserialize)]
struct SealedFile {
    version: u8,
    salt: Vec<u8>,
    nonce: Vec<u8>,
    ciphertext: Vec<u8>,
}

pub struct EncryptedFileStore {
    path: PathBuf,
    secret: Vec<u8>,
}

impl EncryptedFileStore {
    pub fn new(path: impl Into<PathBuf>, secret: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            secret: secret.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn cipher(&self, salt: &[u8]) -> Result<ChaCha20Poly1305, CredentialError> {
        let mut key = [0u8; 32];
        Argon2::default()
            .hash_password_into(&self.secret, salt, &mut key)
            .map_err(|e| CredentialError::StorageUnavailable(format!("key derivation failed: {}", e)))?;
        Ok(ChaCha20Poly1305::new(Key::from_slice(&key)))
    }

    fn seal(&self, plaintext: &[u8]) -> Result<SealedFile, CredentialError> {
        let mut salt = vec![0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        let cipher = self.cipher(&salt)?;
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| CredentialError::StorageUnavailable("encryption failed".to_string()))?;
        Ok(SealedFile {
            version: FORMAT_VERSION,
            salt,
            nonce: nonce.to_vec(),
            ciphertext,
        })
    }

    fn open(&self, sealed: &SealedFile) -> Result<Vec<u8>, CredentialError> {
        if sealed.version != FORMAT_VERSION
            || sealed.nonce.len() != NONCE_LEN
            || sealed.salt.len() != SALT_LEN
        {
            return Err(CredentialError::Tampered);
        }
        let cipher = self.cipher(&sealed.salt)?;
        cipher
            .decrypt(Nonce::from_slice(&sealed.nonce), sealed.ciphertext.as_slice())
            .map_err(|_| CredentialError::Tampered)
    }

    fn write_atomically(&self, contents: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                file.set_permissions(fs::Permissions::from_mode(0o600))?;
            }
            file.write_all(contents)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)
    }
}

impl CredentialStore for EncryptedFileStore {
    fn save(&self, session: &Session) -> Result<(), CredentialError> {
        let plaintext = serde_json::to_vec(session)?;
        let sealed = self.seal(&plaintext)?;
        let contents = serde_json::to_vec(&sealed)?;
        self.write_atomically(&contents)
            .map_err(|e| CredentialError::StorageUnavailable(e.to_string()))?;
        debug!(path = %self.path.display(), "Session sealed to disk");
        Ok(())
    }

    fn load(&self) -> Result<Option<Session>, CredentialError> {
        let contents = match fs::read(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CredentialError::StorageUnavailable(e.to_string())),
        };
        let sealed: SealedFile = serde_json::from_slice(&contents).map_err(|e| {
            warn!(error = %e, "Sealed session file is malformed");
            CredentialError::Tampered
        })?;
        let plaintext = self.open(&sealed)?;
        Ok(Some(serde_json::from_slice(&plaintext)?))
    }

    fn clear(&self) -> Result<(), CredentialError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CredentialError::StorageUnavailable(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_session() -> Session {
        Session {
            access_token: "a1".to_string(),
            refresh_token: None,
            user_id: "u1".to_string(),
            issued_at: Utc::now(),
            expires_at: None,
        }
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = EncryptedFileStore::new(dir.path().join("session.bin"), b"device-secret".to_vec());

        assert_eq!(store.load().unwrap(), None);
        let session = sample_session();
        store.save(&session).unwrap();
        assert_eq!(store.load().unwrap(), Some(session));

        let raw = fs::read_to_string(store.path()).unwrap();
        assert!(!raw.contains("\"a1\""), "token must not be stored in clear text");
    }

    #[test]
    fn test_wrong_secret_is_tampered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.bin");
        EncryptedFileStore::new(&path, b"device-secret".to_vec())
            .save(&sample_session())
            .unwrap();

        let other = EncryptedFileStore::new(&path, b"another-device".to_vec());
        assert_eq!(other.load().unwrap_err(), CredentialError::Tampered);
    }

    #[test]
    fn test_modified_ciphertext_is_tampered() {
        let dir = tempfile::tempdir().unwrap();
        let store = EncryptedFileStore::new(dir.path().join("session.bin"), b"device-secret".to_vec());
        store.save(&sample_session()).unwrap();

        let mut sealed: SealedFile = serde_json::from_slice(&fs::read(store.path()).unwrap()).unwrap();
        sealed.ciphertext[0] ^= 0xff;
        fs::write(store.path(), serde_json::to_vec(&sealed).unwrap()).unwrap();

        assert_eq!(store.load().unwrap_err(), CredentialError::Tampered);
    }

    #[test]
    fn test_clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = EncryptedFileStore::new(dir.path().join("nested/session.bin"), b"s".to_vec());
        store.clear().unwrap();
        store.save(&sample_session()).unwrap();
        store.clear().unwrap();
        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
    }
}
