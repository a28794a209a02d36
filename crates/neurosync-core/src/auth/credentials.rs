use keyring::Entry;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use super::Session;

/// Keychain account under which the serialized session is stored.
const SESSION_ACCOUNT: &str = "session";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("Secure storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Stored session failed integrity check")]
    Tampered,

    #[error("Stored session is unreadable: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for CredentialError {
    fn from(err: serde_json::Error) -> Self {
        CredentialError::Serialization(err.to_string())
    }
}

/// Durable storage for the serialized session.
///
/// `load` returns `Ok(None)` when nothing is stored; `save` and `clear` are
/// idempotent.
pub trait CredentialStore: Send + Sync {
    fn save(&self, session: &Session) -> Result<(), CredentialError>;
    fn load(&self) -> Result<Option<Session>, CredentialError>;
    fn clear(&self) -> Result<(), CredentialError>;
}

/// Stores the session in the OS keychain.
pub struct KeyringCredentialStore {
    service: String,
}

impl KeyringCredentialStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self) -> Result<Entry, CredentialError> {
        Entry::new(&self.service, SESSION_ACCOUNT).map_err(Self::unavailable)
    }

    fn unavailable(err: keyring::Error) -> CredentialError {
        CredentialError::StorageUnavailable(err.to_string())
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn save(&self, session: &Session) -> Result<(), CredentialError> {
        let serialized = serde_json::to_string(session)?;
        self.entry()?
            .set_password(&serialized)
            .map_err(Self::unavailable)?;
        debug!(service = %self.service, "Session stored in keychain");
        Ok(())
    }

    fn load(&self) -> Result<Option<Session>, CredentialError> {
        match self.entry()?.get_password() {
            Ok(serialized) => Ok(Some(serde_json::from_str(&serialized)?)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(Self::unavailable(e)),
        }
    }

    fn clear(&self) -> Result<(), CredentialError> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(Self::unavailable(e)),
        }
    }
}

/// Process-local store, for tests and sessions that must not outlive the app.
#[derive(Default)]
pub struct MemoryCredentialStore {
    serialized: Mutex<Option<String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session: &Session) -> Result<Self, CredentialError> {
        let store = Self::new();
        store.save(session)?;
        Ok(store)
    }

    pub fn is_empty(&self) -> bool {
        self.serialized.lock().is_none()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn save(&self, session: &Session) -> Result<(), CredentialError> {
        *self.serialized.lock() = Some(serde_json::to_string(session)?);
        Ok(())
    }

    fn load(&self) -> Result<Option<Session>, CredentialError> {
        match self.serialized.lock().as_deref() {
            Some(serialized) => Ok(Some(serde_json::from_str(serialized)?)),
            None => Ok(None),
        }
    }

    fn clear(&self) -> Result<(), CredentialError> {
        *self.serialized.lock() = None;
        Ok(())
    }
}
