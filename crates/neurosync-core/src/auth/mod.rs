//! Authentication module for managing the user session and its storage.
//!
//! This module provides:
//! - `Session`: the bearer/refresh token pair with optional known expiry
//! - `CredentialStore`: persistence backends (OS keychain, encrypted file, memory)
//! - `SessionManager`: login, logout and single-flight token refresh
//!
//! Feature code never touches a `CredentialStore` directly; everything goes
//! through `SessionManager`.

pub mod credentials;
pub mod encrypted;
pub mod manager;
pub mod session;

pub use credentials::{CredentialError, CredentialStore, KeyringCredentialStore, MemoryCredentialStore};
pub use encrypted::EncryptedFileStore;
pub use manager::SessionManager;
pub use session::{AuthState, Session, SessionEvent};
