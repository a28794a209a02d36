//! Core library for the NeuroSync client.
//!
//! Every backend call goes through one [`RequestDispatcher`], which attaches
//! the session's bearer token, consults the short-lived GET cache, refuses to
//! send while offline and applies a bounded retry policy. Failures come back
//! as a closed set of [`ApiError`] kinds.
//!
//! [`NeuroSyncClient`] wires the pieces together and hands out the typed
//! feature services (tasks, chat, finance, calendar).

pub mod api;
pub mod auth;
pub mod cache;
pub mod client;
pub mod config;
pub mod connectivity;
pub mod models;
pub mod services;

pub use api::{ApiError, ClassifiedResult, ErrorKind, ExecuteOptions, RequestDispatcher};
pub use auth::{
    AuthState, CredentialError, CredentialStore, EncryptedFileStore, KeyringCredentialStore,
    MemoryCredentialStore, Session, SessionEvent, SessionManager,
};
pub use client::NeuroSyncClient;
pub use config::ClientConfig;
pub use connectivity::{Connectivity, ConnectivityGate};
