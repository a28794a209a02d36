//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use neurosync_core::api::{RawResponse, Transport, TransportError, TransportErrorKind, TransportRequest};
use neurosync_core::{ClientConfig, CredentialStore, MemoryCredentialStore, NeuroSyncClient, Session};

pub fn session(access: &str, refresh: Option<&str>) -> Session {
    Session {
        access_token: access.to_string(),
        refresh_token: refresh.map(str::to_string),
        user_id: "u1".to_string(),
        issued_at: Utc::now(),
        expires_at: None,
    }
}

/// Config with no retry backoff so tests don't sleep.
pub fn test_config(base_url: &str) -> ClientConfig {
    let mut config = ClientConfig::for_base_url(base_url);
    config.retry_backoff_ms = 0;
    config.request_timeout_secs = 5;
    config
}

pub fn signed_in_store(access: &str, refresh: Option<&str>) -> Arc<MemoryCredentialStore> {
    Arc::new(MemoryCredentialStore::with_session(&session(access, refresh)).unwrap())
}

/// Client over real HTTP to `base_url`, with the given session already restored.
pub fn http_client(base_url: &str, store: Arc<MemoryCredentialStore>) -> NeuroSyncClient {
    let client = NeuroSyncClient::new(test_config(base_url), store as Arc<dyn CredentialStore>).unwrap();
    client.restore_session();
    client
}

pub struct Scripted {
    pub delay: Option<Duration>,
    pub outcome: Result<RawResponse, TransportError>,
}

pub fn respond(status: u16, body: &str) -> Scripted {
    Scripted {
        delay: None,
        outcome: Ok(RawResponse::new(status, body)),
    }
}

pub fn fail(kind: TransportErrorKind) -> Scripted {
    Scripted {
        delay: None,
        outcome: Err(TransportError::new(kind, "scripted failure")),
    }
}

pub fn delayed(delay: Duration, scripted: Scripted) -> Scripted {
    Scripted {
        delay: Some(delay),
        ..scripted
    }
}

/// In-memory transport that replays a script and records every request.
/// Once the script runs out every request gets `fallback`.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Scripted>>,
    fallback: Result<RawResponse, TransportError>,
    seen: Mutex<Vec<TransportRequest>>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Scripted>) -> Arc<Self> {
        Self::with_fallback(script, Ok(RawResponse::new(500, r#"{"detail": "script exhausted"}"#)))
    }

    pub fn with_fallback(
        script: Vec<Scripted>,
        fallback: Result<RawResponse, TransportError>,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback,
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.seen.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.seen.lock().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: TransportRequest) -> Result<RawResponse, TransportError> {
        self.seen.lock().push(request);
        let next = self.script.lock().pop_front();
        match next {
            Some(Scripted { delay, outcome }) => {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                outcome
            }
            None => self.fallback.clone(),
        }
    }
}

/// Client over a scripted transport, with the given session already restored.
pub fn scripted_client(
    transport: Arc<ScriptedTransport>,
    store: Arc<MemoryCredentialStore>,
) -> NeuroSyncClient {
    let client = NeuroSyncClient::with_transport(
        test_config("http://backend.test"),
        store as Arc<dyn CredentialStore>,
        transport as Arc<dyn Transport>,
    );
    client.restore_session();
    client
}
