//! Client façade wiring every component together.
//!
//! One `NeuroSyncClient` per signed-in app instance. All handles it gives
//! out share the same session, cache and connectivity state.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tracing::info;

use crate::api::{ReqwestTransport, RequestDispatcher, ResponseClassifier, Transport};
use crate::auth::{CredentialStore, Session, SessionManager};
use crate::cache::{CacheLayer, CachePolicy};
use crate::config::ClientConfig;
use crate::connectivity::{ConnectivityGate, ReachabilityProbe};
use crate::services::{CalendarService, ChatService, FinanceService, TaskService};

pub struct NeuroSyncClient {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    connectivity: ConnectivityGate,
    session: SessionManager,
    dispatcher: RequestDispatcher,
    probe: Mutex<Option<ReachabilityProbe>>,
}

impl NeuroSyncClient {
    /// Create a client talking HTTP to `config.base_url`.
    pub fn new(config: ClientConfig, store: Arc<dyn CredentialStore>) -> Result<Self> {
        let transport = ReqwestTransport::new(config.request_timeout())
            .context("Failed to build HTTP client")?;
        Ok(Self::with_transport(config, store, Arc::new(transport)))
    }

    /// Create a client over an arbitrary transport.
    pub fn with_transport(
        config: ClientConfig,
        store: Arc<dyn CredentialStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let connectivity = ConnectivityGate::default();
        let classifier = ResponseClassifier::new(connectivity.clone());
        let cache = Arc::new(CacheLayer::new(CachePolicy::from_config(&config.cache)));
        let session = SessionManager::new(
            config.clone(),
            Arc::clone(&transport),
            classifier.clone(),
            store,
            Arc::clone(&cache),
        );
        let dispatcher = RequestDispatcher::new(
            config.clone(),
            Arc::clone(&transport),
            classifier,
            connectivity.clone(),
            cache,
            session.clone(),
        );
        Self {
            config,
            transport,
            connectivity,
            session,
            dispatcher,
            probe: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn dispatcher(&self) -> &RequestDispatcher {
        &self.dispatcher
    }

    pub fn connectivity(&self) -> &ConnectivityGate {
        &self.connectivity
    }

    /// Load the persisted session, if any. Call once at start-up.
    pub fn restore_session(&self) -> Option<Session> {
        self.session.restore()
    }

    pub fn tasks(&self) -> TaskService {
        TaskService::new(self.dispatcher.clone())
    }

    pub fn chat(&self) -> ChatService {
        ChatService::new(self.dispatcher.clone())
    }

    pub fn finance(&self) -> FinanceService {
        FinanceService::new(self.dispatcher.clone())
    }

    pub fn calendar(&self) -> CalendarService {
        CalendarService::new(self.dispatcher.clone())
    }

    /// Poll `health_path` every `interval` and feed the connectivity gate.
    /// Replaces a probe that is already running.
    pub fn start_reachability_probe(&self, interval: Duration) {
        let url = self.config.url_for(&self.config.health_path);
        info!(url = %url, interval_secs = interval.as_secs(), "Starting reachability probe");
        let probe = ReachabilityProbe::spawn(
            self.connectivity.clone(),
            Arc::clone(&self.transport),
            url,
            interval,
        );
        // Dropping the previous probe aborts it
        *self.probe.lock() = Some(probe);
    }

    pub fn stop_reachability_probe(&self) {
        self.probe.lock().take();
    }
}
