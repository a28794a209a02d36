//! Authentication lifecycle: login, logout and single-flight token refresh.
//!
//! `SessionManager` is the only owner of the current [`Session`]. Feature
//! code never reads the credential store directly.
//!
//! Refresh is coalesced: the first caller spawns the refresh task and parks
//! a shared handle in `refresh_flight`; every caller that arrives while it
//! is pending awaits the same handle. The task is spawned so that callers
//! giving up cannot abort a refresh half way through.

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use reqwest::Method;
use serde_json::json;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use super::credentials::{CredentialError, CredentialStore};
use super::session::{AuthResponse, AuthState, Session, SessionEvent};
use crate::api::classifier::{ClassifiedResult, ResponseClassifier};
use crate::api::error::{ApiError, ErrorKind};
use crate::api::transport::{RequestBody, Transport, TransportError, TransportRequest};
use crate::cache::CacheLayer;
use crate::config::{ClientConfig, LoginEncoding};
use crate::models::{Credentials, Registration, UserProfile};

const LOGIN_PATH: &str = "/auth/login";
const REGISTER_PATH: &str = "/auth/register";
const REFRESH_PATH: &str = "/auth/refresh";
const LOGOUT_PATH: &str = "/auth/logout";
const ME_PATH: &str = "/auth/me";

/// Buffer size for the lifecycle event channel.
const EVENT_CHANNEL_CAPACITY: usize = 16;

type SharedRefresh = Shared<BoxFuture<'static, Result<Session, ApiError>>>;

#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    classifier: ResponseClassifier,
    store: Arc<dyn CredentialStore>,
    cache: Arc<CacheLayer>,
    current: RwLock<Option<Session>>,
    state: watch::Sender<AuthState>,
    events: broadcast::Sender<SessionEvent>,
    refresh_flight: Mutex<Option<SharedRefresh>>,
}

impl SessionManager {
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        classifier: ResponseClassifier,
        store: Arc<dyn CredentialStore>,
        cache: Arc<CacheLayer>,
    ) -> Self {
        let (state, _) = watch::channel(AuthState::SignedOut);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                classifier,
                store,
                cache,
                current: RwLock::new(None),
                state,
                events,
                refresh_flight: Mutex::new(None),
            }),
        }
    }

    /// Load a persisted session at start-up. Storage failures are treated as
    /// signed out; a store that fails its integrity check is wiped.
    pub fn restore(&self) -> Option<Session> {
        match self.inner.store.load() {
            Ok(Some(session)) => {
                info!(user_id = %session.user_id, "Restored persisted session");
                *self.inner.current.write() = Some(session.clone());
                self.inner.set_state(AuthState::SignedIn);
                Some(session)
            }
            Ok(None) => {
                debug!("No persisted session");
                None
            }
            Err(e @ (CredentialError::Tampered | CredentialError::Serialization(_))) => {
                warn!(error = %e, "Discarding unreadable persisted session");
                if let Err(e) = self.inner.store.clear() {
                    warn!(error = %e, "Failed to clear credential store");
                }
                None
            }
            Err(e) => {
                warn!(error = %e, "Credential store unavailable, starting signed out");
                None
            }
        }
    }

    pub async fn login(&self, credentials: &Credentials) -> Result<Session, ApiError> {
        let body = match self.inner.config.auth.login_encoding {
            LoginEncoding::Json => RequestBody::Json(json!({
                "username": credentials.username,
                "password": credentials.password,
            })),
            LoginEncoding::Form => RequestBody::Form(vec![
                ("username".to_string(), credentials.username.clone()),
                ("password".to_string(), credentials.password.clone()),
            ]),
        };
        self.authenticate(LOGIN_PATH, body).await
    }

    pub async fn register(&self, registration: &Registration) -> Result<Session, ApiError> {
        let body = serde_json::to_value(registration)
            .map_err(|e| ApiError::Unknown(format!("Failed to encode registration: {}", e)))?;
        self.authenticate(REGISTER_PATH, RequestBody::Json(body)).await
    }

    async fn authenticate(&self, path: &str, body: RequestBody) -> Result<Session, ApiError> {
        self.inner.set_state(AuthState::Authenticating);
        debug!(path, "Authenticating");

        let result = match self
            .inner
            .send(Method::POST, path, None, body)
            .await
            .and_then(Inner::parse_auth_response)
        {
            Ok(response) => self.inner.session_from(response).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(session) => {
                self.inner.install(session.clone());
                info!(user_id = %session.user_id, "Signed in");
                let _ = self.inner.events.send(SessionEvent::SignedIn {
                    user_id: session.user_id.clone(),
                });
                Ok(session)
            }
            Err(e) => {
                warn!(path, kind = %e.kind(), "Authentication failed");
                let fallback = if self.inner.current.read().is_some() {
                    AuthState::SignedIn
                } else {
                    AuthState::SignedOut
                };
                self.inner.set_state(fallback);
                Err(e)
            }
        }
    }

    /// Sign out. The server-side invalidation is best effort; local
    /// credentials and cached data are always cleared.
    pub async fn logout(&self) {
        let token = self.current_token();
        if let Some(token) = token {
            if let Err(e) = self
                .inner
                .send(Method::POST, LOGOUT_PATH, Some(token), RequestBody::Empty)
                .await
            {
                warn!(kind = %e.kind(), "Server-side logout failed, clearing local session anyway");
            }
        }
        self.inner.clear_local();
        info!("Signed out");
        let _ = self.inner.events.send(SessionEvent::SignedOut);
    }

    /// Profile of the signed-in user. A rejected token is refreshed once
    /// before giving up.
    pub async fn me(&self) -> Result<UserProfile, ApiError> {
        let token = self
            .token_for_request()
            .await?
            .ok_or_else(|| ApiError::Unauthorized("Not signed in".to_string()))?;
        match self.inner.fetch_profile(&token).await {
            Err(e) if e.kind() == ErrorKind::Unauthorized => {
                let fresh = self.refresh(Some(&token)).await?;
                self.inner.fetch_profile(&fresh.access_token).await
            }
            other => other,
        }
    }

    pub fn current_token(&self) -> Option<String> {
        self.inner
            .current
            .read()
            .as_ref()
            .map(|s| s.access_token.clone())
    }

    pub fn current_session(&self) -> Option<Session> {
        self.inner.current.read().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.current.read().is_some()
    }

    pub fn state(&self) -> AuthState {
        *self.inner.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<AuthState> {
        self.inner.state.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Token to attach to the next request, refreshing first when the
    /// session's known expiry is within the configured buffer. A transient
    /// refresh failure falls back to the current token.
    pub async fn token_for_request(&self) -> Result<Option<String>, ApiError> {
        let Some(session) = self.current_session() else {
            return Ok(None);
        };
        let buffer = i64::try_from(self.inner.config.auth.refresh_buffer_secs)
            .ok()
            .and_then(ChronoDuration::try_seconds)
            .unwrap_or_else(ChronoDuration::zero);
        if session.refresh_token.is_none() || !session.needs_refresh(buffer) {
            return Ok(Some(session.access_token));
        }

        debug!(user_id = %session.user_id, "Access token near expiry, refreshing early");
        match self.refresh(Some(&session.access_token)).await {
            Ok(fresh) => Ok(Some(fresh.access_token)),
            Err(e) if e.kind() == ErrorKind::Unauthorized => Err(e),
            Err(_) => Ok(self.current_token()),
        }
    }

    /// Obtain a new session after `rejected_token` was refused.
    ///
    /// Invoked by the dispatcher. Concurrent callers share one refresh call.
    /// When the rejected token is already stale (someone else refreshed),
    /// the current session is returned without contacting the server.
    pub async fn refresh(&self, rejected_token: Option<&str>) -> Result<Session, ApiError> {
        let flight = {
            let mut slot = self.inner.refresh_flight.lock();
            match slot.as_ref() {
                Some(in_flight) => {
                    debug!("Joining in-flight refresh");
                    in_flight.clone()
                }
                None => {
                    if let Some(current) = self.inner.current.read().as_ref() {
                        if rejected_token != Some(current.access_token.as_str()) {
                            debug!("Token already rotated, skipping refresh");
                            return Ok(current.clone());
                        }
                    }
                    let flight = self.start_refresh();
                    *slot = Some(flight.clone());
                    flight
                }
            }
        };
        flight.await
    }

    fn start_refresh(&self) -> SharedRefresh {
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let result = inner.perform_refresh().await;
            inner.refresh_flight.lock().take();
            result
        });
        async move {
            task.await.unwrap_or_else(|e| {
                Err(ApiError::Unknown(format!("Token refresh was interrupted: {}", e)))
            })
        }
        .boxed()
        .shared()
    }

    /// Terminate the session after an unrecoverable auth failure and notify
    /// observers that a new login is required.
    pub(crate) fn end_session(&self, reason: &str) {
        self.inner.end_session(reason);
    }
}

impl Inner {
    fn set_state(&self, state: AuthState) {
        self.state.send_replace(state);
    }

    fn install(&self, session: Session) {
        if let Err(e) = self.store.save(&session) {
            // Still usable for this process; only persistence is lost
            warn!(error = %e, "Failed to persist session");
        }
        *self.current.write() = Some(session);
        self.set_state(AuthState::SignedIn);
    }

    fn clear_local(&self) {
        *self.current.write() = None;
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "Failed to clear credential store");
        }
        self.cache.clear();
        self.set_state(AuthState::SignedOut);
    }

    fn end_session(&self, reason: &str) {
        let had_session = self.current.read().is_some();
        self.clear_local();
        if had_session {
            warn!(reason, "Session ended");
            let _ = self.events.send(SessionEvent::SessionEnded {
                reason: reason.to_string(),
            });
        }
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        bearer: Option<String>,
        body: RequestBody,
    ) -> ClassifiedResult {
        let request = TransportRequest {
            method,
            url: self.config.url_for(path),
            bearer,
            body,
        };
        let timeout = self.config.request_timeout();
        let outcome = match tokio::time::timeout(timeout, self.transport.send(request)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(TransportError::timed_out(timeout)),
        };
        self.classifier.classify(outcome)
    }

    fn parse_auth_response(value: serde_json::Value) -> Result<AuthResponse, ApiError> {
        serde_json::from_value(value).map_err(|e| {
            debug!(error = %e, "Auth response has unexpected shape");
            ApiError::ParseError("The server returned an invalid session".to_string())
        })
    }

    /// Token replies without a user id are resolved through `/auth/me`.
    async fn session_from(&self, response: AuthResponse) -> Result<Session, ApiError> {
        let user_id = match response.user_id.clone() {
            Some(user_id) => user_id,
            None => {
                debug!("Token reply carries no user id, asking the server");
                self.fetch_profile(&response.access_token).await?.id
            }
        };
        Ok(response.into_session(user_id, None))
    }

    async fn fetch_profile(&self, token: &str) -> Result<UserProfile, ApiError> {
        let value = self
            .send(Method::GET, ME_PATH, Some(token.to_string()), RequestBody::Empty)
            .await?;
        serde_json::from_value(value).map_err(|e| {
            debug!(error = %e, "Profile has unexpected shape");
            ApiError::ParseError(format!("Unexpected response format from {}", ME_PATH))
        })
    }

    /// Transient failures keep the session; anything else means the refresh
    /// token itself was refused.
    fn is_transient(kind: ErrorKind) -> bool {
        matches!(
            kind,
            ErrorKind::Timeout | ErrorKind::Offline | ErrorKind::ServerError | ErrorKind::Unknown
        )
    }

    async fn perform_refresh(&self) -> Result<Session, ApiError> {
        let Some(session) = self.current.read().clone() else {
            return Err(ApiError::Unauthorized("Not signed in".to_string()));
        };
        let Some(refresh_token) = session.refresh_token.clone() else {
            self.end_session("Access token expired and no refresh token is available");
            return Err(Self::expired());
        };

        self.set_state(AuthState::Refreshing);
        info!(user_id = %session.user_id, "Refreshing access token");

        let result = self
            .send(
                Method::POST,
                REFRESH_PATH,
                None,
                RequestBody::Json(json!({ "refresh_token": refresh_token })),
            )
            .await
            .and_then(Self::parse_auth_response);

        match result {
            Ok(response) => {
                let user_id = response
                    .user_id
                    .clone()
                    .unwrap_or_else(|| session.user_id.clone());
                let fresh = response.into_session(user_id, Some(refresh_token));
                let still_current = self
                    .current
                    .read()
                    .as_ref()
                    .is_some_and(|s| s.access_token == session.access_token);
                if !still_current {
                    // Logged out or re-logged in while the refresh was pending
                    debug!("Discarding refresh result for a replaced session");
                    return self.current.read().clone().ok_or_else(Self::expired);
                }
                self.install(fresh.clone());
                info!(user_id = %fresh.user_id, "Access token refreshed");
                let _ = self.events.send(SessionEvent::Refreshed {
                    user_id: fresh.user_id.clone(),
                });
                Ok(fresh)
            }
            Err(e) if Self::is_transient(e.kind()) => {
                warn!(kind = %e.kind(), "Token refresh failed transiently, keeping session");
                self.set_state(AuthState::SignedIn);
                Err(e)
            }
            Err(e) => {
                self.end_session(&format!("Refresh rejected: {}", e.message()));
                Err(Self::expired())
            }
        }
    }

    fn expired() -> ApiError {
        ApiError::Unauthorized("Your session has expired, please sign in again".to_string())
    }
}
