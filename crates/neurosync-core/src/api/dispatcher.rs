//! The single entry point every feature module uses to talk to the backend.
//!
//! `RequestDispatcher::execute` runs one logical request through a small
//! retry state machine held in [`PendingRequest`]:
//!
//! - a fresh cached GET is served without touching the network
//! - offline with nothing cached fails fast with `Offline`
//! - `Unauthorized` triggers one shared session refresh and one retry
//! - `Timeout`/`ServerError` are retried once, for idempotent requests only
//! - success populates the cache (GET) or invalidates it (mutations)

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::classifier::{ClassifiedResult, ResponseClassifier};
use super::error::{ApiError, RetryPolicy};
use super::transport::{RequestBody, Transport, TransportError, TransportRequest};
use crate::auth::SessionManager;
use crate::cache::{resource_prefix, CacheKey, CacheLayer};
use crate::config::ClientConfig;
use crate::connectivity::ConnectivityGate;

/// Per-call overrides for [`RequestDispatcher::execute`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecuteOptions {
    /// Bypass a fresh cache entry while online.
    pub skip_cache: bool,
    /// Override the method's default idempotency.
    pub idempotent: Option<bool>,
}

impl ExecuteOptions {
    /// Always go to the network when possible.
    pub fn fresh() -> Self {
        Self {
            skip_cache: true,
            idempotent: None,
        }
    }
}

/// GET, HEAD, OPTIONS, PUT and DELETE may be repeated safely.
pub fn is_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::PUT | Method::DELETE
    )
}

fn is_mutation(method: &Method) -> bool {
    !matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

/// One in-flight logical operation and its retry bookkeeping.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    /// Transport attempts made so far.
    pub attempt: u32,
    pub idempotent: bool,
    auth_refreshed: bool,
    transient_retried: bool,
}

impl PendingRequest {
    pub fn new(method: Method, path: &str, body: Option<Value>, options: ExecuteOptions) -> Self {
        let idempotent = options.idempotent.unwrap_or_else(|| is_idempotent(&method));
        Self {
            method,
            path: path.to_string(),
            body,
            attempt: 0,
            idempotent,
            auth_refreshed: false,
            transient_retried: false,
        }
    }

    pub fn is_mutation(&self) -> bool {
        is_mutation(&self.method)
    }

    /// What to do after `policy`, given the attempts already spent.
    fn next_step(&self, policy: RetryPolicy) -> Step {
        match policy {
            RetryPolicy::RefreshThenRetry if !self.auth_refreshed => Step::Refresh,
            RetryPolicy::RefreshThenRetry => Step::EndSession,
            RetryPolicy::RetryOnce if self.idempotent && !self.transient_retried => Step::Backoff,
            RetryPolicy::RetryOnce | RetryPolicy::Terminal => Step::Surface,
        }
    }

    fn transport_request(&self, url: String, bearer: Option<String>) -> TransportRequest {
        TransportRequest {
            method: self.method.clone(),
            url,
            bearer,
            body: self
                .body
                .clone()
                .map(RequestBody::Json)
                .unwrap_or(RequestBody::Empty),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Refresh,
    EndSession,
    Backoff,
    Surface,
}

#[derive(Clone)]
pub struct RequestDispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    classifier: ResponseClassifier,
    connectivity: ConnectivityGate,
    cache: Arc<CacheLayer>,
    session: SessionManager,
}

impl RequestDispatcher {
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        classifier: ResponseClassifier,
        connectivity: ConnectivityGate,
        cache: Arc<CacheLayer>,
        session: SessionManager,
    ) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                config,
                transport,
                classifier,
                connectivity,
                cache,
                session,
            }),
        }
    }

    pub fn cache(&self) -> &CacheLayer {
        &self.inner.cache
    }

    /// Execute one logical request. `path` is relative to the configured
    /// base URL and may carry a query string.
    ///
    /// Mutations run on their own task: dropping the returned future stops
    /// waiting but never aborts a write or its cache invalidation.
    pub async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        options: ExecuteOptions,
    ) -> ClassifiedResult {
        let pending = PendingRequest::new(method, path, body, options);
        if !pending.is_mutation() {
            return self.inner.run(pending, options).await;
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.run(pending, options).await })
            .await
            .unwrap_or_else(|e| Err(ApiError::Unknown(format!("Request task failed: {}", e))))
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.get_with(path, ExecuteOptions::default()).await
    }

    pub async fn get_with<T: DeserializeOwned>(
        &self,
        path: &str,
        options: ExecuteOptions,
    ) -> Result<T, ApiError> {
        let value = self.execute(Method::GET, path, None, options).await?;
        decode(path, value)
    }

    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send_json(Method::POST, path, body).await
    }

    pub async fn put<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send_json(Method::PUT, path, body).await
    }

    pub async fn patch<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send_json(Method::PATCH, path, body).await
    }

    /// DELETE, discarding whatever body the server returns.
    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.execute(Method::DELETE, path, None, ExecuteOptions::default())
            .await
            .map(|_| ())
    }

    async fn send_json<B, T>(&self, method: Method, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = serde_json::to_value(body)
            .map_err(|e| ApiError::Unknown(format!("Failed to encode request body: {}", e)))?;
        let value = self
            .execute(method, path, Some(body), ExecuteOptions::default())
            .await?;
        decode(path, value)
    }
}

/// Decode a success value into the caller's type. A shape mismatch is a
/// `ParseError`, never partial data.
fn decode<T: DeserializeOwned>(path: &str, value: Value) -> Result<T, ApiError> {
    serde_json::from_value(value).map_err(|e| {
        debug!(path, error = %e, "Response did not match the expected shape");
        ApiError::ParseError(format!("Unexpected response format from {}", path))
    })
}

impl DispatcherInner {
    async fn run(&self, mut pending: PendingRequest, options: ExecuteOptions) -> ClassifiedResult {
        let cache_key =
            (pending.method == Method::GET).then(|| CacheKey::new(Method::GET, &pending.path));
        let online = self.connectivity.is_online();

        if let Some(key) = &cache_key {
            // Offline, even a skip_cache read prefers a fresh copy over failing
            if !options.skip_cache || !online {
                if let Some(value) = self.cache.get(key) {
                    debug!(path = %key.path, "Serving from cache");
                    return Ok(value);
                }
            }
        }

        if !online {
            debug!(method = %pending.method, path = %pending.path, "Offline, not sending");
            return Err(ApiError::Offline);
        }

        let generation = self.cache.generation();
        let mut token = self.session.token_for_request().await?;

        loop {
            let err = match self.attempt(&mut pending, token.clone()).await {
                Ok(value) => {
                    self.record_success(&pending, cache_key, generation, &value);
                    return Ok(value);
                }
                Err(err) => err,
            };

            match pending.next_step(err.kind().retry_policy()) {
                Step::Refresh => {
                    pending.auth_refreshed = true;
                    debug!(path = %pending.path, "Unauthorized, refreshing session");
                    let session = self.session.refresh(token.as_deref()).await?;
                    token = Some(session.access_token);
                }
                Step::EndSession => {
                    self.session
                        .end_session("The server rejected the refreshed session");
                    return Err(err);
                }
                Step::Backoff => {
                    pending.transient_retried = true;
                    let delay = self.backoff_delay();
                    warn!(
                        method = %pending.method,
                        path = %pending.path,
                        kind = %err.kind(),
                        backoff_ms = delay.as_millis() as u64,
                        "Retrying request"
                    );
                    tokio::time::sleep(delay).await;
                }
                Step::Surface => return Err(err),
            }
        }
    }

    async fn attempt(&self, pending: &mut PendingRequest, bearer: Option<String>) -> ClassifiedResult {
        pending.attempt += 1;
        debug!(
            method = %pending.method,
            path = %pending.path,
            attempt = pending.attempt,
            "Sending request"
        );
        let request = pending.transport_request(self.config.url_for(&pending.path), bearer);
        let timeout = self.config.request_timeout();
        let outcome = match tokio::time::timeout(timeout, self.transport.send(request)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(TransportError::timed_out(timeout)),
        };
        self.classifier.classify(outcome)
    }

    fn record_success(
        &self,
        pending: &PendingRequest,
        cache_key: Option<CacheKey>,
        generation: u64,
        value: &Value,
    ) {
        if let Some(key) = cache_key {
            self.cache.put_if_current(key, value.clone(), generation);
        }
        if pending.is_mutation() {
            self.cache.invalidate_prefix(&resource_prefix(&pending.path));
        }
    }

    /// Base backoff plus up to 50% random jitter.
    fn backoff_delay(&self) -> Duration {
        let base = self.config.retry_backoff_ms;
        let jitter = if base == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=base / 2)
        };
        Duration::from_millis(base + jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(method: Method, idempotent: Option<bool>) -> PendingRequest {
        PendingRequest::new(
            method,
            "/tasks/u1",
            None,
            ExecuteOptions {
                skip_cache: false,
                idempotent,
            },
        )
    }

    #[test]
    fn test_default_idempotency() {
        for method in [Method::GET, Method::HEAD, Method::OPTIONS, Method::PUT, Method::DELETE] {
            assert!(is_idempotent(&method), "{} should be idempotent", method);
        }
        assert!(!is_idempotent(&Method::POST));
        assert!(!is_idempotent(&Method::PATCH));
    }

    #[test]
    fn test_idempotency_override() {
        assert!(pending(Method::POST, Some(true)).idempotent);
        assert!(!pending(Method::GET, Some(false)).idempotent);
    }

    #[test]
    fn test_unauthorized_refreshes_once_then_ends_session() {
        let mut request = pending(Method::GET, None);
        assert_eq!(request.next_step(RetryPolicy::RefreshThenRetry), Step::Refresh);
        request.auth_refreshed = true;
        assert_eq!(request.next_step(RetryPolicy::RefreshThenRetry), Step::EndSession);
    }

    #[test]
    fn test_transient_retry_only_for_idempotent() {
        let mut get = pending(Method::GET, None);
        assert_eq!(get.next_step(RetryPolicy::RetryOnce), Step::Backoff);
        get.transient_retried = true;
        assert_eq!(get.next_step(RetryPolicy::RetryOnce), Step::Surface);

        let post = pending(Method::POST, None);
        assert_eq!(post.next_step(RetryPolicy::RetryOnce), Step::Surface);
        // Auth recovery still applies to non-idempotent requests
        assert_eq!(post.next_step(RetryPolicy::RefreshThenRetry), Step::Refresh);
    }

    #[test]
    fn test_terminal_is_surfaced() {
        assert_eq!(pending(Method::GET, None).next_step(RetryPolicy::Terminal), Step::Surface);
    }

    #[test]
    fn test_transport_request_body() {
        let mut request = pending(Method::POST, None);
        assert_eq!(
            request
                .transport_request("http://x/tasks".to_string(), None)
                .body,
            RequestBody::Empty
        );
        request.body = Some(serde_json::json!({"title": "t"}));
        let built = request.transport_request("http://x/tasks".to_string(), Some("a1".to_string()));
        assert_eq!(built.body, RequestBody::Json(serde_json::json!({"title": "t"})));
        assert_eq!(built.bearer.as_deref(), Some("a1"));
    }

    #[test]
    fn test_decode_shape_mismatch_is_parse_error() {
        let err = decode::<Vec<String>>("/tasks/u1", serde_json::json!({"id": 1})).unwrap_err();
        assert!(matches!(err, ApiError::ParseError(_)));
        let ok: Option<String> = decode("/tasks/t1", Value::Null).unwrap();
        assert_eq!(ok, None);
    }
}
