//! Resilient API client.
//!
//! # Request Flow
//! ```text
//! DISPATCH
//!     ├─ GET with cache policy and fresh entry → DONE (no network)
//!     ├─ GET → coalesce on key → NETWORK
//!     └─ POST/PUT/DELETE → NETWORK
//!
//! NETWORK (inside the retry executor)
//!     ├─ success → cache write (cacheable GET) / tag invalidation (mutation) → DONE
//!     ├─ 401, not yet refreshed → REFRESH (single-flight) → same request once more
//!     └─ other error → normalized → retried while retryable and attempts remain
//! ```
//!
//! # Design Decisions
//! - Instances are built explicitly and share nothing with each other
//! - The refresh flag spans every retry attempt of one logical request
//! - Cache writes happen before coalesced waiters are released
//! - A GET answered after an invalidation of its tags is returned but not
//!   cached, and later GETs do not join it

mod batch;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

use crate::auth::{
    Credential, CredentialStore, FileTokenStorage, LogRedirect, LoginRedirect,
    MemoryTokenStorage, TokenRefresher, TokenStorage,
};
use crate::cache::{CacheKey, CacheStore, Generation};
use crate::config::{validate_config, ClientConfig, ValidationError};
use crate::error::{ApiError, ErrorKind, TransportError};
use crate::http::{
    new_request_id, to_body, ApiRequest, ReqwestTransport, Transport, WireRequest,
    REQUEST_ID_HEADER,
};
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::resilience::timeouts::with_timeout;
use crate::resilience::{execute_with_retry, RequestCoalescer, RetryPolicy};

/// Error building a client from configuration.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("invalid configuration: {}", join_errors(.0))]
    Config(Vec<ValidationError>),

    #[error("invalid URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },

    #[error("failed to create transport: {0}")]
    Transport(#[from] TransportError),

    #[error("failed to open token storage: {0}")]
    Storage(#[from] std::io::Error),
}

struct ClientInner {
    base_url: Url,
    transport: Arc<dyn Transport>,
    cache: CacheStore,
    coalescer: RequestCoalescer<CacheKey, Value, Generation>,
    credentials: Arc<CredentialStore>,
    refresher: TokenRefresher,
    retry_policy: RetryPolicy,
    request_timeout: Duration,
    shutdown: Shutdown,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Caching, coalescing, retrying API client.
///
/// Cloning is cheap; clones share cache, credentials, and in-flight calls.
#[derive(Clone)]
pub struct ResilientClient {
    inner: Arc<ClientInner>,
}

impl ResilientClient {
    /// Build a client with the default `reqwest` transport.
    pub fn new(config: ClientConfig) -> Result<Self, BuildError> {
        Self::builder(config).build()
    }

    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder::new(config)
    }

    /// Execute a request and return the raw JSON payload.
    pub async fn execute(&self, request: ApiRequest) -> Result<Value, ApiError> {
        if request.is_read() {
            self.execute_read(request).await
        } else {
            self.execute_write(request).await
        }
    }

    /// Execute a request and decode the payload.
    pub async fn send<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        let payload = self.execute(request).await?;
        serde_json::from_value(payload).map_err(ApiError::decode)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send(ApiRequest::get(path)).await
    }

    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send(ApiRequest::post(path, to_body(body)?)).await
    }

    pub async fn put<T, B>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send(ApiRequest::put(path, to_body(body)?)).await
    }

    /// DELETE, discarding whatever body the server returns.
    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.execute(ApiRequest::delete(path)).await.map(|_| ())
    }

    async fn execute_read(&self, request: ApiRequest) -> Result<Value, ApiError> {
        let key = CacheKey::for_request(&request);

        if request.cache.is_some() {
            if let Some(payload) = self.inner.cache.get(key.as_str()) {
                tracing::debug!(key = %key, "Cache hit");
                metrics::record_cache_lookup(true);
                return Ok(payload);
            }
            tracing::debug!(key = %key, "Cache miss");
            metrics::record_cache_lookup(false);
        }

        let tags = request
            .cache
            .as_ref()
            .map(|policy| policy.tags.as_slice())
            .unwrap_or_default();
        let seen = self.inner.cache.generation(tags);

        let client = self.clone();
        let cache_key = key.clone();
        self.inner
            .coalescer
            .run_stamped(key, seen, move || async move {
                let payload = client.dispatch(&request).await?;
                if let Some(policy) = request.cache {
                    let stored = client.inner.cache.set_if_current(
                        cache_key.as_str(),
                        payload.clone(),
                        policy.ttl,
                        policy.tags,
                        seen,
                    );
                    if !stored {
                        tracing::debug!(
                            key = %cache_key,
                            "Tags invalidated while in flight, response not cached"
                        );
                    }
                }
                Ok(payload)
            })
            .await
    }

    async fn execute_write(&self, request: ApiRequest) -> Result<Value, ApiError> {
        let payload = self.dispatch(&request).await?;
        if !request.invalidate_tags.is_empty() {
            self.inner.cache.invalidate_tags(&request.invalidate_tags);
        }
        Ok(payload)
    }

    /// Network path: retry executor around the auth-refresh wrapper.
    async fn dispatch(&self, request: &ApiRequest) -> Result<Value, ApiError> {
        let policy = if request.retry.allows(&request.method) {
            self.inner.retry_policy.clone()
        } else {
            RetryPolicy::none()
        };
        let refreshed = AtomicBool::new(false);
        let refreshed = &refreshed;

        execute_with_retry(move |_| self.send_authorized(request, refreshed), &policy).await
    }

    async fn send_authorized(
        &self,
        request: &ApiRequest,
        refreshed: &AtomicBool,
    ) -> Result<Value, ApiError> {
        let token = self.inner.credentials.access_token();
        match self.send_once(request, token.as_deref()).await {
            Err(err) if err.is(ErrorKind::Unauthenticated) => {
                let current = self.inner.credentials.access_token();
                if current.is_some() && current != token {
                    // Another request refreshed while this one was out
                    tracing::debug!(path = %request.path, "Token rotated since send, replaying");
                    return self.send_once(request, current.as_deref()).await;
                }
                if refreshed.swap(true, Ordering::SeqCst) {
                    tracing::warn!(path = %request.path, "Request rejected again after token refresh");
                    return Err(err);
                }
                tracing::info!(path = %request.path, "Access token rejected, refreshing");
                self.inner.refresher.refresh().await?;
                let token = self.inner.credentials.access_token();
                self.send_once(request, token.as_deref()).await
            }
            other => other,
        }
    }

    /// One network attempt, authorized with `token` when present.
    async fn send_once(
        &self,
        request: &ApiRequest,
        token: Option<&str>,
    ) -> Result<Value, ApiError> {
        let url = self.resolve_url(request)?;
        let request_id = new_request_id();

        let mut headers = vec![(REQUEST_ID_HEADER.to_string(), request_id.clone())];
        if let Some(token) = token {
            headers.push(("authorization".to_string(), format!("Bearer {}", token)));
        }

        let wire = WireRequest {
            method: request.method.clone(),
            url,
            headers,
            body: request.body.clone(),
        };
        let timeout = request.timeout.unwrap_or(self.inner.request_timeout);

        tracing::debug!(
            request_id = %request_id,
            method = %request.method,
            path = %request.path,
            "Dispatching request"
        );

        let start = Instant::now();
        match with_timeout(timeout, self.inner.transport.send(wire)).await {
            Ok(response) => {
                metrics::record_request(request.method.as_str(), response.status, start);
                if !response.is_success() {
                    tracing::debug!(
                        request_id = %request_id,
                        status = response.status,
                        "Request failed with status"
                    );
                }
                Ok(response.into_result()?)
            }
            Err(e) => {
                metrics::record_request(request.method.as_str(), 0, start);
                tracing::warn!(request_id = %request_id, error = %e, "Request failed without response");
                Err(e.into())
            }
        }
    }

    fn resolve_url(&self, request: &ApiRequest) -> Result<Url, ApiError> {
        let raw = if request.path.starts_with("http://") || request.path.starts_with("https://") {
            request.path.clone()
        } else {
            join_url(self.inner.base_url.as_str(), &request.path)
        };

        let mut url = Url::parse(&raw).map_err(|e| {
            ApiError::new(
                ErrorKind::Validation,
                format!("Invalid request URL '{}': {}", raw, e),
            )
        })?;
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(request.query.iter());
        }
        Ok(url)
    }

    /// Remove cached entries carrying any of `tags`.
    pub fn invalidate_tags<S: AsRef<str>>(&self, tags: &[S]) -> usize {
        self.inner.cache.invalidate_tags(tags)
    }

    /// Remove cached entries whose key contains `pattern`.
    pub fn invalidate_pattern(&self, pattern: &str) -> usize {
        self.inner.cache.invalidate_pattern(pattern)
    }

    pub fn clear_cache(&self) {
        self.inner.cache.clear();
    }

    pub fn cache(&self) -> &CacheStore {
        &self.inner.cache
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.inner.credentials
    }

    /// Install a credential obtained from a login flow.
    pub fn login(&self, credential: Credential) {
        self.inner.credentials.set(credential);
    }

    /// Forget the credential and every cached response.
    pub fn logout(&self) {
        self.inner.credentials.clear();
        self.inner.cache.clear();
        tracing::info!("Logged out");
    }

    /// Number of GET calls currently in flight.
    pub fn in_flight(&self) -> usize {
        self.inner.coalescer.in_flight()
    }

    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    /// Stop background tasks. The client stays usable.
    pub fn shutdown(&self) {
        self.inner.shutdown.trigger();
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Builder injecting the client's collaborators.
pub struct ClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    token_storage: Option<Arc<dyn TokenStorage>>,
    redirect: Option<Arc<dyn LoginRedirect>>,
    retry_policy: Option<RetryPolicy>,
}

impl ClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            transport: None,
            token_storage: None,
            redirect: None,
            retry_policy: None,
        }
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn token_storage(mut self, storage: Arc<dyn TokenStorage>) -> Self {
        self.token_storage = Some(storage);
        self
    }

    pub fn login_redirect(mut self, redirect: Arc<dyn LoginRedirect>) -> Self {
        self.redirect = Some(redirect);
        self
    }

    /// Override the policy derived from `[retries]`.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn build(self) -> Result<ResilientClient, BuildError> {
        let config = self.config;
        validate_config(&config).map_err(BuildError::Config)?;
        let base_url = parse_url(&config.api.base_url)?;
        let refresh_url = parse_url(&join_url(config.auth_base_url(), &config.api.refresh_path))?;

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(&config.timeouts)?),
        };
        let storage: Arc<dyn TokenStorage> = match (self.token_storage, &config.auth.token_file) {
            (Some(storage), _) => storage,
            (None, Some(path)) => Arc::new(FileTokenStorage::open(path)?),
            (None, None) => Arc::new(MemoryTokenStorage::new()),
        };
        let redirect: Arc<dyn LoginRedirect> = match self.redirect {
            Some(redirect) => redirect,
            None => Arc::new(LogRedirect),
        };

        let credentials = Arc::new(CredentialStore::new(storage));
        let refresher = TokenRefresher::new(
            transport.clone(),
            credentials.clone(),
            redirect,
            refresh_url,
            config.timeouts.request(),
            config.api.login_route.clone(),
        );

        let cache = CacheStore::new(config.cache.default_ttl());
        let shutdown = Shutdown::new();
        if tokio::runtime::Handle::try_current().is_ok() {
            cache.spawn_sweeper(config.cache.sweep_interval(), shutdown.subscribe());
        } else {
            tracing::warn!("No tokio runtime; cache sweeper not started, expiry is lazy only");
        }

        tracing::debug!(base_url = %base_url, "Client built");

        Ok(ResilientClient {
            inner: Arc::new(ClientInner {
                base_url,
                transport,
                cache,
                coalescer: RequestCoalescer::new(),
                credentials,
                refresher,
                retry_policy: self
                    .retry_policy
                    .unwrap_or_else(|| RetryPolicy::from_config(&config.retries)),
                request_timeout: config.timeouts.request(),
                shutdown,
            }),
        })
    }
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn parse_url(raw: &str) -> Result<Url, BuildError> {
    Url::parse(raw).map_err(|source| BuildError::InvalidUrl {
        url: raw.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests;
