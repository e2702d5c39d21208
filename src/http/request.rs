//! Request description and per-request policy.
//!
//! # Responsibilities
//! - Describe a logical API call (method, path, query, JSON body)
//! - Carry per-request cache, invalidation, retry, and timeout policy
//! - Generate unique request IDs (UUID v4)
//!
//! # Design Decisions
//! - Query parameters live in a BTreeMap so key derivation is order-independent
//! - Caching is opt-in per GET via `CachePolicy`
//! - Mutations declare the tags they invalidate

use reqwest::Method;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{ApiError, ErrorKind};

/// Header carrying the per-attempt correlation ID.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Generate a fresh request ID.
pub fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Serialize a typed request body into the JSON payload carried by requests.
pub(crate) fn to_body<B: Serialize + ?Sized>(body: &B) -> Result<Value, ApiError> {
    serde_json::to_value(body).map_err(|e| {
        ApiError::new(
            ErrorKind::Validation,
            format!("Failed to serialize request body: {}", e),
        )
    })
}

/// Cache settings for a GET request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CachePolicy {
    /// Entry lifetime; the store default applies when unset.
    pub ttl: Option<Duration>,
    /// Tags used for bulk invalidation.
    pub tags: Vec<String>,
    /// Explicit key replacing the derived one.
    pub key: Option<String>,
}

impl CachePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

/// Whether the retry executor may re-issue a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RetryMode {
    /// Retry GET only.
    #[default]
    Auto,
    /// Retry regardless of method (explicit opt-in for mutations).
    Always,
    /// Single attempt.
    Never,
}

impl RetryMode {
    pub fn allows(&self, method: &Method) -> bool {
        match self {
            RetryMode::Auto => method == Method::GET,
            RetryMode::Always => true,
            RetryMode::Never => false,
        }
    }
}

/// A logical call against the remote API.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the configured base URL (e.g., "/api/employees").
    pub path: String,
    pub query: BTreeMap<String, String>,
    pub body: Option<Value>,
    pub cache: Option<CachePolicy>,
    pub invalidate_tags: Vec<String>,
    pub retry: RetryMode,
    pub timeout: Option<Duration>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: BTreeMap::new(),
            body: None,
            cache: None,
            invalidate_tags: Vec::new(),
            retry: RetryMode::Auto,
            timeout: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, path).body(body)
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::PUT, path).body(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.insert(key.into(), value.to_string());
        self
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn cache(mut self, policy: CachePolicy) -> Self {
        self.cache = Some(policy);
        self
    }

    pub fn invalidates<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.invalidate_tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn retry(mut self, mode: RetryMode) -> Self {
        self.retry = mode;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Only GET requests are idempotent for coalescing and caching purposes.
    pub fn is_read(&self) -> bool {
        self.method == Method::GET
    }
}
