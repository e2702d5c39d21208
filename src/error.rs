//! Error normalization.
//!
//! # Responsibilities
//! - Map raw transport/HTTP outcomes to a closed set of error kinds
//! - Decide retry eligibility (the only place this is derived from a status)
//! - Extract a human-readable message from heterogeneous error bodies
//!
//! # Priority
//! ```text
//! client-side timeout      → Timeout          (retryable)
//! no response              → Network          (retryable)
//! 400                      → Validation
//! 401                      → Unauthenticated  (refresh flow, never retried)
//! 403                      → Unauthorized
//! 404                      → NotFound
//! 429                      → RateLimited      (retryable)
//! 500 / 502 / 503 / 504    → Server           (retryable)
//! anything else            → Server
//! ```

use serde_json::Value;
use std::fmt;

/// Closed error taxonomy surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Network,
    Timeout,
    Validation,
    Unauthenticated,
    Unauthorized,
    NotFound,
    RateLimited,
    Server,
}

impl ErrorKind {
    /// Stable label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Validation => "validation",
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::NotFound => "not_found",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Server => "server",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized API error.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind} error: {message}")]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
    pub status_code: Option<u16>,
    pub retryable: bool,
    /// Structured payload from the response body (e.g. field errors).
    pub details: Option<Value>,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status_code: None,
            retryable: matches!(
                kind,
                ErrorKind::Network | ErrorKind::Timeout | ErrorKind::RateLimited
            ),
            details: None,
        }
    }

    /// Error raised when the refresh flow gives up.
    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self {
            status_code: Some(401),
            ..Self::new(ErrorKind::Unauthenticated, message)
        }
    }

    /// A successful response whose body could not be decoded.
    pub fn decode(err: impl fmt::Display) -> Self {
        Self::new(ErrorKind::Server, format!("Failed to decode response: {}", err))
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }
}

/// Raw outcome of a failed exchange, before normalization.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    /// The client-side deadline elapsed.
    #[error("request timed out")]
    Timeout,

    /// No response was received (refused, DNS, offline).
    #[error("no response: {0}")]
    Connect(String),

    /// The server answered with a non-success status.
    #[error("HTTP status {status}")]
    Status { status: u16, body: Value },

    /// Anything else (malformed response, builder failure).
    #[error("transport error: {0}")]
    Other(String),
}

/// Normalize a raw transport outcome.
pub fn normalize(raw: &TransportError) -> ApiError {
    match raw {
        TransportError::Timeout => ApiError::new(ErrorKind::Timeout, "Request timed out"),
        TransportError::Connect(reason) => ApiError::new(
            ErrorKind::Network,
            format!("Network unreachable: {}", reason),
        ),
        TransportError::Status { status, body } => normalize_status(*status, body),
        TransportError::Other(reason) => ApiError::new(ErrorKind::Server, reason.clone()),
    }
}

fn normalize_status(status: u16, body: &Value) -> ApiError {
    let (kind, retryable) = match status {
        400 => (ErrorKind::Validation, false),
        401 => (ErrorKind::Unauthenticated, false),
        403 => (ErrorKind::Unauthorized, false),
        404 => (ErrorKind::NotFound, false),
        429 => (ErrorKind::RateLimited, true),
        500 | 502 | 503 | 504 => (ErrorKind::Server, true),
        _ => (ErrorKind::Server, false),
    };

    let message = extract_message(body).unwrap_or_else(|| default_message(status));
    let details = if kind == ErrorKind::Validation {
        body.get("errors")
            .or_else(|| body.get("details"))
            .cloned()
    } else {
        None
    };

    ApiError {
        kind,
        message,
        status_code: Some(status),
        retryable,
        details,
    }
}

/// Pull a message out of the error body shapes seen in the wild.
fn extract_message(body: &Value) -> Option<String> {
    if let Some(s) = body.as_str() {
        return (!s.is_empty()).then(|| s.to_string());
    }
    let str_at = |v: Option<&Value>| v.and_then(Value::as_str).map(str::to_string);

    str_at(body.get("message"))
        .or_else(|| str_at(body.get("error")))
        .or_else(|| str_at(body.get("error").and_then(|e| e.get("message"))))
        .or_else(|| {
            str_at(
                body.get("errors")
                    .and_then(Value::as_array)
                    .and_then(|errs| errs.first())
                    .and_then(|e| e.get("message")),
            )
        })
        .or_else(|| str_at(body.get("detail")))
}

fn default_message(status: u16) -> String {
    match status {
        400 => "Invalid request".to_string(),
        401 => "Authentication required".to_string(),
        403 => "Access denied".to_string(),
        404 => "Resource not found".to_string(),
        429 => "Too many requests".to_string(),
        500..=599 => "Server error".to_string(),
        _ => format!("Unexpected status {}", status),
    }
}

impl From<TransportError> for ApiError {
    fn from(raw: TransportError) -> Self {
        normalize(&raw)
    }
}
