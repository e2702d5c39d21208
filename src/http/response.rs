//! Response representation.
//!
//! Bodies are decoded into `serde_json::Value` once at the transport edge:
//! empty bodies become `Null`, non-JSON text becomes a JSON string.

use serde_json::Value;

use crate::error::TransportError;

/// A raw response as received from the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Value,
}

impl HttpResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Split into the success body or a raw status error.
    pub fn into_result(self) -> Result<Value, TransportError> {
        if self.is_success() {
            Ok(self.body)
        } else {
            Err(TransportError::Status {
                status: self.status,
                body: self.body,
            })
        }
    }
}

/// Decode raw body bytes.
pub fn decode_body(bytes: &[u8]) -> Value {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}
