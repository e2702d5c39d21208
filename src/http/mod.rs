//! HTTP subsystem.
//!
//! # Data Flow
//! ```text
//! ApiRequest (logical call + policy)
//!     → client resolves URL, adds Authorization and X-Request-ID
//!     → WireRequest
//!     → Transport::send
//!     → HttpResponse (status + decoded JSON body)
//! ```

#[cfg(test)]
pub(crate) mod mock;
pub mod request;
pub mod response;
pub mod transport;

pub(crate) use request::to_body;
pub use request::{new_request_id, ApiRequest, CachePolicy, RetryMode, REQUEST_ID_HEADER};
pub use response::HttpResponse;
pub use transport::{ReqwestTransport, Transport, WireRequest};
