//! Resilient API client library.
//!
//! Client-side request cache and resilience layer: response caching with
//! TTL and tags, GET coalescing, bounded exponential retry, error
//! normalization, and single-flight token refresh on 401.

// Core subsystems
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod resource;

// Cross-cutting concerns
pub mod auth;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use auth::{Credential, LoginRedirect, TokenStorage};
pub use cache::{CacheKey, CacheStore};
pub use client::{BuildError, ClientBuilder, ResilientClient};
pub use config::ClientConfig;
pub use error::{ApiError, ErrorKind};
pub use http::{ApiRequest, CachePolicy, RetryMode};
pub use resilience::RetryPolicy;
pub use resource::{ResourceService, ScopedResourceService};
