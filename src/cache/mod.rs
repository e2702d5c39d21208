//! Response cache subsystem.
//!
//! # Data Flow
//! ```text
//! GET request
//!     → key.rs (canonical key from method, path, query, override)
//!     → store.rs lookup (expired entries evicted on read)
//!     → miss: network, then store.rs write with ttl + tags
//!
//! Mutation with tags
//!     → store.rs invalidate_tags after success (bumps the tags' generation,
//!       so GETs still in flight for them skip their write)
//!
//! Background
//!     → store.rs sweeper removes expired entries on an interval
//! ```
//!
//! # Design Decisions
//! - Pure in-memory; nothing survives a restart
//! - Tags drive invalidation only, never lookup
//! - Concurrent map so reads never block unrelated keys

pub mod key;
pub mod store;

pub use key::CacheKey;
pub use store::{CacheEntry, CacheStore, Generation};
