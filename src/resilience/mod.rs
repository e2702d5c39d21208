//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to API:
//!     → coalescer.rs (GET only: join an identical call already in flight)
//!     → retries.rs (retry normalized, retryable failures with backoff)
//!         → backoff.rs (delay = base * 2^(attempt-1), capped)
//!         → timeouts.rs (client-side deadline per attempt)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every network attempt has a deadline
//! - Retries only for GET unless the request opts in
//! - Single-flight is reused for the token refresh call

pub mod backoff;
pub mod coalescer;
pub mod retries;
pub mod timeouts;

pub use coalescer::RequestCoalescer;
pub use retries::{execute_with_retry, RetryPolicy};
