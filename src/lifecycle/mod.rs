//! Lifecycle management.
//!
//! A client owns background tasks (the cache sweeper). They subscribe to a
//! `Shutdown` broadcast and exit when it fires or the client is dropped.

pub mod shutdown;

pub use shutdown::Shutdown;
