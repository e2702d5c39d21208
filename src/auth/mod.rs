//! Authentication subsystem.
//!
//! # Data Flow
//! ```text
//! every outbound request
//!     → credentials.rs (read access token, lock-free)
//!
//! 401 on a request not yet refreshed
//!     → refresh.rs (single-flight POST to the refresh endpoint)
//!         → success: credentials.rs stores and persists the new pair
//!         → failure: credentials cleared, redirect.rs invoked once
//! ```
//!
//! # Design Decisions
//! - One credential per client instance, never a process global
//! - The refresh call itself is never retried or refreshed
//! - Persistence goes through the `TokenStorage` trait

pub mod credentials;
pub mod redirect;
pub mod refresh;
pub mod storage;

pub use credentials::{Credential, CredentialStore};
pub use redirect::{LogRedirect, LoginRedirect};
pub use refresh::TokenRefresher;
pub use storage::{FileTokenStorage, MemoryTokenStorage, TokenStorage};
