//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ClientConfig (validated, immutable)
//!     → handed to ResilientClient::builder
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; a new client is built for new settings
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    ApiConfig, AuthConfig, CacheConfig, ClientConfig, ObservabilityConfig, RetryConfig,
    TimeoutConfig,
};
pub use validation::{validate_config, ValidationError};
