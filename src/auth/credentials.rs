//! The live credential pair.

use arc_swap::ArcSwapOption;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::auth::storage::{MemoryTokenStorage, TokenStorage};

/// Storage key for the access token.
pub const ACCESS_TOKEN_KEY: &str = "accessToken";
/// Storage key for the refresh token.
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";

/// An access/refresh token pair. Also the refresh endpoint's response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
}

impl Credential {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

/// Holds the current credential for one client.
///
/// Reads are lock-free; writes go through to the durable storage. Storage
/// failures are logged and never fail the caller.
pub struct CredentialStore {
    current: ArcSwapOption<Credential>,
    storage: Arc<dyn TokenStorage>,
}

impl CredentialStore {
    /// Create a store, restoring any persisted credential.
    pub fn new(storage: Arc<dyn TokenStorage>) -> Self {
        let restored = storage.get(ACCESS_TOKEN_KEY).map(|access_token| Credential {
            access_token,
            refresh_token: storage.get(REFRESH_TOKEN_KEY).unwrap_or_default(),
        });
        if restored.is_some() {
            tracing::debug!("Restored persisted credential");
        }

        Self {
            current: ArcSwapOption::new(restored.map(Arc::new)),
            storage,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryTokenStorage::new()))
    }

    pub fn current(&self) -> Option<Arc<Credential>> {
        self.current.load_full()
    }

    pub fn access_token(&self) -> Option<String> {
        self.current.load_full().map(|c| c.access_token.clone())
    }

    /// The refresh token, if one is held and non-empty.
    pub fn refresh_token(&self) -> Option<String> {
        self.current
            .load_full()
            .map(|c| c.refresh_token.clone())
            .filter(|t| !t.is_empty())
    }

    pub fn is_authenticated(&self) -> bool {
        self.current.load().is_some()
    }

    /// Replace the credential and persist it.
    pub fn set(&self, credential: Credential) {
        let persisted = self
            .storage
            .set(ACCESS_TOKEN_KEY, &credential.access_token)
            .and_then(|_| self.storage.set(REFRESH_TOKEN_KEY, &credential.refresh_token));
        if let Err(e) = persisted {
            tracing::warn!(error = %e, "Failed to persist credential");
        }
        self.current.store(Some(Arc::new(credential)));
    }

    /// Drop the credential from memory and storage.
    pub fn clear(&self) {
        self.current.store(None);
        let removed = self
            .storage
            .remove(ACCESS_TOKEN_KEY)
            .and_then(|_| self.storage.remove(REFRESH_TOKEN_KEY));
        if let Err(e) = removed {
            tracing::warn!(error = %e, "Failed to remove persisted credential");
        }
    }
}
