//! Cache key derivation.
//!
//! Keys have the canonical form `"{METHOD} {path}?{query}"` where query pairs
//! are sorted and form-encoded, so parameter order and inline-vs-separate
//! query parameters never produce distinct keys.

use reqwest::Method;
use std::collections::BTreeMap;
use std::fmt;
use url::form_urlencoded;

use crate::http::ApiRequest;

/// A cache (and coalescing) key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive a key from request components, or take the override verbatim.
    pub fn derive(
        method: &Method,
        path: &str,
        query: &BTreeMap<String, String>,
        override_key: Option<&str>,
    ) -> Self {
        if let Some(key) = override_key {
            return Self(key.to_string());
        }

        let (path, inline) = match path.split_once('?') {
            Some((p, q)) => (p, Some(q)),
            None => (path, None),
        };

        let mut pairs: Vec<(String, String)> = inline
            .map(|q| form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default();
        pairs.extend(query.iter().map(|(k, v)| (k.clone(), v.clone())));
        pairs.sort();
        pairs.dedup();

        let path = normalize_path(path);
        if pairs.is_empty() {
            return Self(format!("{} {}", method, path));
        }

        let encoded = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
        Self(format!("{} {}?{}", method, path, encoded))
    }

    /// Key for a logical request, honoring its cache override.
    pub fn for_request(request: &ApiRequest) -> Self {
        let override_key = request.cache.as_ref().and_then(|c| c.key.as_deref());
        Self::derive(&request.method, &request.path, &request.query, override_key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}
