//! Request coalescing (single-flight).
//!
//! # Responsibilities
//! - Track in-flight calls by key
//! - Hand every concurrent caller for a key the same shared future
//! - Deregister the call when it settles, before waiters observe the result
//!
//! # Design Decisions
//! - The first caller's closure builds the future; later callers never run it
//! - Registration and lookup happen under one map entry lock, so at most one
//!   call per key is ever in flight
//! - Cancellation is not supported: if every waiter is dropped, the shared
//!   future stays registered until a later caller drives it to completion
//! - A call carries a stamp; callers only join a call with an equal stamp. A
//!   call with a stale stamp is replaced and finishes for its own waiters only

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::ApiError;
use crate::observability::metrics;

type SharedCall<T> = Shared<BoxFuture<'static, Result<T, ApiError>>>;

struct InFlight<T, S> {
    id: u64,
    stamp: S,
    call: SharedCall<T>,
}

/// De-duplicates concurrent identical calls.
pub struct RequestCoalescer<K, T, S = ()>
where
    K: Eq + Hash,
{
    pending: Arc<DashMap<K, InFlight<T, S>>>,
    next_id: AtomicU64,
}

impl<K, T, S> RequestCoalescer<K, T, S>
where
    K: Eq + Hash + Clone + std::fmt::Display + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
    S: PartialEq + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Run `call` for `key`, or join the call already in flight for it.
    pub async fn run<F, Fut>(&self, key: K, call: F) -> Result<T, ApiError>
    where
        S: Default,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        self.run_stamped(key, S::default(), call).await
    }

    /// Like [`run`](Self::run), but only joins a call registered with an
    /// equal `stamp`. A call with a different stamp is superseded: later
    /// callers get a fresh call, earlier waiters keep their own result.
    pub async fn run_stamped<F, Fut>(&self, key: K, stamp: S, call: F) -> Result<T, ApiError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        let shared = match self.pending.entry(key.clone()) {
            Entry::Occupied(entry) if entry.get().stamp == stamp => {
                tracing::debug!(key = %key, "Joining in-flight request");
                metrics::record_coalesced();
                entry.get().call.clone()
            }
            entry => {
                if matches!(entry, Entry::Occupied(_)) {
                    tracing::debug!(key = %key, "In-flight request is stale, starting a new one");
                }
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let pending = Arc::clone(&self.pending);
                let fut = call();
                let shared = async move {
                    let result = fut.await;
                    pending.remove_if(&key, |_, current| current.id == id);
                    result
                }
                .boxed()
                .shared();
                entry.insert(InFlight {
                    id,
                    stamp,
                    call: shared.clone(),
                });
                shared
            }
        };

        shared.await
    }

    /// Number of keys with a call in flight.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.pending.contains_key(key)
    }
}

impl<K, T, S> Default for RequestCoalescer<K, T, S>
where
    K: Eq + Hash + Clone + std::fmt::Display + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
    S: PartialEq + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
