//! In-memory response cache with TTL and tag invalidation.

use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use crate::observability::metrics;

/// A cached response payload.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub payload: Value,
    pub stored_at: Instant,
    pub ttl: Duration,
    pub tags: HashSet<String>,
}

impl CacheEntry {
    /// Valid while `now - stored_at <= ttl`.
    pub fn is_valid(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) <= self.ttl
    }

    fn has_any_tag(&self, tags: &HashSet<&str>) -> bool {
        self.tags.iter().any(|t| tags.contains(t.as_str()))
    }
}

type Entries = DashMap<String, CacheEntry>;

/// Snapshot of how often a set of tags has been invalidated.
///
/// Taken before a response is fetched and checked before it is stored, so a
/// response fetched across an invalidation never lands in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Generation(u64);

/// A thread-safe response cache.
///
/// Cloning is cheap; clones share the same entries.
#[derive(Clone)]
pub struct CacheStore {
    entries: Arc<Entries>,
    /// Invalidation count per tag.
    generations: Arc<DashMap<String, u64>>,
    /// Bumped by invalidations that are not tag-scoped (pattern, clear).
    epoch: Arc<AtomicU64>,
    default_ttl: Duration,
}

impl CacheStore {
    /// Create an empty cache with the TTL used when callers omit one.
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            generations: Arc::new(DashMap::new()),
            epoch: Arc::new(AtomicU64::new(0)),
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Look up a payload. Expired entries are evicted and reported as a miss.
    pub fn get(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        {
            let entry = self.entries.get(key)?;
            if entry.is_valid(now) {
                return Some(entry.payload.clone());
            }
        }

        if self.entries.remove_if(key, |_, e| !e.is_valid(now)).is_some() {
            tracing::debug!(key = %key, "Evicted expired cache entry on read");
            metrics::record_cache_eviction("expired_on_read", 1);
        }
        None
    }

    /// Store a payload, replacing any previous entry for the key.
    pub fn set<I, S>(&self, key: impl Into<String>, payload: Value, ttl: Option<Duration>, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tags = tags.into_iter().map(Into::into).collect();
        self.entries.insert(key.into(), self.entry(payload, ttl, tags));
    }

    /// Current generation of `tags`. Changes whenever any of them is
    /// invalidated, or the cache is cleared or pattern-invalidated.
    pub fn generation<S: AsRef<str>>(&self, tags: &[S]) -> Generation {
        let tagged: u64 = tags
            .iter()
            .filter_map(|t| self.generations.get(t.as_ref()).map(|g| *g))
            .sum();
        Generation(self.epoch.load(Ordering::SeqCst).wrapping_add(tagged))
    }

    /// Store a payload only if its tags are still at `seen`.
    ///
    /// Returns `false` when an invalidation happened after `seen` was taken;
    /// the payload is then dropped.
    pub fn set_if_current(
        &self,
        key: impl Into<String>,
        payload: Value,
        ttl: Option<Duration>,
        tags: Vec<String>,
        seen: Generation,
    ) -> bool {
        // Holding the key's slot keeps a concurrent invalidation's retain pass
        // behind this write; generations are bumped before that pass runs.
        let slot = self.entries.entry(key.into());
        if self.generation(&tags) != seen {
            return false;
        }
        slot.insert(self.entry(payload, ttl, tags));
        true
    }

    fn entry(&self, payload: Value, ttl: Option<Duration>, tags: Vec<String>) -> CacheEntry {
        CacheEntry {
            payload,
            stored_at: Instant::now(),
            ttl: ttl.unwrap_or(self.default_ttl),
            tags: tags.into_iter().collect(),
        }
    }

    /// Remove every entry carrying at least one of `tags`.
    ///
    /// The tags' generations advance even when nothing is removed, so
    /// responses still in flight for them are not stored.
    pub fn invalidate_tags<S: AsRef<str>>(&self, tags: &[S]) -> usize {
        if tags.is_empty() {
            return 0;
        }
        let wanted: HashSet<&str> = tags.iter().map(AsRef::as_ref).collect();
        for tag in &wanted {
            *self.generations.entry((*tag).to_string()).or_insert(0) += 1;
        }
        let removed = retain_counting(&self.entries, |_, e| !e.has_any_tag(&wanted));
        if removed > 0 {
            tracing::debug!(tags = ?wanted, removed, "Invalidated cache entries by tag");
            metrics::record_cache_eviction("tag", removed);
        }
        removed
    }

    /// Remove every entry whose key contains `pattern`.
    pub fn invalidate_pattern(&self, pattern: &str) -> usize {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let removed = retain_counting(&self.entries, |k, _| !k.contains(pattern));
        if removed > 0 {
            tracing::debug!(pattern = %pattern, removed, "Invalidated cache entries by pattern");
            metrics::record_cache_eviction("pattern", removed);
        }
        removed
    }

    /// Drop all entries.
    pub fn clear(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.entries.clear();
    }

    /// Remove every expired entry.
    pub fn sweep_expired(&self) -> usize {
        sweep(&self.entries)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Spawn the periodic expiry sweep.
    ///
    /// The task exits on shutdown or once every clone of the store is dropped.
    pub fn spawn_sweeper(
        &self,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let entries: Weak<Entries> = Arc::downgrade(&self.entries);

        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(entries) = entries.upgrade() else {
                            break;
                        };
                        let removed = sweep(&entries);
                        if removed > 0 {
                            tracing::debug!(removed, "Cache sweep evicted expired entries");
                        }
                    }
                    _ = shutdown.recv() => {
                        tracing::debug!("Cache sweeper received shutdown signal, exiting loop");
                        break;
                    }
                }
            }
        })
    }
}

fn sweep(entries: &Entries) -> usize {
    let now = Instant::now();
    let removed = retain_counting(entries, |_, e| e.is_valid(now));
    if removed > 0 {
        metrics::record_cache_eviction("sweep", removed);
    }
    removed
}

fn retain_counting<F>(entries: &Entries, mut keep: F) -> usize
where
    F: FnMut(&String, &CacheEntry) -> bool,
{
    let mut removed = 0;
    entries.retain(|k, e| {
        let kept = keep(k, e);
        if !kept {
            removed += 1;
        }
        kept
    });
    removed
}
