//! File Handle Cache
//!
//! Maps remote file handles to their resolved file objects so repeated
//! queries over the same store don't re-fetch every handle.
//!
//! Expiry is lazy: an entry's age is only checked when it is looked up, and
//! nothing is swept in the background. There is no size bound either; the
//! map grows to the number of distinct handles resolved during the process
//! lifetime (tens to low hundreds per store in practice).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use super::clock::{Clock, MonotonicClock};
use crate::gemini::{FileResolver, GeminiError};

/// Default time-to-live: one hour
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// A resolved handle and when it was fetched
struct CacheEntry<T> {
    resolved: Arc<T>,
    cached_at: Instant,
}

type Gate = Arc<tokio::sync::Mutex<()>>;

/// Holds one task's reference to a handle's in-flight gate. On drop, after a
/// finished or cancelled miss, the gate is removed from the map once no other
/// task holds it. Gate references are only cloned and dropped under the map
/// lock, so the count is exact there.
struct GateRelease<'a> {
    inflight: &'a Mutex<HashMap<String, Gate>>,
    handle: &'a str,
    gate: Gate,
}

impl Drop for GateRelease<'_> {
    fn drop(&mut self) {
        let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        drop(std::mem::take(&mut self.gate));
        if inflight
            .get(self.handle)
            .is_some_and(|current| Arc::strong_count(current) == 1)
        {
            inflight.remove(self.handle);
        }
    }
}

/// Snapshot of cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

impl CacheStats {
    /// Hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total > 0 {
            (self.hits as f64 / total as f64) * 100.0
        } else {
            0.0
        }
    }
}

/// Time-expiring cache in front of a [`FileResolver`]
pub struct HandleCache<R: FileResolver> {
    resolver: Arc<R>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, CacheEntry<R::Resolved>>>,
    /// Per-handle gates so concurrent misses on one handle fetch once
    inflight: Mutex<HashMap<String, Gate>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<R: FileResolver> HandleCache<R> {
    /// Create a cache with the default one hour TTL
    pub fn new(resolver: Arc<R>) -> Self {
        Self::with_clock(resolver, DEFAULT_TTL, Arc::new(MonotonicClock))
    }

    /// Create a cache with a TTL in seconds; zero or negative means every
    /// lookup goes to the resolver
    pub fn with_ttl_secs(resolver: Arc<R>, ttl_secs: i64) -> Self {
        let ttl = Duration::from_secs(ttl_secs.max(0) as u64);
        Self::with_clock(resolver, ttl, Arc::new(MonotonicClock))
    }

    /// Create a cache with an explicit TTL and time source
    pub fn with_clock(resolver: Arc<R>, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            resolver,
            ttl,
            clock,
            entries: Mutex::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<R::Resolved>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stored object for `handle` if its age is still under the TTL
    fn fresh(&self, handle: &str) -> Option<Arc<R::Resolved>> {
        let now = self.clock.now();
        self.entries().get(handle).and_then(|entry| {
            let age = now.saturating_duration_since(entry.cached_at);
            (age < self.ttl).then(|| Arc::clone(&entry.resolved))
        })
    }

    fn gate(&self, handle: &str) -> Gate {
        let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(inflight.entry(handle.to_string()).or_default())
    }

    fn hit(&self, handle: &str, resolved: Arc<R::Resolved>) -> Arc<R::Resolved> {
        self.hits.fetch_add(1, Ordering::Relaxed);
        trace!(handle = handle, "Handle cache HIT");
        resolved
    }

    /// Resolve a handle, going to the remote service only on a miss or
    /// after the entry has expired
    ///
    /// Failures propagate unchanged and leave no entry behind, so the next
    /// call retries against the resolver.
    pub async fn resolve(&self, handle: &str) -> Result<Arc<R::Resolved>, GeminiError> {
        if let Some(resolved) = self.fresh(handle) {
            return Ok(self.hit(handle, resolved));
        }

        let release = GateRelease {
            inflight: &self.inflight,
            handle,
            gate: self.gate(handle),
        };
        let _guard = release.gate.lock().await;

        // Another task may have filled the entry while we waited on the gate
        if let Some(resolved) = self.fresh(handle) {
            return Ok(self.hit(handle, resolved));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        trace!(handle = handle, "Handle cache MISS");

        let cached_at = self.clock.now();
        let outcome = self.resolver.resolve_handle(handle).await;

        match outcome {
            Ok(resolved) => {
                let resolved = Arc::new(resolved);
                self.entries().insert(
                    handle.to_string(),
                    CacheEntry {
                        resolved: Arc::clone(&resolved),
                        cached_at,
                    },
                );
                debug!(handle = handle, "Cached resolved file handle");
                Ok(resolved)
            }
            Err(e) => {
                debug!(handle = handle, error = %e, "Handle resolution failed, not cached");
                Err(e)
            }
        }
    }

    /// Drop one entry so its next lookup goes to the resolver
    pub fn invalidate(&self, handle: &str) {
        if self.entries().remove(handle).is_some() {
            trace!(handle = handle, "Invalidated handle");
        }
    }

    /// Drop every entry regardless of age
    pub fn invalidate_all(&self) {
        let mut entries = self.entries();
        let dropped = entries.len();
        entries.clear();
        debug!(dropped = dropped, "Cleared handle cache");
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }

    /// Log current cache metrics
    pub fn log_metrics(&self) {
        let stats = self.stats();
        debug!(
            hits = stats.hits,
            misses = stats.misses,
            hit_rate = format!("{:.1}%", stats.hit_rate()),
            entries = stats.entries,
            ttl_secs = self.ttl.as_secs(),
            "Handle cache metrics"
        );
    }
}
