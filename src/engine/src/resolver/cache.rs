//! Per-user effective-set cache with TTL and explicit invalidation
//!
//! Only the resolver writes entries; everything else reads. The hash and
//! version fingerprint is kept separately from the cached set so eviction
//! or TTL expiry never resets a user's monotonic version or forces a
//! spurious version bump on an unchanged set.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::EffectivePermissionSet;

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of cached users
    pub capacity: usize,

    /// Time-to-live safety net for cached sets
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            ttl: Duration::from_secs(300),
        }
    }
}

#[derive(Clone)]
struct CachedEntry {
    set: EffectivePermissionSet,
    cached_at: Instant,
}

impl CachedEntry {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.cached_at.elapsed() > ttl
    }
}

/// Last observed hash and version for one user
#[derive(Debug, Clone)]
struct Fingerprint {
    hash: String,
    version: u64,
}

/// Thread-safe cache of effective permission sets keyed by user
pub struct EffectiveSetCache {
    entries: Arc<DashMap<String, CachedEntry>>,

    /// Per-user fingerprints; survive entry eviction and are never removed,
    /// since dropping one would reset that user's monotonic version
    fingerprints: Arc<DashMap<String, Fingerprint>>,

    config: CacheConfig,
    stats: Arc<DashMap<&'static str, usize>>,
}

impl EffectiveSetCache {
    /// Create a new cache
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            fingerprints: Arc::new(DashMap::new()),
            config,
            stats: Arc::new(DashMap::new()),
        }
    }

    /// Get a fresh cached set for a user, honoring the TTL
    pub fn get(&self, user_id: &str) -> Option<EffectivePermissionSet> {
        if let Some(entry) = self.entries.get(user_id) {
            if entry.is_expired(self.config.ttl) {
                drop(entry);
                self.entries.remove(user_id);
                self.bump("expirations");
                return None;
            }
            self.bump("hits");
            return Some(entry.set.clone());
        }
        self.bump("misses");
        None
    }

    /// Current version counter for a user (0 when never resolved)
    pub fn version(&self, user_id: &str) -> u64 {
        self.fingerprints.get(user_id).map(|f| f.version).unwrap_or(0)
    }

    /// Record a freshly computed hash, bumping the version only on change
    ///
    /// Returns `(version, changed)`. The version is monotonic per user and
    /// increments exactly when the hash differs from the last observation.
    pub fn advance(&self, user_id: &str, hash: &str) -> (u64, bool) {
        let mut entry = self
            .fingerprints
            .entry(user_id.to_string())
            .or_insert(Fingerprint {
                hash: String::new(),
                version: 0,
            });

        if entry.hash == hash {
            (entry.version, false)
        } else {
            entry.hash = hash.to_string();
            entry.version += 1;
            (entry.version, true)
        }
    }

    /// Store a freshly computed set
    pub fn put(&self, set: EffectivePermissionSet) {
        if self.entries.len() >= self.config.capacity {
            self.evict_some();
        }
        self.entries.insert(
            set.user_id.clone(),
            CachedEntry {
                set,
                cached_at: Instant::now(),
            },
        );
    }

    /// Drop one user's entry; the fingerprint stays
    pub fn invalidate(&self, user_id: &str) {
        self.entries.remove(user_id);
        self.bump("invalidations");
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.stat("hits"),
            misses: self.stat("misses"),
            expirations: self.stat("expirations"),
            invalidations: self.stat("invalidations"),
            entries: self.entries.len(),
        }
    }

    fn evict_some(&self) {
        // Shed roughly 10% when full; entries are recomputed lazily.
        let to_remove = (self.config.capacity / 10).max(1);
        let mut removed = 0;
        self.entries.retain(|_, _| {
            if removed < to_remove {
                removed += 1;
                false
            } else {
                true
            }
        });
    }

    fn bump(&self, key: &'static str) {
        self.stats
            .entry(key)
            .and_modify(|count| *count += 1)
            .or_insert(1);
    }

    fn stat(&self, key: &'static str) -> usize {
        self.stats.get(key).map(|v| *v).unwrap_or(0)
    }
}

/// Cache statistics
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub expirations: usize,
    pub invalidations: usize,
    pub entries: usize,
}
