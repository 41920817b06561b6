//! Permission resolver: role defaults plus overrides, reduced to one
//! effective permission set per user
//!
//! Resolution is deterministic and cache-friendly: the same directory,
//! hierarchy, and override state always produces the same sorted set and
//! the same hash. The per-user version bumps only when the hash changes,
//! which is what triggers claim re-synthesis and a provider sync.

pub mod cache;

pub use cache::{CacheConfig, CacheStats, EffectiveSetCache};

use crate::catalog::PermissionCatalog;
use crate::error::{EngineError, Result};
use crate::hierarchy::{Role, RoleHierarchy};
use crate::overrides::OverrideStore;
use crate::types::{PermissionKey, UserDirectory};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// The fully resolved, deduplicated permission set for one user at one
/// point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectivePermissionSet {
    /// User the set belongs to
    pub user_id: String,

    /// Role the set was derived from
    pub role: Role,

    /// Concrete permission keys, sorted (no wildcards)
    pub permissions: BTreeSet<PermissionKey>,

    /// blake3 fingerprint over role and sorted permissions (hex)
    pub hash: String,

    /// Per-user monotonic version; bumps only when the hash changes
    pub version: u64,

    /// When this set was computed
    pub computed_at: DateTime<Utc>,
}

impl EffectivePermissionSet {
    /// Whether the set grants a concrete capability
    pub fn allows(&self, key: &PermissionKey) -> bool {
        self.permissions.contains(key)
    }
}

/// Fingerprint of a role plus a sorted permission set
///
/// The hash covers the role name and every key in sorted order, with
/// separators so `("a", "bc")` and `("ab", "c")` cannot collide.
pub fn permission_hash(role: Role, permissions: &BTreeSet<PermissionKey>) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(role.as_str().as_bytes());
    hasher.update(&[0x1e]);
    for key in permissions {
        hasher.update(key.resource.as_bytes());
        hasher.update(&[0x1f]);
        hasher.update(key.action.as_bytes());
        hasher.update(&[0x1e]);
    }
    hasher.finalize().to_hex().to_string()
}

/// Resolves effective permission sets with caching and per-user
/// single-flight
///
/// Safe to call concurrently for different users; for the same user,
/// duplicate concurrent calls await the one in-flight computation instead
/// of recomputing.
pub struct PermissionResolver {
    directory: Arc<dyn UserDirectory>,
    hierarchy: Arc<RoleHierarchy>,
    catalog: Arc<PermissionCatalog>,
    overrides: Arc<dyn OverrideStore>,
    cache: EffectiveSetCache,

    /// Per-user computation gates for single-flight; one entry per user
    /// ever resolved, bounded by the directory population
    inflight: DashMap<String, Arc<Mutex<()>>>,
}

impl PermissionResolver {
    /// Create a new resolver
    pub fn new(
        directory: Arc<dyn UserDirectory>,
        hierarchy: Arc<RoleHierarchy>,
        catalog: Arc<PermissionCatalog>,
        overrides: Arc<dyn OverrideStore>,
        cache_config: CacheConfig,
    ) -> Self {
        Self {
            directory,
            hierarchy,
            catalog,
            overrides,
            cache: EffectiveSetCache::new(cache_config),
            inflight: DashMap::new(),
        }
    }

    /// Resolve a user's effective permission set, serving from cache when
    /// fresh
    ///
    /// Unknown users fail closed with `NotFound`: no fallback to role
    /// defaults, no partial set.
    pub async fn resolve(&self, user_id: &str) -> Result<EffectivePermissionSet> {
        if let Some(hit) = self.cache.get(user_id) {
            return Ok(hit);
        }

        let gate = self.gate(user_id);
        let _guard = gate.lock().await;

        // Recheck under the gate: the winning caller already cached it.
        if let Some(hit) = self.cache.get(user_id) {
            return Ok(hit);
        }

        let (set, _changed) = self.compute(user_id).await?;
        Ok(set)
    }

    /// Invalidate and recompute after an override mutation
    ///
    /// Returns the fresh set and whether the hash (and therefore the
    /// version) changed, which callers use to trigger a provider sync.
    pub async fn recompute(&self, user_id: &str) -> Result<(EffectivePermissionSet, bool)> {
        let gate = self.gate(user_id);
        let _guard = gate.lock().await;

        self.cache.invalidate(user_id);
        self.compute(user_id).await
    }

    /// Drop a user's cached set without recomputing
    pub fn invalidate(&self, user_id: &str) {
        self.cache.invalidate(user_id);
    }

    /// Current version counter for a user (0 when never resolved)
    pub fn version(&self, user_id: &str) -> u64 {
        self.cache.version(user_id)
    }

    /// Cache statistics
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    fn gate(&self, user_id: &str) -> Arc<Mutex<()>> {
        self.inflight
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    /// Compute the effective set; callers hold the user's gate
    async fn compute(&self, user_id: &str) -> Result<(EffectivePermissionSet, bool)> {
        let user = self
            .directory
            .get(user_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("user {}", user_id)))?;

        // Start from the role's wildcard-expanded defaults.
        let mut permissions = self.hierarchy.default_permissions(user.role).clone();

        // Apply active overrides, oldest first. list_active already reduced
        // each key to its latest entry, so later keys always win.
        let active = self.overrides.list_active(user_id).await?;
        for record in &active {
            let expanded = self.catalog.expand(&record.key);
            if record.granted {
                permissions.extend(expanded);
            } else {
                for key in &expanded {
                    permissions.remove(key);
                }
            }
        }

        let hash = permission_hash(user.role, &permissions);
        let (version, changed) = self.cache.advance(user_id, &hash);

        let set = EffectivePermissionSet {
            user_id: user_id.to_string(),
            role: user.role,
            permissions,
            hash,
            version,
            computed_at: Utc::now(),
        };

        debug!(
            user_id,
            version,
            changed,
            overrides = active.len(),
            permissions = set.permissions.len(),
            "resolved effective permission set"
        );

        self.cache.put(set.clone());
        Ok((set, changed))
    }
}
