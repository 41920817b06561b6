//! Authorization engine: orchestrates the directory, hierarchy, override
//! store, resolver, claim synthesizer, sync service, rate limiter, and
//! audit log
//!
//! # Data flow
//!
//! ```text
//! admin mutation -> OverrideStore -> PermissionResolver (recompute)
//!                                        |  hash changed?
//!                                        v
//!                              ClaimSynthesizer -> SyncService -> provider
//!                                        |
//!                                   [Audit Log]
//! ```
//!
//! A mutation returns to its caller as soon as the new effective set and
//! version exist; the provider push happens on the sync workers.

use crate::audit::{AuditEntry, AuditLogger, AuditOutcome, AuditSink};
use crate::catalog::PermissionCatalog;
use crate::claims::{ClaimConfig, ClaimPayload, ClaimSynthesizer};
use crate::error::{EngineError, Result};
use crate::hierarchy::{Role, RoleHierarchy};
use crate::overrides::{self, NewOverride, Override, OverrideStore};
use crate::ratelimit::{CounterStore, RateDecision, RateLimitConfig, RateLimiter, WindowUsage};
use crate::resolver::{CacheConfig, EffectivePermissionSet, PermissionResolver};
use crate::sync::{IdentityProvider, SyncConfig, SyncService};
use crate::types::{PermissionKey, UserDirectory, UserRecord};
use std::sync::Arc;
use tracing::{debug, info};

/// Engine configuration
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Effective-set cache settings
    pub cache: CacheConfig,

    /// Sync worker pool settings
    pub sync: SyncConfig,

    /// Claim payload settings
    pub claims: ClaimConfig,

    /// Role quota table
    pub rate_limits: RateLimitConfig,
}

/// External collaborators the engine is wired to
pub struct EngineDeps {
    pub directory: Arc<dyn UserDirectory>,
    pub overrides: Arc<dyn OverrideStore>,
    pub provider: Arc<dyn IdentityProvider>,
    pub counters: Arc<dyn CounterStore>,
    pub audit_sink: Arc<dyn AuditSink>,
}

/// The authorization engine
pub struct AuthorizationEngine {
    directory: Arc<dyn UserDirectory>,
    hierarchy: Arc<RoleHierarchy>,
    catalog: Arc<PermissionCatalog>,
    overrides: Arc<dyn OverrideStore>,
    resolver: Arc<PermissionResolver>,
    synthesizer: Arc<ClaimSynthesizer>,
    sync: SyncService,
    limiter: RateLimiter,
    audit: Arc<AuditLogger>,
}

impl AuthorizationEngine {
    /// Wire up the engine and start the sync workers
    pub fn new(
        config: EngineConfig,
        catalog: PermissionCatalog,
        hierarchy: RoleHierarchy,
        deps: EngineDeps,
    ) -> Self {
        let catalog = Arc::new(catalog);
        let hierarchy = Arc::new(hierarchy);

        let resolver = Arc::new(PermissionResolver::new(
            deps.directory.clone(),
            hierarchy.clone(),
            catalog.clone(),
            deps.overrides.clone(),
            config.cache,
        ));

        let synthesizer = Arc::new(ClaimSynthesizer::new(hierarchy.clone(), config.claims));
        let audit = Arc::new(AuditLogger::new(deps.audit_sink));

        let sync = SyncService::spawn(
            deps.provider,
            resolver.clone(),
            deps.directory.clone(),
            synthesizer.clone(),
            audit.clone(),
            config.sync,
        );

        let limiter = RateLimiter::new(deps.counters, config.rate_limits);

        info!("authorization engine initialized");

        Self {
            directory: deps.directory,
            hierarchy,
            catalog,
            overrides: deps.overrides,
            resolver,
            synthesizer,
            sync,
            limiter,
            audit,
        }
    }

    /// Create an override on behalf of an administrator
    ///
    /// The actor must sit strictly above the target user's role; denied
    /// attempts are audited. Validation against the catalog happens before
    /// anything is stored, so a malformed override is never partially
    /// applied.
    pub async fn create_override(&self, actor_id: &str, new: NewOverride) -> Result<Override> {
        let actor = self.require_user(actor_id).await?;
        let target = self.require_user(&new.user_id).await?;

        overrides::validate_override(&self.catalog, &new)?;

        if !self.hierarchy.can_assign(actor.role, target.role) {
            self.audit
                .record(
                    AuditEntry::new(actor_id, "override.create", "override", AuditOutcome::Denied)
                        .after(serde_json::json!({
                            "user_id": new.user_id,
                            "key": new.key.to_string(),
                            "granted": new.granted,
                        })),
                )
                .await;
            return Err(EngineError::Authorization(format!(
                "role {} cannot modify permissions of role {}",
                actor.role, target.role
            )));
        }

        let record = self.overrides.create(new).await?;

        self.audit
            .record(
                AuditEntry::new(actor_id, "override.create", "override", AuditOutcome::Success)
                    .resource(&record.id)
                    .after(serde_json::to_value(&record).unwrap_or_default()),
            )
            .await;

        self.propagate(&record.user_id).await?;
        Ok(record)
    }

    /// Revoke an override; revoking twice is a no-op success
    pub async fn revoke_override(&self, actor_id: &str, override_id: &str) -> Result<Override> {
        let actor = self.require_user(actor_id).await?;
        let existing = self
            .overrides
            .get(override_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("override {}", override_id)))?;
        let target = self.require_user(&existing.user_id).await?;

        if !self.hierarchy.can_assign(actor.role, target.role) {
            self.audit
                .record(
                    AuditEntry::new(actor_id, "override.revoke", "override", AuditOutcome::Denied)
                        .resource(override_id),
                )
                .await;
            return Err(EngineError::Authorization(format!(
                "role {} cannot modify permissions of role {}",
                actor.role, target.role
            )));
        }

        let record = self.overrides.revoke(override_id, actor_id).await?;

        self.audit
            .record(
                AuditEntry::new(actor_id, "override.revoke", "override", AuditOutcome::Success)
                    .resource(override_id)
                    .before(serde_json::to_value(&existing).unwrap_or_default())
                    .after(serde_json::to_value(&record).unwrap_or_default()),
            )
            .await;

        self.propagate(&record.user_id).await?;
        Ok(record)
    }

    /// Assign a new role to a user
    ///
    /// The actor must sit strictly above both the user's current role and
    /// the new role.
    pub async fn assign_role(&self, actor_id: &str, user_id: &str, new_role: Role) -> Result<UserRecord> {
        let actor = self.require_user(actor_id).await?;
        let target = self.require_user(user_id).await?;

        if !self.hierarchy.can_assign(actor.role, target.role)
            || !self.hierarchy.can_assign(actor.role, new_role)
        {
            self.audit
                .record(
                    AuditEntry::new(actor_id, "role.assign", "user", AuditOutcome::Denied)
                        .resource(user_id)
                        .after(serde_json::json!({ "role": new_role })),
                )
                .await;
            return Err(EngineError::Authorization(format!(
                "role {} cannot assign role {} (target currently {})",
                actor.role, new_role, target.role
            )));
        }

        let previous = self.directory.set_role(user_id, new_role).await?;

        self.audit
            .record(
                AuditEntry::new(actor_id, "role.assign", "user", AuditOutcome::Success)
                    .resource(user_id)
                    .before(serde_json::json!({ "role": previous.role }))
                    .after(serde_json::json!({ "role": new_role })),
            )
            .await;

        self.propagate(user_id).await?;
        self.directory
            .get(user_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("user {}", user_id)))
    }

    /// Resolve a user's effective permissions (read path)
    ///
    /// Also retries any pending provider sync for the subject, so a
    /// degraded push heals on the next read.
    pub async fn effective_permissions(&self, user_id: &str) -> Result<EffectivePermissionSet> {
        self.sync.reconcile(user_id);

        match self.resolver.resolve(user_id).await {
            Ok(set) => Ok(set),
            Err(e) => {
                // Fail closed and leave a trace; no fallback to defaults.
                self.audit
                    .record(
                        AuditEntry::new(user_id, "permissions.resolve", "user", AuditOutcome::Failure)
                            .resource(user_id),
                    )
                    .await;
                Err(e)
            }
        }
    }

    /// Check a single capability, fail-closed, with the decision audited
    pub async fn check(&self, user_id: &str, key: &PermissionKey) -> bool {
        let allowed = match self.resolver.resolve(user_id).await {
            Ok(set) => set.allows(key),
            Err(_) => false,
        };

        self.audit
            .record(
                AuditEntry::new(
                    user_id,
                    "permission.check",
                    "permission",
                    if allowed {
                        AuditOutcome::Success
                    } else {
                        AuditOutcome::Denied
                    },
                )
                .resource(key.to_string()),
            )
            .await;

        allowed
    }

    /// Synthesize the current claim payload for a subject
    pub async fn claims(&self, user_id: &str) -> Result<ClaimPayload> {
        let user = self.require_user(user_id).await?;
        let set = self.resolver.resolve(user_id).await?;
        self.synthesizer.synthesize(&user, &set)
    }

    /// Enforce the subject's quota; `Err(RateLimitExceeded)` maps to 429
    pub async fn check_rate_limit(&self, user_id: &str) -> Result<()> {
        let user = self.require_user(user_id).await?;

        match self.limiter.allow(user_id, user.role) {
            RateDecision::Allowed => Ok(()),
            RateDecision::Limited {
                window,
                usage,
                limit,
                retry_after_seconds,
            } => {
                debug!(user_id, %window, usage, limit, "rate limited");
                Err(EngineError::RateLimitExceeded {
                    window,
                    usage,
                    limit,
                    retry_after_seconds,
                })
            }
        }
    }

    /// Side-effect-free quota snapshot
    pub async fn rate_status(&self, user_id: &str) -> Result<Vec<WindowUsage>> {
        let user = self.require_user(user_id).await?;
        Ok(self.limiter.status(user_id, user.role))
    }

    /// The audit logger (for missed-record introspection)
    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    /// The sync service handle
    pub fn sync(&self) -> &SyncService {
        &self.sync
    }

    /// The resolver (for cache statistics)
    pub fn resolver(&self) -> &PermissionResolver {
        &self.resolver
    }

    /// Stop the sync workers after draining the queue
    pub async fn shutdown(self) {
        self.sync.shutdown().await;
    }

    /// Recompute after a mutation; a hash change enqueues a provider sync
    async fn propagate(&self, user_id: &str) -> Result<()> {
        let (set, changed) = self.resolver.recompute(user_id).await?;
        if changed {
            debug!(user_id, version = set.version, "effective set changed, scheduling sync");
            self.sync.enqueue(user_id, set.version);
        }
        Ok(())
    }

    async fn require_user(&self, user_id: &str) -> Result<UserRecord> {
        self.directory
            .get(user_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("user {}", user_id)))
    }
}
