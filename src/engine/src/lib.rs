//! # Clearance Engine
//!
//! Hierarchical authorization engine: resolves effective permission sets
//! from a role hierarchy plus per-user overrides, renders them into
//! bounded claim payloads, keeps those claims synchronized with an
//! external identity provider, and enforces per-role request quotas.
//!
//! ## Architecture
//!
//! ```text
//! RoleHierarchy + PermissionCatalog     (static, loaded at startup)
//!         |
//! OverrideStore -> PermissionResolver -> ClaimSynthesizer -> SyncService
//!         |               |                                      |
//!         +---------- AuditLogger <-----------------------------+
//!
//! RateLimiter (consumes the resolved role, otherwise independent)
//! ```
//!
//! Authorization correctness never depends on the provider being
//! reachable: resolution is in-process, and provider pushes happen on an
//! asynchronous worker pool with retry, backoff, and read-path
//! reconciliation.

pub mod audit;
pub mod catalog;
pub mod claims;
pub mod engine;
pub mod error;
pub mod hierarchy;
pub mod overrides;
pub mod ratelimit;
pub mod resolver;
pub mod sync;
pub mod types;

pub use audit::{AuditEntry, AuditLogger, AuditOutcome, AuditRecord, AuditSink, InMemoryAuditSink};
pub use catalog::PermissionCatalog;
pub use claims::{ClaimConfig, ClaimPayload, ClaimSynthesizer};
pub use engine::{AuthorizationEngine, EngineConfig, EngineDeps};
pub use error::{EngineError, Result};
pub use hierarchy::{Role, RoleHierarchy};
pub use overrides::{InMemoryOverrideStore, NewOverride, Override, OverrideStore};
pub use ratelimit::{
    CounterStore, InMemoryCounterStore, RateDecision, RateLimitConfig, RateLimiter,
    RoleThresholds, Window, WindowUsage,
};
pub use resolver::{CacheConfig, EffectivePermissionSet, PermissionResolver};
pub use sync::{IdentityProvider, InMemoryIdentityProvider, SyncConfig, SyncResult, SyncService};
pub use types::{
    InMemoryUserDirectory, OverrideId, PermissionKey, UserDirectory, UserId, UserRecord,
};
