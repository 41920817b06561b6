//! Claim synthesis: rendering an effective permission set into the
//! bounded payload the downstream data-access layer consumes
//!
//! The payload is hash-only: it carries the permission hash and
//! version as a capability fingerprint, never the raw set. Downstream
//! layers fetch the full set out of band when their cached copy does not
//! match the hash. The provider's size ceiling is configuration, and an
//! over-ceiling payload is an error, never a truncation.

use crate::error::{EngineError, Result};
use crate::hierarchy::{Role, RoleHierarchy};
use crate::resolver::EffectivePermissionSet;
use crate::types::UserRecord;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// Claim synthesis configuration
#[derive(Debug, Clone)]
pub struct ClaimConfig {
    /// Provider-imposed ceiling on the serialized payload, in bytes
    ///
    /// 8 KiB matches the app-metadata limit of common identity providers;
    /// deployments override it from provider documentation.
    pub max_payload_bytes: usize,
}

impl Default for ClaimConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: 8 * 1024,
        }
    }
}

/// The bounded, signed claim document handed to the enforcement layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimPayload {
    /// Subject identifier (the user id)
    pub subject_id: String,

    /// Primary role
    pub role: Role,

    /// Every role the subject may act as (at or below its level)
    pub allowed_roles: Vec<Role>,

    /// Capability fingerprint of the effective permission set
    pub permission_hash: String,

    /// Monotonic version of the effective permission set
    pub permission_version: u64,

    /// Organization, when the subject belongs to one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,

    /// Direct manager, when the subject has one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manager_id: Option<String>,

    /// Staff flag
    pub is_staff: bool,
}

/// Renders effective permission sets into claim payloads
pub struct ClaimSynthesizer {
    hierarchy: Arc<RoleHierarchy>,
    config: ClaimConfig,
}

impl ClaimSynthesizer {
    /// Create a new synthesizer
    pub fn new(hierarchy: Arc<RoleHierarchy>, config: ClaimConfig) -> Self {
        Self { hierarchy, config }
    }

    /// Synthesize the claim payload for a user's effective set
    ///
    /// Deterministic: the same user record and set always serialize to the
    /// same bytes. Size validation happens before return; an over-ceiling
    /// payload is `PayloadTooLarge`, surfaced rather than truncated,
    /// because losing permissions silently is a data error worth alerting
    /// on.
    pub fn synthesize(
        &self,
        user: &UserRecord,
        set: &EffectivePermissionSet,
    ) -> Result<ClaimPayload> {
        let payload = ClaimPayload {
            subject_id: set.user_id.clone(),
            role: set.role,
            allowed_roles: self.hierarchy.allowed_roles(set.role),
            permission_hash: set.hash.clone(),
            permission_version: set.version,
            organization_id: user.organization_id.clone(),
            manager_id: user.manager_id.clone(),
            is_staff: user.is_staff,
        };

        let size = self.serialized_size(&payload)?;
        if size > self.config.max_payload_bytes {
            warn!(
                subject_id = %payload.subject_id,
                size,
                ceiling = self.config.max_payload_bytes,
                "claim payload exceeds provider ceiling"
            );
            return Err(EngineError::PayloadTooLarge {
                size,
                ceiling: self.config.max_payload_bytes,
            });
        }

        Ok(payload)
    }

    fn serialized_size(&self, payload: &ClaimPayload) -> Result<usize> {
        let bytes = serde_json::to_vec(payload)
            .map_err(|e| EngineError::Internal(format!("claim serialization failed: {}", e)))?;
        Ok(bytes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::PermissionCatalog;
    use crate::types::PermissionKey;
    use chrono::Utc;
    use std::collections::BTreeSet;

    fn hierarchy() -> Arc<RoleHierarchy> {
        let catalog = PermissionCatalog::new([("reports", vec!["read"])]);
        Arc::new(
            RoleHierarchy::new(
                &catalog,
                Role::ALL.map(|r| (r, vec![PermissionKey::new("reports", "read")])),
            )
            .unwrap(),
        )
    }

    fn effective_set(user: &str, role: Role) -> EffectivePermissionSet {
        let permissions: BTreeSet<PermissionKey> =
            [PermissionKey::new("reports", "read")].into_iter().collect();
        EffectivePermissionSet {
            user_id: user.to_string(),
            role,
            hash: crate::resolver::permission_hash(role, &permissions),
            permissions,
            version: 3,
            computed_at: Utc::now(),
        }
    }

    #[test]
    fn test_synthesize_carries_identity_fields() {
        let synthesizer = ClaimSynthesizer::new(hierarchy(), ClaimConfig::default());
        let user = UserRecord::new("u1", Role::Manager)
            .with_organization("org-9")
            .with_manager("u0")
            .staff();
        let set = effective_set("u1", Role::Manager);

        let payload = synthesizer.synthesize(&user, &set).unwrap();
        assert_eq!(payload.subject_id, "u1");
        assert_eq!(payload.role, Role::Manager);
        assert_eq!(
            payload.allowed_roles,
            vec![Role::Viewer, Role::Consultant, Role::Manager]
        );
        assert_eq!(payload.permission_hash, set.hash);
        assert_eq!(payload.permission_version, 3);
        assert_eq!(payload.organization_id.as_deref(), Some("org-9"));
        assert_eq!(payload.manager_id.as_deref(), Some("u0"));
        assert!(payload.is_staff);
    }

    #[test]
    fn test_synthesize_is_deterministic() {
        let synthesizer = ClaimSynthesizer::new(hierarchy(), ClaimConfig::default());
        let user = UserRecord::new("u1", Role::Viewer);
        let set = effective_set("u1", Role::Viewer);

        let a = serde_json::to_vec(&synthesizer.synthesize(&user, &set).unwrap()).unwrap();
        let b = serde_json::to_vec(&synthesizer.synthesize(&user, &set).unwrap()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_payload_never_contains_raw_permissions() {
        let synthesizer = ClaimSynthesizer::new(hierarchy(), ClaimConfig::default());
        let user = UserRecord::new("u1", Role::Admin);
        let set = effective_set("u1", Role::Admin);

        let payload = synthesizer.synthesize(&user, &set).unwrap();
        let json = serde_json::to_string(&payload).unwrap();
        assert!(!json.contains("reports"), "raw keys must not ride in the claim");
        assert!(json.contains(&set.hash));
    }

    #[test]
    fn test_over_ceiling_is_an_error_not_a_truncation() {
        let synthesizer = ClaimSynthesizer::new(
            hierarchy(),
            ClaimConfig {
                max_payload_bytes: 64,
            },
        );
        let user = UserRecord::new("u1", Role::Admin).with_organization("org".repeat(40));
        let set = effective_set("u1", Role::Admin);

        let result = synthesizer.synthesize(&user, &set);
        match result {
            Err(EngineError::PayloadTooLarge { size, ceiling }) => {
                assert!(size > ceiling);
                assert_eq!(ceiling, 64);
            }
            other => panic!("expected PayloadTooLarge, got {:?}", other),
        }
    }

    #[test]
    fn test_camel_case_wire_fields() {
        let synthesizer = ClaimSynthesizer::new(hierarchy(), ClaimConfig::default());
        let user = UserRecord::new("u1", Role::Viewer);
        let set = effective_set("u1", Role::Viewer);

        let json = serde_json::to_string(&synthesizer.synthesize(&user, &set).unwrap()).unwrap();
        assert!(json.contains("\"subjectId\""));
        assert!(json.contains("\"permissionHash\""));
        assert!(json.contains("\"permissionVersion\""));
        assert!(json.contains("\"isStaff\""));
    }
}
