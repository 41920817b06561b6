//! Per-user permission overrides with provenance
//!
//! Overrides move through `Created -> Active -> Revoked`; `Revoked` is
//! terminal. A revoked override is never reactivated, a new one is created
//! instead. For a given `(user, resource, action)` only the latest
//! non-revoked override applies.

use crate::catalog::PermissionCatalog;
use crate::error::{EngineError, Result};
use crate::types::{OverrideId, PermissionKey, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Explicit per-user grant or revocation taking precedence over role defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Override {
    /// Unique override identifier
    pub id: OverrideId,

    /// User the override applies to
    pub user_id: UserId,

    /// Capability being granted or removed (may be a wildcard)
    pub key: PermissionKey,

    /// true = grant, false = revocation of a default
    pub granted: bool,

    /// Human-readable justification recorded at creation
    pub reason: String,

    /// Administrator who created the override
    pub created_by: UserId,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Set when the override is revoked; a set value means inactive
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,

    /// Administrator who revoked the override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_by: Option<UserId>,
}

impl Override {
    /// Whether the override still applies
    pub fn is_active(&self) -> bool {
        self.revoked_at.is_none()
    }
}

/// Parameters for creating an override
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOverride {
    /// Target user
    pub user_id: UserId,

    /// Capability key
    pub key: PermissionKey,

    /// Grant or revoke
    pub granted: bool,

    /// Justification
    pub reason: String,

    /// Creating administrator
    pub created_by: UserId,
}

/// Override persistence
#[async_trait]
pub trait OverrideStore: Send + Sync {
    /// Persist a new override
    ///
    /// Implementations reject keys the catalog does not contain with
    /// `Validation`; an unknown key is never persisted.
    async fn create(&self, new: NewOverride) -> Result<Override>;

    /// Revoke an override; revoking an already-revoked override is a
    /// no-op success
    async fn revoke(&self, override_id: &str, revoked_by: &str) -> Result<Override>;

    /// Fetch a single override
    async fn get(&self, override_id: &str) -> Result<Option<Override>>;

    /// All active overrides for a user, reduced to the latest entry per
    /// `(resource, action)` key
    async fn list_active(&self, user_id: &str) -> Result<Vec<Override>>;

    /// Every override ever recorded for a user, oldest first
    async fn list_all(&self, user_id: &str) -> Result<Vec<Override>>;
}

/// In-memory override store implementation
pub struct InMemoryOverrideStore {
    catalog: Arc<PermissionCatalog>,
    overrides: RwLock<HashMap<OverrideId, Override>>,
}

impl InMemoryOverrideStore {
    /// Create an empty store validating against the given catalog
    pub fn new(catalog: Arc<PermissionCatalog>) -> Self {
        Self {
            catalog,
            overrides: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl OverrideStore for InMemoryOverrideStore {
    async fn create(&self, new: NewOverride) -> Result<Override> {
        self.catalog.validate(&new.key)?;

        let record = Override {
            id: Uuid::new_v4().to_string(),
            user_id: new.user_id,
            key: new.key,
            granted: new.granted,
            reason: new.reason,
            created_by: new.created_by,
            created_at: Utc::now(),
            revoked_at: None,
            revoked_by: None,
        };

        let mut overrides = self.overrides.write().await;
        overrides.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn revoke(&self, override_id: &str, revoked_by: &str) -> Result<Override> {
        let mut overrides = self.overrides.write().await;
        let record = overrides
            .get_mut(override_id)
            .ok_or_else(|| EngineError::NotFound(format!("override {}", override_id)))?;

        if record.revoked_at.is_none() {
            record.revoked_at = Some(Utc::now());
            record.revoked_by = Some(revoked_by.to_string());
        }

        Ok(record.clone())
    }

    async fn get(&self, override_id: &str) -> Result<Option<Override>> {
        let overrides = self.overrides.read().await;
        Ok(overrides.get(override_id).cloned())
    }

    async fn list_active(&self, user_id: &str) -> Result<Vec<Override>> {
        let overrides = self.overrides.read().await;

        // Latest non-revoked entry wins per key.
        let mut latest: HashMap<PermissionKey, Override> = HashMap::new();
        for record in overrides.values() {
            if record.user_id != user_id || !record.is_active() {
                continue;
            }
            match latest.get(&record.key) {
                Some(existing) if existing.created_at >= record.created_at => {}
                _ => {
                    latest.insert(record.key.clone(), record.clone());
                }
            }
        }

        let mut active: Vec<Override> = latest.into_values().collect();
        active.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(active)
    }

    async fn list_all(&self, user_id: &str) -> Result<Vec<Override>> {
        let overrides = self.overrides.read().await;
        let mut all: Vec<Override> = overrides
            .values()
            .filter(|record| record.user_id == user_id)
            .cloned()
            .collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(all)
    }
}

/// Validate an override request against the catalog before it is stored
pub fn validate_override(catalog: &PermissionCatalog, new: &NewOverride) -> Result<()> {
    catalog.validate(&new.key)?;
    if new.reason.trim().is_empty() {
        return Err(EngineError::Validation(
            "override reason must not be empty".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> InMemoryOverrideStore {
        let catalog = PermissionCatalog::new([
            ("reports", vec!["read", "export"]),
            ("payroll", vec!["read"]),
        ]);
        InMemoryOverrideStore::new(Arc::new(catalog))
    }

    fn grant(user: &str, resource: &str, action: &str) -> NewOverride {
        NewOverride {
            user_id: user.to_string(),
            key: PermissionKey::new(resource, action),
            granted: true,
            reason: "ticket-42".to_string(),
            created_by: "admin-1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = store();
        let created = store.create(grant("u1", "reports", "export")).await.unwrap();

        let fetched = store.get(&created.id).await.unwrap().unwrap();
        assert_eq!(fetched, created);
        assert!(fetched.is_active());
    }

    #[tokio::test]
    async fn test_create_rejects_unknown_key() {
        let store = store();

        let result = store.create(grant("u1", "secrets", "read")).await;
        assert!(matches!(result, Err(EngineError::Validation(_))));

        // Nothing persisted for the rejected key.
        assert!(store.list_all("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_revoke_is_idempotent() {
        let store = store();
        let created = store.create(grant("u1", "reports", "export")).await.unwrap();

        let first = store.revoke(&created.id, "admin-1").await.unwrap();
        assert!(!first.is_active());
        let revoked_at = first.revoked_at;

        // Second revoke is a no-op success; the original timestamp holds.
        let second = store.revoke(&created.id, "admin-2").await.unwrap();
        assert_eq!(second.revoked_at, revoked_at);
        assert_eq!(second.revoked_by.as_deref(), Some("admin-1"));
    }

    #[tokio::test]
    async fn test_revoke_unknown_id() {
        let store = store();
        let result = store.revoke("missing", "admin-1").await;
        assert!(matches!(result, Err(EngineError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_active_latest_wins_per_key() {
        let store = store();

        let older = store.create(grant("u1", "reports", "export")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let mut newer = grant("u1", "reports", "export");
        newer.granted = false;
        store.create(newer).await.unwrap();

        let active = store.list_active("u1").await.unwrap();
        assert_eq!(active.len(), 1);
        assert!(!active[0].granted, "newer revocation must win");
        assert_ne!(active[0].id, older.id);
    }

    #[tokio::test]
    async fn test_list_active_skips_revoked() {
        let store = store();
        let created = store.create(grant("u1", "reports", "export")).await.unwrap();
        store.create(grant("u1", "payroll", "read")).await.unwrap();
        store.revoke(&created.id, "admin-1").await.unwrap();

        let active = store.list_active("u1").await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].key, PermissionKey::new("payroll", "read"));
    }

    #[tokio::test]
    async fn test_list_active_other_users_excluded() {
        let store = store();
        store.create(grant("u1", "reports", "export")).await.unwrap();
        store.create(grant("u2", "reports", "export")).await.unwrap();

        assert_eq!(store.list_active("u1").await.unwrap().len(), 1);
        assert_eq!(store.list_all("u2").await.unwrap().len(), 1);
    }

    #[test]
    fn test_validate_override() {
        let catalog = PermissionCatalog::new([("reports", vec!["read", "export"])]);

        assert!(validate_override(&catalog, &grant("u1", "reports", "export")).is_ok());

        let unknown = grant("u1", "secrets", "read");
        assert!(matches!(
            validate_override(&catalog, &unknown),
            Err(EngineError::Validation(_))
        ));

        let mut blank = grant("u1", "reports", "read");
        blank.reason = "  ".to_string();
        assert!(matches!(
            validate_override(&catalog, &blank),
            Err(EngineError::Validation(_))
        ));
    }
}
