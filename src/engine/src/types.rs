//! Core identity types and the user directory

use crate::error::{EngineError, Result};
use crate::hierarchy::Role;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Unique user identifier (also the subject id pushed to the provider)
pub type UserId = String;

/// Unique override identifier
pub type OverrideId = String;

/// A `(resource, action)` capability unit
///
/// The wildcard `*` is accepted on either axis at the boundary; the
/// [`PermissionCatalog`](crate::catalog::PermissionCatalog) expands wildcards
/// so resolved sets only ever contain concrete keys.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PermissionKey {
    /// Resource name (e.g., "reports", "payroll") or "*"
    pub resource: String,

    /// Action name (e.g., "read", "export") or "*"
    pub action: String,
}

impl PermissionKey {
    /// Create a new permission key
    pub fn new(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
        }
    }

    /// Whether either axis is a wildcard
    pub fn is_wildcard(&self) -> bool {
        self.resource == "*" || self.action == "*"
    }
}

impl std::fmt::Display for PermissionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.resource, self.action)
    }
}

/// A user as the engine sees one: role plus the identity fields the
/// claim synthesizer emits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// User identifier
    pub id: UserId,

    /// Assigned role
    pub role: Role,

    /// Organization the user belongs to, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,

    /// Direct manager, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manager_id: Option<String>,

    /// Staff flag carried through to the claim payload
    #[serde(default)]
    pub is_staff: bool,
}

impl UserRecord {
    /// Create a new user record with no organization or manager
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
            organization_id: None,
            manager_id: None,
            is_staff: false,
        }
    }

    /// Set the organization id
    pub fn with_organization(mut self, org: impl Into<String>) -> Self {
        self.organization_id = Some(org.into());
        self
    }

    /// Set the manager id
    pub fn with_manager(mut self, manager: impl Into<String>) -> Self {
        self.manager_id = Some(manager.into());
        self
    }

    /// Mark the user as staff
    pub fn staff(mut self) -> Self {
        self.is_staff = true;
        self
    }
}

/// User directory lookup
///
/// The directory is the system of record for the user -> role mapping.
/// Authentication itself lives with the external identity provider; the
/// engine only needs role and identity fields.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Look up a user by id
    async fn get(&self, user_id: &str) -> Result<Option<UserRecord>>;

    /// Insert or replace a user record
    async fn upsert(&self, user: UserRecord) -> Result<()>;

    /// Change a user's role, returning the previous record
    async fn set_role(&self, user_id: &str, role: Role) -> Result<UserRecord>;
}

/// In-memory user directory implementation
pub struct InMemoryUserDirectory {
    users: RwLock<HashMap<UserId, UserRecord>>,
}

impl InMemoryUserDirectory {
    /// Create an empty directory
    pub fn new() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryUserDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn get(&self, user_id: &str) -> Result<Option<UserRecord>> {
        let users = self.users.read().await;
        Ok(users.get(user_id).cloned())
    }

    async fn upsert(&self, user: UserRecord) -> Result<()> {
        let mut users = self.users.write().await;
        users.insert(user.id.clone(), user);
        Ok(())
    }

    async fn set_role(&self, user_id: &str, role: Role) -> Result<UserRecord> {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(user_id)
            .ok_or_else(|| EngineError::NotFound(format!("user {}", user_id)))?;
        let previous = user.clone();
        user.role = role;
        Ok(previous)
    }
}
