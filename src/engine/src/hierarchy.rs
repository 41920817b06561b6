//! Role hierarchy: a static, totally ordered table of roles with default
//! permission sets
//!
//! Roles are a closed enum ordered by level, with exactly one maximum
//! (`Admin`). Assignment safety is the strict-greater rule: a role can
//! only ever assign roles strictly below its own level, which rules out
//! self-escalation and lateral escalation.

use crate::catalog::PermissionCatalog;
use crate::error::{EngineError, Result};
use crate::types::PermissionKey;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Named, leveled bucket of default permissions
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Read-only access (level 1)
    Viewer,
    /// External consultant (level 2)
    Consultant,
    /// People manager (level 3)
    Manager,
    /// Root-equivalent administrator (level 4, the unique maximum)
    Admin,
}

impl Role {
    /// All roles, ascending by level
    pub const ALL: [Role; 4] = [Role::Viewer, Role::Consultant, Role::Manager, Role::Admin];

    /// Integer level; strictly increasing, no two roles share a level
    pub fn level(&self) -> u8 {
        match self {
            Role::Viewer => 1,
            Role::Consultant => 2,
            Role::Manager => 3,
            Role::Admin => 4,
        }
    }

    /// Stable string form used in claims and audit records
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::Consultant => "consultant",
            Role::Manager => "manager",
            Role::Admin => "admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "viewer" => Ok(Role::Viewer),
            "consultant" => Ok(Role::Consultant),
            "manager" => Ok(Role::Manager),
            "admin" => Ok(Role::Admin),
            other => Err(EngineError::NotFound(format!("role {}", other))),
        }
    }
}

/// Static role table with wildcard-expanded default permission sets
#[derive(Debug, Clone)]
pub struct RoleHierarchy {
    defaults: HashMap<Role, BTreeSet<PermissionKey>>,
}

impl RoleHierarchy {
    /// Build a hierarchy, validating and expanding every default grant
    /// against the catalog
    ///
    /// # Errors
    ///
    /// Returns `Validation` if any role's defaults name a key the catalog
    /// does not contain, or if a role is missing from the table.
    pub fn new(
        catalog: &PermissionCatalog,
        defaults: impl IntoIterator<Item = (Role, Vec<PermissionKey>)>,
    ) -> Result<Self> {
        let mut expanded: HashMap<Role, BTreeSet<PermissionKey>> = HashMap::new();

        for (role, keys) in defaults {
            for key in &keys {
                catalog.validate(key).map_err(|_| {
                    EngineError::Validation(format!(
                        "default permission {} for role {} is not in the catalog",
                        key, role
                    ))
                })?;
            }
            expanded.insert(role, catalog.expand_all(keys.iter()));
        }

        for role in Role::ALL {
            if !expanded.contains_key(&role) {
                return Err(EngineError::Validation(format!(
                    "role {} has no default permission set",
                    role
                )));
            }
        }

        Ok(Self { defaults: expanded })
    }

    /// Resolve a role by name
    pub fn resolve(&self, name: &str) -> Result<Role> {
        name.parse()
    }

    /// Strict-greater assignment rule: true iff `assigner` sits strictly
    /// above `target`
    pub fn can_assign(&self, assigner: Role, target: Role) -> bool {
        assigner.level() > target.level()
    }

    /// The role's default permissions, already wildcard-expanded
    pub fn default_permissions(&self, role: Role) -> &BTreeSet<PermissionKey> {
        // Every role is present; new() rejects incomplete tables.
        &self.defaults[&role]
    }

    /// Every role at or below the given role's level, ascending
    ///
    /// This is the `allowedRoles` claim: the set of roles the subject may
    /// act as downstream.
    pub fn allowed_roles(&self, role: Role) -> Vec<Role> {
        Role::ALL
            .into_iter()
            .filter(|candidate| candidate.level() <= role.level())
            .collect()
    }
}
