//! Permission catalog: the single source of truth for valid
//! `(resource, action)` pairs and for wildcard expansion
//!
//! Wildcards are expanded here, eagerly, so downstream comparisons work on
//! concrete keys only and never need wildcard-aware logic.

use crate::error::{EngineError, Result};
use crate::types::PermissionKey;
use std::collections::{BTreeMap, BTreeSet};

/// Catalog of valid `(resource, action)` pairs, loaded at startup and
/// immutable at runtime
#[derive(Debug, Clone)]
pub struct PermissionCatalog {
    /// resource -> actions
    entries: BTreeMap<String, BTreeSet<String>>,
}

impl PermissionCatalog {
    /// Build a catalog from `(resource, actions)` pairs
    pub fn new<R, A>(entries: impl IntoIterator<Item = (R, Vec<A>)>) -> Self
    where
        R: Into<String>,
        A: Into<String>,
    {
        let mut map: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (resource, actions) in entries {
            let set = map.entry(resource.into()).or_default();
            for action in actions {
                set.insert(action.into());
            }
        }
        Self { entries: map }
    }

    /// Whether the key names a valid capability
    ///
    /// Wildcard keys are valid when at least one concrete key falls under
    /// them, so `expand` on a valid key never yields an empty set.
    pub fn contains(&self, key: &PermissionKey) -> bool {
        match (key.resource.as_str(), key.action.as_str()) {
            ("*", "*") => !self.entries.is_empty(),
            ("*", action) => self.entries.values().any(|actions| actions.contains(action)),
            (resource, "*") => self.entries.contains_key(resource),
            (resource, action) => self
                .entries
                .get(resource)
                .is_some_and(|actions| actions.contains(action)),
        }
    }

    /// Validate a key, returning `Validation` when it is unknown
    pub fn validate(&self, key: &PermissionKey) -> Result<()> {
        if self.contains(key) {
            Ok(())
        } else {
            Err(EngineError::Validation(format!(
                "unknown permission {}",
                key
            )))
        }
    }

    /// Expand a key against the catalog into the concrete set it covers
    ///
    /// A concrete key expands to itself; `(resource, "*")` expands to every
    /// action on that resource; `("*", action)` to every resource carrying
    /// that action; `("*", "*")` to the full catalog.
    pub fn expand(&self, key: &PermissionKey) -> BTreeSet<PermissionKey> {
        let mut out = BTreeSet::new();
        match (key.resource.as_str(), key.action.as_str()) {
            ("*", "*") => {
                for (resource, actions) in &self.entries {
                    for action in actions {
                        out.insert(PermissionKey::new(resource.clone(), action.clone()));
                    }
                }
            }
            ("*", action) => {
                for (resource, actions) in &self.entries {
                    if actions.contains(action) {
                        out.insert(PermissionKey::new(resource.clone(), action.clone()));
                    }
                }
            }
            (resource, "*") => {
                if let Some(actions) = self.entries.get(resource) {
                    for action in actions {
                        out.insert(PermissionKey::new(resource, action.clone()));
                    }
                }
            }
            _ => {
                if self.contains(key) {
                    out.insert(key.clone());
                }
            }
        }
        out
    }

    /// Expand a whole set of keys into concrete keys
    pub fn expand_all<'a>(
        &self,
        keys: impl IntoIterator<Item = &'a PermissionKey>,
    ) -> BTreeSet<PermissionKey> {
        let mut out = BTreeSet::new();
        for key in keys {
            out.extend(self.expand(key));
        }
        out
    }

    /// Total number of concrete keys in the catalog
    pub fn len(&self) -> usize {
        self.entries.values().map(|actions| actions.len()).sum()
    }

    /// Whether the catalog is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
