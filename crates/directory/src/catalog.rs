//! Named permission sets.
//!
//! Operators save capability bundles under a name and later reference them as
//! `<name>` wherever a permission string is accepted. Users copy the resolved
//! letters, so removing a set never changes existing users.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::capability::Permissions;
use crate::error::{DirectoryError, Result};
use crate::store::{keys, CredentialStore, CredentialStoreExt};

/// A named, reusable capability bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSet {
    /// Unique name.
    pub name: String,
    /// What the set is for.
    pub description: String,
    /// The capabilities it grants.
    pub permissions: Permissions,
}

/// Catalog of permission sets persisted under [`keys::PERMISSION_SETS`].
pub struct PermissionCatalog<S> {
    store: S,
}

impl<S: CredentialStore> PermissionCatalog<S> {
    /// Wraps a credential store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Saves a set, replacing any set with the same name.
    ///
    /// `permissions` is a raw capability string or a preset alias.
    pub fn save(&self, name: &str, description: &str, permissions: &str) -> Result<PermissionSet> {
        let name = name.trim();
        let description = description.trim();
        if name.is_empty() {
            return Err(DirectoryError::InvalidPermissionSet(
                "name cannot be empty".into(),
            ));
        }
        if name.contains(['<', '>']) {
            return Err(DirectoryError::InvalidPermissionSet(
                "name cannot contain '<' or '>'".into(),
            ));
        }
        if description.is_empty() {
            return Err(DirectoryError::InvalidPermissionSet(
                "description cannot be empty".into(),
            ));
        }
        let permissions = resolve_literal(permissions)?;

        let set = PermissionSet {
            name: name.to_string(),
            description: description.to_string(),
            permissions,
        };

        let mut sets = self.list()?;
        if sets.insert(set.name.clone(), set.clone()).is_some() {
            tracing::info!(name = %set.name, "Replacing existing permission set");
        }
        self.store.set(keys::PERMISSION_SETS, &sets)?;

        tracing::info!(name = %set.name, permissions = %set.permissions, "Permission set saved");
        Ok(set)
    }

    /// Lists all saved sets keyed by name.
    pub fn list(&self) -> Result<BTreeMap<String, PermissionSet>> {
        self.store.get_or(keys::PERMISSION_SETS, BTreeMap::new())
    }

    /// Gets one set by name.
    pub fn get(&self, name: &str) -> Result<Option<PermissionSet>> {
        Ok(self.list()?.remove(name))
    }

    /// Removes a set, returning it.
    pub fn remove(&self, name: &str) -> Result<PermissionSet> {
        let mut sets = self.list()?;
        let removed = sets
            .remove(name)
            .ok_or_else(|| DirectoryError::PermissionSetNotFound(name.to_string()))?;
        self.store.set(keys::PERMISSION_SETS, &sets)?;

        tracing::info!(name, "Permission set removed");
        Ok(removed)
    }

    /// Resolves a permission token.
    ///
    /// Accepts `<name>` for a saved set, a preset alias (`read-only`,
    /// `read-write`, `admin`) or a raw capability string. An unknown `<name>`
    /// is an error.
    pub fn resolve(&self, token: &str) -> Result<Permissions> {
        let token = token.trim();
        if let Some(name) = token
            .strip_prefix('<')
            .and_then(|rest| rest.strip_suffix('>'))
        {
            return self
                .get(name)?
                .map(|set| set.permissions)
                .ok_or_else(|| DirectoryError::PermissionSetNotFound(name.to_string()));
        }
        resolve_literal(token)
    }
}

fn resolve_literal(token: &str) -> Result<Permissions> {
    match Permissions::preset(token) {
        Some(preset) => Ok(preset),
        None => Permissions::parse(token),
    }
}
