//! Durable record of what every owner has asked for.
//!
//! The registry is a cache of intent. Changes made through
//! [`OwnershipRegistry::set`] and [`OwnershipRegistry::remove`] are staged and
//! only become durable on [`OwnershipRegistry::commit`].

pub mod error;
mod file;
mod memory;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

pub use self::{error::Error, file::FileRegistry, memory::MemoryRegistry};
use crate::resource::{OwnerId, ResourceRef, ResourceRequest};

/// The requests one owner currently has live.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct OwnershipRecord {
    #[serde(default)]
    pub resources: Vec<ResourceRequest>,
}

impl OwnershipRecord {
    #[must_use]
    pub const fn new(resources: Vec<ResourceRequest>) -> Self { Self { resources } }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.resources.is_empty() }

    #[must_use]
    pub fn references(&self) -> BTreeSet<ResourceRef> {
        self.resources.iter().map(ResourceRequest::reference).collect()
    }
}

/// The namespace the deployer targets and the one it targeted before.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<String>,
}

impl NamespaceTarget {
    /// Points the target at `namespace`, keeping the old value as `previous`.
    /// Returns `false` and changes nothing when `namespace` is already
    /// current.
    pub fn retarget(&mut self, namespace: impl Into<String>) -> bool {
        let namespace = namespace.into();
        if self.current.as_deref() == Some(namespace.as_str()) {
            return false;
        }
        self.previous = self.current.replace(namespace);
        true
    }
}

/// Everything the registry persists.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct RegistryState {
    #[serde(default)]
    pub namespace: NamespaceTarget,

    #[serde(default)]
    pub owners: BTreeMap<OwnerId, OwnershipRecord>,
}

pub trait OwnershipRegistry {
    fn get(&self, owner: &OwnerId) -> Option<&OwnershipRecord>;

    fn owners(&self) -> BTreeSet<OwnerId>;

    fn set(&mut self, owner: OwnerId, record: OwnershipRecord);

    fn remove(&mut self, owner: &OwnerId) -> Option<OwnershipRecord>;

    fn namespace_target(&self) -> &NamespaceTarget;

    fn set_namespace_target(&mut self, target: NamespaceTarget);

    /// Makes every staged change durable.
    ///
    /// # Errors
    ///
    /// Fails when the state cannot be persisted. Staged changes are kept so
    /// the caller can decide to roll them back.
    fn commit(&mut self) -> Result<(), Error>;

    /// Drops every staged change.
    fn rollback(&mut self);

    /// The state as of the last commit.
    fn snapshot(&self) -> RegistryState;
}
