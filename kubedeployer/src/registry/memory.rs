use std::collections::BTreeSet;

use crate::{
    registry::{Error, NamespaceTarget, OwnershipRecord, OwnershipRegistry, RegistryState},
    resource::OwnerId,
};

/// Registry held in memory. Also the staging area of [`super::FileRegistry`].
#[derive(Clone, Debug, Default)]
pub struct MemoryRegistry {
    committed: RegistryState,
    staged: RegistryState,
}

impl MemoryRegistry {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    #[must_use]
    pub fn with_state(state: RegistryState) -> Self {
        Self { committed: state.clone(), staged: state }
    }

    /// The state including changes not yet committed.
    #[must_use]
    pub const fn staged(&self) -> &RegistryState { &self.staged }
}

impl OwnershipRegistry for MemoryRegistry {
    fn get(&self, owner: &OwnerId) -> Option<&OwnershipRecord> { self.staged.owners.get(owner) }

    fn owners(&self) -> BTreeSet<OwnerId> { self.staged.owners.keys().cloned().collect() }

    fn set(&mut self, owner: OwnerId, record: OwnershipRecord) {
        let _previous = self.staged.owners.insert(owner, record);
    }

    fn remove(&mut self, owner: &OwnerId) -> Option<OwnershipRecord> {
        self.staged.owners.remove(owner)
    }

    fn namespace_target(&self) -> &NamespaceTarget { &self.staged.namespace }

    fn set_namespace_target(&mut self, target: NamespaceTarget) { self.staged.namespace = target; }

    fn commit(&mut self) -> Result<(), Error> {
        self.committed = self.staged.clone();
        Ok(())
    }

    fn rollback(&mut self) { self.staged = self.committed.clone(); }

    fn snapshot(&self) -> RegistryState { self.committed.clone() }
}
