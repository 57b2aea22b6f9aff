// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Transactions group the changesets of every container mutated while they are current.
//!
//! A transaction is driven through its lifecycle by the [`Context`](crate::Context):
//!
//! - **Proposed**: changesets are created and mutated.
//! - **WillPreviewed**: the will phase ran. Every changeset is read-only from here on.
//! - **Committed** or **Rejected**: the transaction was resolved. The context no longer tracks it;
//!   it is handed back to the caller of [`Context::commit`](crate::Context::commit) or
//!   [`TransactionScope::accept`](crate::TransactionScope::accept) for inspection.
//!
//! # Net order
//!
//! Before the will phase the transaction builds a dependency graph: starting at every changeset
//! with local changes, it follows back-references to the containers holding the changed ones,
//! creating and linking changesets for them on the way. Each changeset's net order is the
//! longest chain of nested changesets below it, and changesets are processed in ascending net
//! order, so that children are notified and applied before their parents.
//!
//! Reference cycles are cut: an edge leading back into a container that is still being visited
//! is ignored, so the container at the end of such an edge is neither linked nor reordered
//! through it.
//!
//! Changesets that record nothing, not even through nested changesets, are neither notified
//! nor applied.

use crate::{
    ActionResult, Changeset, ContainerId, TransactionId, create_map, create_set,
    error::Error,
    store::{ContainerRef, Slot, Store},
};
use tracing::debug;

mod change_ref;
pub use change_ref::ChangeRef;
mod graph;

/// Where a transaction is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub enum TransactionState {
    Proposed,
    WillPreviewed,
    Committed,
    Rejected,
}

/// The changesets and reference bookkeeping of one logical transaction.
#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    state: TransactionState,
    csets: Vec<Changeset>,
    cset_by_uid: crate::HashMap<ContainerId, usize>,
    crefs: Vec<ChangeRef>,
    cref_by_uid: crate::HashMap<ContainerId, usize>,
    /// Containers whose changeset was ever linked as a nested child.
    nested_into: crate::HashSet<ContainerId>,
    scope_count: usize,
    result: Option<ActionResult>,
    result_will: Option<ActionResult>,
    action_lock: bool,
    version: Option<u64>,
}

impl Transaction {
    pub(crate) fn new(id: TransactionId) -> Self {
        Self {
            id,
            state: TransactionState::Proposed,
            csets: Vec::new(),
            cset_by_uid: create_map(),
            crefs: Vec::new(),
            cref_by_uid: create_map(),
            nested_into: create_set(),
            scope_count: 0,
            result: None,
            result_will: None,
            action_lock: false,
            version: None,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Only proposed transactions accept new changesets.
    pub fn is_read_only(&self) -> bool {
        self.state != TransactionState::Proposed
    }

    /// The global version the changes were committed with.
    pub fn version(&self) -> Option<u64> {
        self.version
    }

    /// The final outcome, once resolved.
    pub fn result(&self) -> Option<&ActionResult> {
        self.result.as_ref()
    }

    /// The changesets, in net order once the dependency graph has been built.
    pub fn changesets(&self) -> &[Changeset] {
        &self.csets
    }

    pub fn changeset(&self, container: ContainerId) -> Option<&Changeset> {
        self.cset_by_uid
            .get(&container)
            .map(|&index| &self.csets[index])
    }

    pub fn change_refs(&self) -> &[ChangeRef] {
        &self.crefs
    }

    pub fn change_ref(&self, container: ContainerId) -> Option<&ChangeRef> {
        self.cref_by_uid
            .get(&container)
            .map(|&index| &self.crefs[index])
    }

    /// How many entered scopes currently make this transaction current.
    pub fn scope_count(&self) -> usize {
        self.scope_count
    }

    pub(crate) fn change_ref_mut(&mut self, container: ContainerId) -> &mut ChangeRef {
        let index = match self.cref_by_uid.get(&container) {
            Some(&index) => index,
            None => {
                self.crefs.push(ChangeRef::new(container));
                let index = self.crefs.len() - 1;
                self.cref_by_uid.insert(container, index);
                index
            }
        };
        &mut self.crefs[index]
    }

    /// Registers a new changeset and links it to the changesets of its parents and children.
    pub(crate) fn add_changeset(&mut self, changeset: Changeset, store: &Store) -> Result<(), Error> {
        let target = changeset.target();
        self.register(changeset)?;
        for parent in self.ambient_refs(store, target)? {
            self.link(parent.parent, &parent.slot, target);
        }
        for (slot, child) in store.get(target)?.children() {
            self.link(target, &slot, child);
        }
        Ok(())
    }

    fn register(&mut self, changeset: Changeset) -> Result<(), Error> {
        if self.is_read_only() {
            return Err(Error::operation(format!(
                "transaction {} is {:?} and accepts no new changesets",
                self.id, self.state
            )));
        }
        self.cset_by_uid.insert(changeset.target(), self.csets.len());
        self.csets.push(changeset);
        Ok(())
    }

    /// Returns the changeset of `container`, creating and linking it if needed.
    pub(crate) fn ensure_changeset(
        &mut self,
        store: &Store,
        container: ContainerId,
    ) -> Result<Changeset, Error> {
        if let Some(changeset) = self.changeset(container) {
            return Ok(changeset.clone());
        }
        let changeset = self.new_changeset(store, container)?;
        self.add_changeset(changeset.clone(), store)?;
        Ok(changeset)
    }

    /// Like [`Self::ensure_changeset`], but leaves a new changeset unlinked.
    pub(crate) fn ensure_unlinked_changeset(
        &mut self,
        store: &Store,
        container: ContainerId,
    ) -> Result<Changeset, Error> {
        if let Some(changeset) = self.changeset(container) {
            return Ok(changeset.clone());
        }
        let changeset = self.new_changeset(store, container)?;
        self.register(changeset.clone())?;
        Ok(changeset)
    }

    fn new_changeset(&self, store: &Store, container: ContainerId) -> Result<Changeset, Error> {
        let changeset = store.get(container)?.create_changeset(self.id);
        debug!(
            transaction = %self.id,
            container = %container,
            kind = changeset.kind(),
            "created changeset"
        );
        Ok(changeset)
    }

    /// Hooks the changeset of `child` up at `slot` of `parent`'s changeset.
    ///
    /// Does nothing unless both changesets exist, or if the link would close a cycle of nested
    /// changesets. Returns whether the link was installed.
    pub(crate) fn link(&mut self, parent: ContainerId, slot: &Slot, child: ContainerId) -> bool {
        let (Some(parent_cset), Some(child_cset)) = (
            self.changeset(parent).cloned(),
            self.changeset(child).cloned(),
        ) else {
            return false;
        };
        if parent == child || (self.nested_into.contains(&parent) && child_cset.reaches(parent)) {
            return false;
        }
        let installed = match (&parent_cset, slot) {
            (Changeset::Complex(c), Slot::Property(name)) => c.set_nested(name, &child_cset),
            (Changeset::List(l), Slot::Element(element)) => {
                *element == child && l.set_nested(child, &child_cset)
            }
            _ => false,
        };
        if installed {
            self.nested_into.insert(child);
            self.change_ref_mut(parent).link(slot, child);
        }
        installed
    }

    pub(crate) fn unlink(&mut self, parent: ContainerId, slot: &Slot) {
        if let Some(&index) = self.cref_by_uid.get(&parent) {
            self.crefs[index].unlink(slot);
        }
    }

    /// The back-references of `container` as seen from inside this transaction.
    pub(crate) fn ambient_refs(
        &self,
        store: &Store,
        container: ContainerId,
    ) -> Result<Vec<ContainerRef>, Error> {
        let committed = &store.get(container)?.refs;
        Ok(match self.change_ref(container) {
            Some(cref) => cref.ambient_refs(committed),
            None => committed.to_vec(),
        })
    }

    /// True if another transaction committed to one of our containers since we started
    /// changing it.
    pub(crate) fn is_stale(&self, store: &Store) -> bool {
        self.csets.iter().any(|changeset| {
            store
                .get(changeset.target())
                .map_or(true, |container| container.version != changeset.target_version())
        })
    }

    /// Returns true when the transaction became current for the first time since it was
    /// last suspended.
    pub(crate) fn scope_enter(&mut self) -> bool {
        self.scope_count += 1;
        self.scope_count == 1
    }

    pub(crate) fn scope_exit(&mut self) {
        self.scope_count = self.scope_count.saturating_sub(1);
    }

    pub(crate) fn acquire_action_lock(&mut self) -> Result<(), Error> {
        if self.action_lock {
            return Err(Error::operation(format!(
                "transaction {} is already being committed or rejected",
                self.id
            )));
        }
        self.action_lock = true;
        Ok(())
    }

    pub(crate) fn release_action_lock(&mut self) {
        self.action_lock = false;
    }

    pub(crate) fn is_locked(&self) -> bool {
        self.action_lock
    }

    pub(crate) fn cached_will(&self) -> Option<ActionResult> {
        self.result_will.clone()
    }

    /// Concludes the will phase: every changeset becomes read-only, whatever the outcome.
    pub(crate) fn finish_will(&mut self, result: ActionResult) {
        self.freeze_all();
        self.result_will = Some(result);
        self.state = TransactionState::WillPreviewed;
    }

    fn freeze_all(&self) {
        for changeset in &self.csets {
            changeset.freeze();
        }
    }

    /// Applies reference changes, then every changeset that changes something, in net order.
    pub(crate) fn apply_changes(&mut self, store: &mut Store, version: u64) -> Result<(), Error> {
        self.version = Some(version);
        for cref in &self.crefs {
            cref.apply(&mut store.get_mut(cref.container())?.refs);
        }
        for changeset in self.effective_changesets() {
            changeset.apply(store.get_mut(changeset.target())?, version)?;
        }
        Ok(())
    }

    /// The changesets recording at least one change, in order.
    pub(crate) fn effective_changesets(&self) -> impl Iterator<Item = &Changeset> {
        self.csets.iter().filter(|changeset| changeset.has_changes())
    }

    pub(crate) fn resolve(&mut self, result: ActionResult) {
        self.freeze_all();
        self.state = if result.is_fulfilled() {
            TransactionState::Committed
        } else {
            TransactionState::Rejected
        };
        self.result = Some(result);
        self.scope_count = 0;
    }

    fn reindex(&mut self) {
        self.cset_by_uid.clear();
        for (index, changeset) in self.csets.iter().enumerate() {
            self.cset_by_uid.insert(changeset.target(), index);
        }
    }
}
