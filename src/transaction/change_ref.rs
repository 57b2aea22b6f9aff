// (c) Copyright 2025 Helsing GmbH. All rights reserved.
use crate::{
    ContainerId,
    store::{ContainerRef, Refs, Slot},
};

/// Reference bookkeeping of one container within one transaction.
///
/// `links` maps the container's own slots to the child whose changeset is hooked up there.
/// `added` and `removed` record how the transaction changed the container's back-references,
/// i.e. the slots of other containers holding this one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRef {
    container: ContainerId,
    links: Vec<(Slot, ContainerId)>,
    added: Vec<ContainerRef>,
    removed: Vec<ContainerRef>,
}

impl ChangeRef {
    pub(crate) fn new(container: ContainerId) -> Self {
        Self {
            container,
            links: Vec::new(),
            added: Vec::new(),
            removed: Vec::new(),
        }
    }

    pub fn container(&self) -> ContainerId {
        self.container
    }

    /// The children whose changesets are hooked up in this container's slots.
    pub fn links(&self) -> &[(Slot, ContainerId)] {
        &self.links
    }

    /// The child linked at `slot`, if any.
    pub fn child(&self, slot: &Slot) -> Option<ContainerId> {
        self.links
            .iter()
            .find(|(s, _)| s == slot)
            .map(|(_, child)| *child)
    }

    pub fn added_refs(&self) -> &[ContainerRef] {
        &self.added
    }

    pub fn removed_refs(&self) -> &[ContainerRef] {
        &self.removed
    }

    pub(crate) fn link(&mut self, slot: &Slot, child: ContainerId) {
        match self.links.iter_mut().find(|(s, _)| s == slot) {
            Some((_, existing)) => *existing = child,
            None => self.links.push((slot.clone(), child)),
        }
    }

    pub(crate) fn unlink(&mut self, slot: &Slot) -> Option<ContainerId> {
        let index = self.links.iter().position(|(s, _)| s == slot)?;
        Some(self.links.remove(index).1)
    }

    pub(crate) fn unlink_all(&mut self) {
        self.links.clear();
    }

    /// Records that `parent` now holds this container. Cancels a pending removal of the same
    /// reference.
    pub(crate) fn add_ref(&mut self, parent: ContainerRef) {
        match self.removed.iter().position(|r| *r == parent) {
            Some(index) => {
                self.removed.remove(index);
            }
            None => self.added.push(parent),
        }
    }

    /// Records that `parent` no longer holds this container. Cancels a pending addition of the
    /// same reference.
    pub(crate) fn remove_ref(&mut self, parent: ContainerRef) {
        match self.added.iter().position(|r| *r == parent) {
            Some(index) => {
                self.added.remove(index);
            }
            None => self.removed.push(parent),
        }
    }

    /// The committed back-references adjusted by this transaction's additions and removals.
    pub(crate) fn ambient_refs(&self, committed: &[ContainerRef]) -> Vec<ContainerRef> {
        let mut refs = committed.to_vec();
        for removed in &self.removed {
            if let Some(index) = refs.iter().position(|r| r == removed) {
                refs.remove(index);
            }
        }
        refs.extend(self.added.iter().cloned());
        refs
    }

    /// Commits the reference changes.
    pub(crate) fn apply(&self, refs: &mut Refs) {
        let ambient = self.ambient_refs(refs.as_slice());
        *refs = ambient.into_iter().collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parent(raw: u64, name: &str) -> ContainerRef {
        ContainerRef::new(ContainerId::for_tests(raw), Slot::Property(name.into()))
    }

    #[test]
    fn additions_and_removals_cancel_out() {
        let mut cref = ChangeRef::new(ContainerId::for_tests(1));
        cref.add_ref(parent(2, "a"));
        cref.remove_ref(parent(2, "a"));
        assert!(cref.added_refs().is_empty());
        assert!(cref.removed_refs().is_empty());

        cref.remove_ref(parent(3, "b"));
        cref.add_ref(parent(3, "b"));
        assert!(cref.removed_refs().is_empty());
        assert!(cref.added_refs().is_empty());
    }

    #[test]
    fn ambient_refs_adjust_committed_refs() {
        let mut cref = ChangeRef::new(ContainerId::for_tests(1));
        cref.remove_ref(parent(2, "a"));
        cref.add_ref(parent(4, "c"));
        let committed = [parent(2, "a"), parent(3, "b")];
        assert_eq!(
            cref.ambient_refs(&committed),
            vec![parent(3, "b"), parent(4, "c")]
        );

        let mut refs: Refs = committed.into_iter().collect();
        cref.apply(&mut refs);
        assert_eq!(refs.as_slice(), &[parent(3, "b"), parent(4, "c")]);
    }

    #[test]
    fn links_are_keyed_by_slot() {
        let mut cref = ChangeRef::new(ContainerId::for_tests(1));
        let slot = Slot::Property("a".into());
        cref.link(&slot, ContainerId::for_tests(2));
        cref.link(&slot, ContainerId::for_tests(3));
        assert_eq!(cref.links().len(), 1);
        assert_eq!(cref.child(&slot), Some(ContainerId::for_tests(3)));
        assert_eq!(cref.unlink(&slot), Some(ContainerId::for_tests(3)));
        assert_eq!(cref.unlink(&slot), None);
    }
}
