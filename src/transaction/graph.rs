// (c) Copyright 2025 Helsing GmbH. All rights reserved.
use super::Transaction;
use crate::{Changeset, ContainerId, create_map, error::Error, store::Store};
use tracing::debug;

/// Traversal state of a container while building the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Visit {
    #[default]
    Unvisited,
    /// On the current traversal path.
    Open,
    Closed,
}

type VisitStates = crate::HashMap<ContainerId, Visit>;

fn state_of(states: &VisitStates, container: ContainerId) -> Visit {
    states.get(&container).copied().unwrap_or_default()
}

impl Transaction {
    /// Creates and links changesets for every ancestor of a changed container, computes net
    /// orders, then sorts the changesets by ascending net order.
    pub(crate) fn build_graph(&mut self, store: &Store) -> Result<(), Error> {
        let mut states = create_map();
        let leaves: Vec<ContainerId> = self
            .csets
            .iter()
            .filter(|changeset| changeset.has_local_changes())
            .map(Changeset::target)
            .collect();
        for leaf in leaves {
            if state_of(&states, leaf) == Visit::Unvisited {
                self.discover(store, leaf, &mut states)?;
            }
        }
        self.assign_net_orders();

        // stable, so equal orders keep their creation order
        self.csets.sort_by_key(Changeset::net_order);
        self.reindex();
        debug!(
            transaction = %self.id,
            changesets = self.csets.len(),
            "built dependency graph"
        );
        Ok(())
    }

    /// Depth-first walk from `leaf` up through the containers holding it.
    ///
    /// Every edge is linked, except those leading back into a container that is still open.
    fn discover(
        &mut self,
        store: &Store,
        leaf: ContainerId,
        states: &mut VisitStates,
    ) -> Result<(), Error> {
        states.insert(leaf, Visit::Open);
        let mut stack = vec![(leaf, self.ambient_refs(store, leaf)?.into_iter())];
        loop {
            let Some((container, parents)) = stack.last_mut() else {
                return Ok(());
            };
            let container = *container;
            let Some(parent_ref) = parents.next() else {
                states.insert(container, Visit::Closed);
                stack.pop();
                continue;
            };
            let parent = parent_ref.parent;
            let state = state_of(states, parent);
            // back-edge of a cycle: treated as absent
            if state == Visit::Open {
                continue;
            }
            self.ensure_unlinked_changeset(store, parent)?;
            self.link(parent, &parent_ref.slot, container);
            if state == Visit::Unvisited {
                states.insert(parent, Visit::Open);
                stack.push((parent, self.ambient_refs(store, parent)?.into_iter()));
            }
        }
    }

    /// Sets every net order to the length of the longest chain of nested changesets below it.
    ///
    /// Nested changesets never form a cycle, so this is a single pass in topological order.
    fn assign_net_orders(&self) {
        let mut holders: crate::HashMap<ContainerId, Vec<ContainerId>> = create_map();
        let mut unordered_children: crate::HashMap<ContainerId, usize> = create_map();
        for changeset in &self.csets {
            changeset.set_net_order(0);
            for child in changeset.nested() {
                if self.cset_by_uid.contains_key(&child.target()) {
                    holders
                        .entry(child.target())
                        .or_default()
                        .push(changeset.target());
                    *unordered_children.entry(changeset.target()).or_default() += 1;
                }
            }
        }

        let mut ready: Vec<ContainerId> = self
            .csets
            .iter()
            .map(Changeset::target)
            .filter(|target| !unordered_children.contains_key(target))
            .collect();
        while let Some(child) = ready.pop() {
            let order = self.changeset(child).map_or(0, Changeset::net_order);
            for holder in holders.remove(&child).unwrap_or_default() {
                let holder_cset = self.changeset(holder);
                if let Some(changeset) = holder_cset.filter(|c| c.net_order() <= order) {
                    changeset.set_net_order(order + 1);
                }
                if let Some(count) = unordered_children.get_mut(&holder) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push(holder);
                    }
                }
            }
        }
    }
}
