// (c) Copyright 2025 Helsing GmbH. All rights reserved.
use super::{Changeset, ChangesetBase};
use crate::{Comparator, ContainerId, ListData, Value, create_set, error::Error};
use std::{cell::RefCell, fmt, rc::Rc};

#[cfg(test)]
use std::cell::Cell;

/// A primitive, replayable list mutation.
#[derive(Clone)]
pub enum ListChange {
    /// `value` was inserted at `index`.
    Add { value: Value, index: usize },
    /// `value` was removed from `index`.
    Remove { value: Value, index: usize },
    /// `value` was moved from `from` to its final position `to`.
    Move { value: Value, from: usize, to: usize },
    /// The list was stably sorted.
    Sort(Comparator),
    /// Every element was removed.
    Clear,
}

impl ListChange {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Add { .. } => "add",
            Self::Remove { .. } => "remove",
            Self::Move { .. } => "move",
            Self::Sort(_) => "sort",
            Self::Clear => "clear",
        }
    }
}

impl fmt::Debug for ListChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add { value, index } => write!(f, "add {value} at {index}"),
            Self::Remove { value, index } => write!(f, "remove {value} at {index}"),
            Self::Move { value, from, to } => write!(f, "move {value} from {from} to {to}"),
            Self::Sort(_) => f.write_str("sort"),
            Self::Clear => f.write_str("clear"),
        }
    }
}

/// How [`Context::list_set`](crate::Context::list_set) merges a fragment into a list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Insert fragment values the list does not hold yet.
    pub add: bool,
    /// Elements are identified by value, so an element present in both has nothing to update.
    /// Accepted for parity with the other flags; it never records anything.
    pub update: bool,
    /// Remove elements missing from the fragment.
    pub remove: bool,
    /// Reorder elements present in both to follow the fragment.
    pub move_: bool,
    /// Where insertion starts. Defaults to the front when moving and to the end otherwise.
    pub index: Option<usize>,
}

impl SetOptions {
    /// Add missing values at the end.
    pub fn append() -> Self {
        Self {
            add: true,
            ..Self::default()
        }
    }

    /// Add missing values starting at `index`.
    pub fn insert_at(index: usize) -> Self {
        Self {
            add: true,
            index: Some(index),
            ..Self::default()
        }
    }

    /// Make the list equal to the fragment.
    pub fn replace_all() -> Self {
        Self {
            add: true,
            update: true,
            remove: true,
            move_: true,
            index: None,
        }
    }
}

/// Values that entered or left the list through one builder call.
#[derive(Debug, Default)]
pub(crate) struct ListEdits {
    pub(crate) added: Vec<Value>,
    pub(crate) removed: Vec<Value>,
}

/// Pending changes of a list container.
///
/// Changes are recorded as primitive [`ListChange`]s computed against the list's projected
/// state, i.e. the committed list with every recorded change replayed on top.
#[derive(Debug)]
pub struct ListChangeset {
    pub(super) base: ChangesetBase,
    snapshot: Rc<ListData>,
    changes: RefCell<Vec<ListChange>>,
    nested: RefCell<Vec<(ContainerId, Changeset)>>,
    mock: RefCell<Option<Rc<ListData>>>,
    #[cfg(test)]
    replays: Cell<usize>,
}

impl ListChangeset {
    pub(crate) fn new(base: ChangesetBase, snapshot: Rc<ListData>) -> Self {
        Self {
            base,
            snapshot,
            changes: RefCell::new(Vec::new()),
            nested: RefCell::new(Vec::new()),
            mock: RefCell::new(None),
            #[cfg(test)]
            replays: Cell::new(0),
        }
    }

    /// The committed list at the time this changeset was created.
    pub fn snapshot(&self) -> &Rc<ListData> {
        &self.snapshot
    }

    pub fn changes(&self) -> Vec<ListChange> {
        self.changes.borrow().clone()
    }

    /// The nested changeset of element `element`, if one is hooked up.
    pub fn nested_changeset(&self, element: ContainerId) -> Option<Changeset> {
        self.nested
            .borrow()
            .iter()
            .find(|(id, _)| *id == element)
            .map(|(_, changeset)| changeset.clone())
    }

    pub fn has_changes(&self) -> bool {
        self.has_local_changes()
            || self
                .nested
                .borrow()
                .iter()
                .any(|(_, changeset)| changeset.has_changes())
    }

    pub(crate) fn has_local_changes(&self) -> bool {
        !self.changes.borrow().is_empty()
    }

    /// The list as it will be once this changeset is applied.
    ///
    /// Without changes this is the snapshot itself. Otherwise the changes are replayed onto a
    /// copy of the snapshot on first access; the copy is then kept current as further changes
    /// are recorded.
    pub fn projected_mock(&self) -> Rc<ListData> {
        let changes = self.changes.borrow();
        if changes.is_empty() {
            return Rc::clone(&self.snapshot);
        }
        let mut mock = self.mock.borrow_mut();
        let mock = mock.get_or_insert_with(|| {
            #[cfg(test)]
            self.replays.set(self.replays.get() + 1);
            let mut data = ListData::clone(&self.snapshot);
            for change in changes.iter() {
                data.apply(change);
            }
            Rc::new(data)
        });
        Rc::clone(mock)
    }

    fn push(&self, change: ListChange) {
        if let Some(mock) = self.mock.borrow_mut().as_mut() {
            Rc::make_mut(mock).apply(&change);
        }
        match &change {
            ListChange::Remove {
                value: Value::Ref(element),
                ..
            } => self.unset_nested(*element),
            ListChange::Clear => self.nested.borrow_mut().clear(),
            _ => {}
        }
        self.changes.borrow_mut().push(change);
    }

    fn record(&self, changes: Vec<ListChange>) {
        if changes.is_empty() {
            return;
        }
        for change in changes {
            self.push(change);
        }
        self.base.bump();
    }

    /// Merges `fragment` into the list as directed by `options`.
    pub(crate) fn set(&self, fragment: Vec<Value>, options: SetOptions) -> Result<ListEdits, Error> {
        self.base.assert_writable()?;
        let mut incoming = create_set();
        let fragment: Vec<Value> = fragment
            .into_iter()
            .filter(|value| incoming.insert(value.clone()))
            .collect();

        let mut draft = Draft::new(&self.projected_mock());
        if options.remove {
            let stale: Vec<Value> = draft
                .work
                .iter()
                .filter(|value| !incoming.contains(*value))
                .cloned()
                .collect();
            for value in stale {
                draft.remove(value);
            }
        }

        let mut at = match options.index {
            Some(index) => index.min(draft.work.len()),
            None if options.move_ => 0,
            None => draft.work.len(),
        };
        for value in fragment {
            match draft.work.position(&value) {
                None if options.add => {
                    draft.edits.added.push(value.clone());
                    draft.emit(ListChange::Add { value, index: at });
                    at += 1;
                }
                None => {}
                Some(current) if options.move_ => {
                    let target = if current < at { at - 1 } else { at };
                    if current != target {
                        draft.emit(ListChange::Move {
                            value,
                            from: current,
                            to: target,
                        });
                    }
                    at = target + 1;
                }
                Some(_) => {}
            }
        }
        Ok(self.finish(draft))
    }

    /// Removes every value of `fragment` the list holds.
    pub(crate) fn remove(&self, fragment: Vec<Value>) -> Result<ListEdits, Error> {
        self.base.assert_writable()?;
        let mut draft = Draft::new(&self.projected_mock());
        for value in fragment {
            draft.remove(value);
        }
        Ok(self.finish(draft))
    }

    /// Removes up to `count` elements starting at `start`.
    pub(crate) fn remove_at(&self, start: usize, count: usize) -> Result<ListEdits, Error> {
        self.base.assert_writable()?;
        let mut draft = Draft::new(&self.projected_mock());
        if count == 0 || start >= draft.work.len() {
            return Ok(ListEdits::default());
        }
        let end = start.saturating_add(count).min(draft.work.len());
        for _ in start..end {
            let value = draft.work.elements()[start].clone();
            draft.remove(value);
        }
        Ok(self.finish(draft))
    }

    pub(crate) fn clear(&self) -> Result<ListEdits, Error> {
        self.base.assert_writable()?;
        let mut draft = Draft::new(&self.projected_mock());
        if draft.work.is_empty() {
            return Ok(ListEdits::default());
        }
        draft.edits.removed = draft.work.elements().to_vec();
        draft.emit(ListChange::Clear);
        Ok(self.finish(draft))
    }

    pub(crate) fn sort(&self, comparator: Comparator) -> Result<(), Error> {
        self.base.assert_writable()?;
        self.record(vec![ListChange::Sort(comparator)]);
        Ok(())
    }

    fn finish(&self, draft: Draft) -> ListEdits {
        let Draft { changes, edits, .. } = draft;
        self.record(changes);
        edits
    }

    /// Hooks `child` up as the nested changeset of element `element`.
    pub(crate) fn set_nested(&self, element: ContainerId, child: &Changeset) -> bool {
        if self.base.is_read_only() || !self.projected_mock().contains(&Value::Ref(element)) {
            return false;
        }
        let mut nested = self.nested.borrow_mut();
        match nested.iter_mut().find(|(id, _)| *id == element) {
            Some((_, existing)) => *existing = child.clone(),
            None => nested.push((element, child.clone())),
        }
        true
    }

    pub(crate) fn unset_nested(&self, element: ContainerId) {
        self.nested.borrow_mut().retain(|(id, _)| *id != element);
    }

    pub(crate) fn nested(&self) -> Vec<Changeset> {
        self.nested
            .borrow()
            .iter()
            .map(|(_, changeset)| changeset.clone())
            .collect()
    }

    pub(crate) fn clear_changes(&self) {
        self.changes.borrow_mut().clear();
        self.nested.borrow_mut().clear();
        self.mock.replace(None);
    }

    /// Installs the projected state as the list's storage.
    pub(crate) fn apply(&self, data: &mut Rc<ListData>) {
        *data = self.projected_mock();
    }

    /// `self`'s changes followed by `other`'s; nested changesets are merged per element.
    pub(super) fn compose(&self, other: &Self, base: ChangesetBase) -> Result<Self, Error> {
        let mut changes = self.changes.borrow().clone();
        changes.extend(other.changes.borrow().iter().cloned());

        let mut nested = self.nested.borrow().clone();
        for (element, theirs) in other.nested.borrow().iter() {
            match nested.iter_mut().find(|(id, _)| id == element) {
                Some((_, mine)) if !mine.ptr_eq(theirs) && mine.kind() == theirs.kind() => {
                    *mine = mine.compose(theirs)?;
                }
                Some((_, mine)) => *mine = theirs.clone(),
                None => nested.push((*element, theirs.clone())),
            }
        }

        Ok(Self {
            base,
            snapshot: Rc::clone(&self.snapshot),
            changes: RefCell::new(changes),
            nested: RefCell::new(nested),
            mock: RefCell::new(None),
            #[cfg(test)]
            replays: Cell::new(0),
        })
    }
}

/// Changes computed by one builder call, with the state they lead to.
struct Draft {
    work: ListData,
    changes: Vec<ListChange>,
    edits: ListEdits,
}

impl Draft {
    fn new(current: &ListData) -> Self {
        Self {
            work: current.clone(),
            changes: Vec::new(),
            edits: ListEdits::default(),
        }
    }

    fn emit(&mut self, change: ListChange) {
        self.work.apply(&change);
        self.changes.push(change);
    }

    fn remove(&mut self, value: Value) {
        if let Some(index) = self.work.position(&value) {
            self.edits.removed.push(value.clone());
            self.emit(ListChange::Remove { value, index });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{TransactionId, test_util::ListOp, values};

    fn changeset(initial: Vec<Value>) -> ListChangeset {
        ListChangeset::new(
            ChangesetBase::new(ContainerId::for_tests(1), TransactionId::for_tests(1), 0),
            Rc::new(ListData::from_values(initial)),
        )
    }

    fn kinds(changeset: &ListChangeset) -> Vec<&'static str> {
        changeset.changes().iter().map(ListChange::kind).collect()
    }

    #[test]
    fn projected_mock_is_the_snapshot_without_changes() {
        let cs = changeset(values![1, 2]);
        assert!(Rc::ptr_eq(&cs.projected_mock(), cs.snapshot()));
        assert!(Rc::ptr_eq(&cs.projected_mock(), &cs.projected_mock()));
        assert_eq!(cs.replays.get(), 0);
    }

    #[test]
    fn projected_mock_replays_once() {
        let cs = changeset(values![1, 2]);
        cs.set(values![3], SetOptions::append()).unwrap();
        cs.set(values![4], SetOptions::insert_at(0)).unwrap();
        cs.remove(values![1]).unwrap();
        let first = cs.projected_mock();
        let second = cs.projected_mock();
        assert_eq!(first.elements(), values![4, 2, 3].as_slice());
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(cs.replays.get(), 1);

        // later changes update the cached mock without replaying everything
        drop((first, second));
        cs.sort(Rc::new(Value::natural_cmp)).unwrap();
        assert_eq!(cs.projected_mock().elements(), values![2, 3, 4].as_slice());
        assert_eq!(cs.replays.get(), 1);
    }

    #[test]
    fn handed_out_mocks_are_not_mutated() {
        let cs = changeset(values![1]);
        cs.set(values![2], SetOptions::append()).unwrap();
        let before = cs.projected_mock();
        cs.set(values![3], SetOptions::append()).unwrap();
        assert_eq!(before.elements(), values![1, 2].as_slice());
        assert_eq!(cs.projected_mock().elements(), values![1, 2, 3].as_slice());
    }

    #[test]
    fn apply_installs_the_mock_without_copying() {
        let cs = changeset(values![1]);
        cs.set(values![3], SetOptions::append()).unwrap();
        let mock = cs.projected_mock();
        let mut storage = Rc::clone(cs.snapshot());
        cs.apply(&mut storage);
        assert!(Rc::ptr_eq(&storage, &mock));
        assert_eq!(storage.elements(), values![1, 3].as_slice());
    }

    #[test]
    fn repeated_additions_record_one_add() {
        let cs = changeset(values![1]);
        let edits = cs.set(values![2, 2, 2], SetOptions::append()).unwrap();
        assert_eq!(kinds(&cs), ["add"]);
        assert_eq!(edits.added, values![2]);
        assert_eq!(cs.base.transaction_version.get(), 1);
    }

    #[test]
    fn set_with_remove_records_one_remove_per_missing_element() {
        let cs = changeset(values![1, 2, 3, 4]);
        let options = SetOptions {
            remove: true,
            ..SetOptions::default()
        };
        let edits = cs.set(values![3], options).unwrap();
        assert_eq!(kinds(&cs), ["remove", "remove", "remove"]);
        assert_eq!(edits.removed, values![1, 2, 4]);
        assert_eq!(cs.projected_mock().elements(), values![3].as_slice());
    }

    #[test]
    fn set_with_move_reorders_present_elements() {
        let cs = changeset(values![1, 2]);
        let options = SetOptions {
            move_: true,
            ..SetOptions::default()
        };
        cs.set(values![2, 1], options).unwrap();
        assert_eq!(kinds(&cs), ["move"]);
        assert_eq!(cs.projected_mock().elements(), values![2, 1].as_slice());
    }

    #[test]
    fn combined_set_records_each_primitive_in_order() {
        let cs = changeset(values![1, 2, 3]);
        cs.set(values![3, 4, 1], SetOptions::replace_all()).unwrap();
        assert_eq!(kinds(&cs), ["remove", "move", "add"]);
        assert_eq!(cs.projected_mock().elements(), values![3, 4, 1].as_slice());
        assert_eq!(cs.base.transaction_version.get(), 1);
    }

    #[test]
    fn degenerate_operations_record_nothing() {
        let cs = changeset(values![1, 2]);
        assert!(cs.remove_at(0, 0).unwrap().removed.is_empty());
        assert!(cs.remove_at(2, 1).unwrap().removed.is_empty());
        assert!(cs.remove(values![7]).unwrap().removed.is_empty());
        cs.set(values![1, 2], SetOptions::append()).unwrap();
        assert!(!cs.has_changes());
        assert_eq!(cs.base.transaction_version.get(), 0);

        let empty = changeset(values![]);
        assert!(empty.clear().unwrap().removed.is_empty());
        assert!(!empty.has_changes());
    }

    #[test]
    fn remove_at_clamps_the_count() {
        let cs = changeset(values![1, 2, 3]);
        let edits = cs.remove_at(1, usize::MAX).unwrap();
        assert_eq!(edits.removed, values![2, 3]);
        assert_eq!(kinds(&cs), ["remove", "remove"]);
        assert_eq!(cs.base.transaction_version.get(), 1);
    }

    #[test]
    fn read_only_changesets_refuse_builders() {
        let cs = changeset(values![1]);
        cs.base.state.set(super::super::ChangesetState::ReadOnly);
        assert!(cs.clear().unwrap_err().is_operation_invalid());
        assert!(
            cs.set(values![2], SetOptions::append())
                .unwrap_err()
                .is_operation_invalid()
        );
    }

    #[test]
    fn compose_concatenates_changes() {
        let first = changeset(values![1]);
        first.set(values![2], SetOptions::append()).unwrap();
        let second = changeset(values![1, 2]);
        second.remove(values![1]).unwrap();
        let base = ChangesetBase::new(ContainerId::for_tests(1), TransactionId::for_tests(2), 0);
        let composite = first.compose(&second, base).unwrap();
        assert_eq!(kinds(&composite), ["add", "remove"]);
        assert_eq!(composite.projected_mock().elements(), values![2].as_slice());
    }

    #[quickcheck]
    fn projected_state_follows_the_model(initial: Vec<Value>, ops: Vec<ListOp>) -> bool {
        let cs = changeset(initial.clone());
        let mut model = ListData::from_values(initial).elements().to_vec();
        for op in &ops {
            op.apply_to_changeset(&cs);
            op.apply_to_model(&mut model);
            if cs.projected_mock().elements() != model.as_slice() {
                return false;
            }
        }
        // the incrementally maintained mock matches a fresh replay
        let mut replayed = ListData::clone(cs.snapshot());
        for change in cs.changes() {
            replayed.apply(&change);
        }
        replayed.elements() == model.as_slice()
    }
}
