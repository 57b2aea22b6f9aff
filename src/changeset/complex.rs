// (c) Copyright 2025 Helsing GmbH. All rights reserved.
use super::{Changeset, ChangesetBase, ListChangeset};
use crate::{ComplexType, Value, error::Error};
use std::{cell::RefCell, rc::Rc};

/// The change recorded for one property of a complex container.
#[derive(Debug, Clone)]
pub enum Change {
    /// The property was assigned a new value.
    Replace(Rc<Replace>),
    /// The property holds a complex container which has changes of its own.
    Complex(Rc<ComplexChangeset>),
    /// The property holds a list container which has changes of its own.
    List(Rc<ListChangeset>),
}

impl Change {
    /// Either `"replace"`, `"complex"` or `"list"`.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Replace(_) => "replace",
            Self::Complex(_) => "complex",
            Self::List(_) => "list",
        }
    }

    pub fn as_replace(&self) -> Option<&Rc<Replace>> {
        match self {
            Self::Replace(replace) => Some(replace),
            _ => None,
        }
    }

    /// The nested changeset, unless this is a replace.
    pub fn as_nested(&self) -> Option<Changeset> {
        match self {
            Self::Replace(_) => None,
            Self::Complex(c) => Some(Changeset::Complex(Rc::clone(c))),
            Self::List(l) => Some(Changeset::List(Rc::clone(l))),
        }
    }

    /// The value the property has once this change is applied.
    pub fn value(&self) -> Value {
        match self {
            Self::Replace(replace) => replace.value(),
            Self::Complex(c) => Value::Ref(c.base.target()),
            Self::List(l) => Value::Ref(l.base.target()),
        }
    }

    pub fn has_changes(&self) -> bool {
        match self {
            Self::Replace(_) => true,
            Self::Complex(c) => c.has_changes(),
            Self::List(l) => l.has_changes(),
        }
    }

    /// Returns true if both changes are the very same record.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Replace(a), Self::Replace(b)) => Rc::ptr_eq(a, b),
            (Self::Complex(a), Self::Complex(b)) => Rc::ptr_eq(a, b),
            (Self::List(a), Self::List(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    fn from_nested(changeset: &Changeset) -> Self {
        match changeset {
            Changeset::Complex(c) => Self::Complex(Rc::clone(c)),
            Changeset::List(l) => Self::List(Rc::clone(l)),
        }
    }
}

/// A property assignment: the committed value and the pending one.
///
/// Setting the same property again updates the pending value in place.
#[derive(Debug)]
pub struct Replace {
    old: Value,
    new: RefCell<Value>,
}

impl Replace {
    /// The committed value at the time the property was first assigned.
    pub fn old(&self) -> &Value {
        &self.old
    }

    /// The pending value.
    pub fn value(&self) -> Value {
        self.new.borrow().clone()
    }
}

/// Pending property changes of a complex container.
#[derive(Debug)]
pub struct ComplexChangeset {
    pub(super) base: ChangesetBase,
    schema: Rc<ComplexType>,
    entries: RefCell<Vec<(Rc<str>, Change)>>,
}

impl ComplexChangeset {
    pub(crate) fn new(base: ChangesetBase, schema: Rc<ComplexType>) -> Self {
        Self {
            base,
            schema,
            entries: RefCell::new(Vec::new()),
        }
    }

    pub fn schema(&self) -> &Rc<ComplexType> {
        &self.schema
    }

    /// The change recorded for property `name`, if any.
    ///
    /// Fails with [`Error::ArgumentInvalid`] if the target's type does not declare `name`.
    pub fn get_change(&self, name: &str) -> Result<Option<Change>, Error> {
        self.schema.property(name)?;
        Ok(self.entry(name))
    }

    /// Whether a change is recorded for property `name`.
    ///
    /// Fails with [`Error::ArgumentInvalid`] if the target's type does not declare `name`.
    pub fn has_change(&self, name: &str) -> Result<bool, Error> {
        self.get_change(name).map(|change| change.is_some())
    }

    /// Names of the changed properties, in the order they were first changed.
    pub fn property_names(&self) -> Vec<Rc<str>> {
        self.entries
            .borrow()
            .iter()
            .map(|(name, _)| Rc::clone(name))
            .collect()
    }

    /// The recorded changes, in the order their properties were first changed.
    pub fn changes(&self) -> Vec<(Rc<str>, Change)> {
        self.entries.borrow().clone()
    }

    pub fn has_changes(&self) -> bool {
        self.entries
            .borrow()
            .iter()
            .any(|(_, change)| change.has_changes())
    }

    pub(crate) fn has_local_changes(&self) -> bool {
        self.entries
            .borrow()
            .iter()
            .any(|(_, change)| matches!(change, Change::Replace(_)))
    }

    fn entry(&self, name: &str) -> Option<Change> {
        self.entries
            .borrow()
            .iter()
            .find(|(n, _)| &**n == name)
            .map(|(_, change)| change.clone())
    }

    /// The pending value of `name`, if a change is recorded for it.
    pub(crate) fn effective(&self, name: &str) -> Option<Value> {
        self.entry(name).map(|change| change.value())
    }

    /// Records `name = value`, where `committed` is the stored value.
    ///
    /// Returns the value the property had before, or `None` when `value` is already the
    /// property's effective value, in which case nothing is recorded.
    pub(crate) fn set(
        &self,
        name: &Rc<str>,
        value: Value,
        committed: &Value,
    ) -> Result<Option<Value>, Error> {
        self.base.assert_writable()?;
        let mut entries = self.entries.borrow_mut();
        let previous = match entries.iter().position(|(n, _)| n == name) {
            None => {
                if value == *committed {
                    return Ok(None);
                }
                entries.push((
                    Rc::clone(name),
                    Change::Replace(Rc::new(Replace {
                        old: committed.clone(),
                        new: RefCell::new(value),
                    })),
                ));
                committed.clone()
            }
            Some(index) => {
                let current = entries[index].1.value();
                if current == value {
                    return Ok(None);
                }
                let evicted = match &entries[index].1 {
                    Change::Replace(replace) => {
                        replace.new.replace(value);
                        None
                    }
                    // replacing a nested container drops its changes from this slot
                    Change::Complex(_) | Change::List(_) => Some(Change::Replace(Rc::new(Replace {
                        old: committed.clone(),
                        new: RefCell::new(value),
                    }))),
                };
                if let Some(replace) = evicted {
                    entries[index].1 = replace;
                }
                current
            }
        };
        drop(entries);
        self.base.bump();
        Ok(Some(previous))
    }

    /// Hooks `child` up as the nested changeset of `name`.
    ///
    /// Succeeds on an unchanged property, or on one whose pending value is the child itself.
    pub(crate) fn set_nested(&self, name: &Rc<str>, child: &Changeset) -> bool {
        if self.base.is_read_only() {
            return false;
        }
        let mut entries = self.entries.borrow_mut();
        match entries.iter().position(|(n, _)| n == name) {
            None => {
                entries.push((Rc::clone(name), Change::from_nested(child)));
                true
            }
            Some(index) => {
                if entries[index].1.value() != Value::Ref(child.target()) {
                    return false;
                }
                entries[index].1 = Change::from_nested(child);
                true
            }
        }
    }

    pub(crate) fn nested(&self) -> Vec<Changeset> {
        self.entries
            .borrow()
            .iter()
            .filter_map(|(_, change)| change.as_nested())
            .collect()
    }

    pub(crate) fn clear(&self) {
        self.entries.borrow_mut().clear();
    }

    pub(crate) fn apply(&self, values: &mut [Value]) {
        for (name, change) in self.entries.borrow().iter() {
            if let Some(index) = self.schema.index_of(name) {
                values[index] = change.value();
            }
        }
    }

    /// Slot-wise merge of `self` followed by `other`.
    pub(super) fn compose(&self, other: &Self, base: ChangesetBase) -> Result<Self, Error> {
        let theirs = other.entries.borrow();
        let mut entries: Vec<(Rc<str>, Change)> = Vec::new();
        for (name, mine) in self.entries.borrow().iter() {
            let change = match theirs.iter().find(|(n, _)| n == name) {
                None => mine.clone(),
                Some((_, theirs)) => compose_change(mine, theirs)?,
            };
            entries.push((Rc::clone(name), change));
        }
        for (name, change) in theirs.iter() {
            if !entries.iter().any(|(n, _)| n == name) {
                entries.push((Rc::clone(name), change.clone()));
            }
        }
        Ok(Self {
            base,
            schema: Rc::clone(&self.schema),
            entries: RefCell::new(entries),
        })
    }
}

fn compose_change(mine: &Change, theirs: &Change) -> Result<Change, Error> {
    if mine.ptr_eq(theirs) {
        return Ok(theirs.clone());
    }
    match (mine.as_nested(), theirs.as_nested()) {
        (Some(mine), Some(theirs))
            if mine.target() == theirs.target() && mine.kind() == theirs.kind() =>
        {
            Ok(Change::from_nested(&mine.compose(&theirs)?))
        }
        // the later change wins
        _ => Ok(theirs.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ContainerId, ListData, SetOptions, TransactionId, values};

    fn changeset(target: u64) -> ComplexChangeset {
        ComplexChangeset::new(
            ChangesetBase::new(ContainerId::for_tests(target), TransactionId::for_tests(1), 0),
            ComplexType::new("Derived", ["foo", "bar", "child"]),
        )
    }

    fn name(name: &str) -> Rc<str> {
        Rc::from(name)
    }

    fn list_child(target: u64) -> Changeset {
        Changeset::List(Rc::new(ListChangeset::new(
            ChangesetBase::new(ContainerId::for_tests(target), TransactionId::for_tests(1), 0),
            Rc::new(ListData::from_values(values![1])),
        )))
    }

    #[test]
    fn setting_the_effective_value_records_nothing() {
        let cs = changeset(1);
        assert_eq!(cs.set(&name("foo"), 5.into(), &5.into()).unwrap(), None);
        assert!(!cs.has_change("foo").unwrap());
        assert_eq!(cs.base.transaction_version.get(), 0);

        assert_eq!(
            cs.set(&name("foo"), 10.into(), &5.into()).unwrap(),
            Some(5.into())
        );
        assert_eq!(cs.set(&name("foo"), 10.into(), &5.into()).unwrap(), None);
        assert_eq!(cs.base.transaction_version.get(), 1);
    }

    #[test]
    fn replace_is_updated_in_place() {
        let cs = changeset(1);
        cs.set(&name("foo"), 10.into(), &5.into()).unwrap();
        let first = cs.get_change("foo").unwrap().unwrap();
        cs.set(&name("foo"), 20.into(), &5.into()).unwrap();
        let second = cs.get_change("foo").unwrap().unwrap();
        assert!(first.ptr_eq(&second));
        assert_eq!(second.value(), Value::Int(20));
        assert_eq!(second.as_replace().unwrap().old(), &Value::Int(5));
        assert_eq!(cs.base.transaction_version.get(), 2);
    }

    #[test]
    fn undeclared_properties_are_rejected() {
        let cs = changeset(1);
        assert!(cs.get_change("baz").unwrap_err().is_argument_invalid());
        assert!(cs.has_change("baz").unwrap_err().is_argument_invalid());
    }

    #[test]
    fn replace_evicts_nested_and_nested_takes_over_matching_replace() {
        let cs = changeset(1);
        let child = list_child(2);
        let child_ref = Value::Ref(child.target());
        assert!(cs.set_nested(&name("child"), &child));
        assert_eq!(
            cs.get_change("child").unwrap().unwrap().type_name(),
            "list"
        );

        let previous = cs
            .set(&name("child"), Value::Null, &child_ref)
            .unwrap();
        assert_eq!(previous, Some(child_ref.clone()));
        assert_eq!(
            cs.get_change("child").unwrap().unwrap().type_name(),
            "replace"
        );
        // a replace with an unrelated value keeps its slot
        assert!(!cs.set_nested(&name("child"), &child));

        cs.set(&name("child"), child_ref.clone(), &child_ref).unwrap();
        assert!(cs.set_nested(&name("child"), &child));
        assert_eq!(
            cs.get_change("child").unwrap().unwrap().type_name(),
            "list"
        );
    }

    #[test]
    fn has_changes_looks_through_nested() {
        let cs = changeset(1);
        let child = list_child(2);
        cs.set_nested(&name("child"), &child);
        assert!(!cs.has_changes());
        assert!(!cs.has_local_changes());
        child
            .as_list()
            .unwrap()
            .set(values![2], SetOptions::append())
            .unwrap();
        assert!(cs.has_changes());
        assert!(!cs.has_local_changes());
    }

    #[test]
    fn apply_writes_pending_values() {
        let cs = changeset(1);
        let child = list_child(2);
        cs.set(&name("bar"), "x".into(), &Value::Null).unwrap();
        cs.set_nested(&name("child"), &child);
        let mut values = vec![Value::from(5), Value::Null, Value::Null];
        cs.apply(&mut values);
        assert_eq!(
            values,
            vec![Value::from(5), Value::from("x"), Value::Ref(child.target())]
        );
    }

    #[test]
    fn compose_prefers_later_changes() {
        let first = changeset(1);
        let second = changeset(1);
        first.set(&name("foo"), 10.into(), &5.into()).unwrap();
        first.set(&name("bar"), 1.into(), &6.into()).unwrap();
        second.set(&name("foo"), 20.into(), &10.into()).unwrap();

        let base = ChangesetBase::new(ContainerId::for_tests(1), TransactionId::for_tests(2), 0);
        let composite = first.compose(&second, base).unwrap();
        let names: Vec<_> = composite.property_names().iter().map(|n| n.to_string()).collect();
        assert_eq!(names, ["foo", "bar"]);
        assert!(composite.get_change("foo").unwrap().unwrap().ptr_eq(
            &second.get_change("foo").unwrap().unwrap()
        ));
        // carried through untouched
        assert!(composite.get_change("bar").unwrap().unwrap().ptr_eq(
            &first.get_change("bar").unwrap().unwrap()
        ));
    }
}
