// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Committed container state.
//!
//! The [`Store`] is an arena of containers keyed by [`ContainerId`]. It only ever holds
//! committed data: pending changes live in the changesets of a
//! [`Transaction`](crate::Transaction) until that transaction commits.
//!
//! List storage is kept behind an `Rc<ListData>`. A list's storage is never mutated in place;
//! committing a list changeset swaps in the changeset's projected state instead. This keeps
//! changeset snapshots cheap, as a snapshot is just another handle on the committed storage.

use crate::{
    Changeset, ComplexChangeset, ListChange, ListChangeset, TransactionId, Value,
    changeset::ChangesetBase, create_map, create_set, error::Error, ids::ContainerId,
};
use smallvec::SmallVec;
use std::{fmt, rc::Rc};

/// The declared, ordered properties of a complex container.
#[derive(Debug, PartialEq, Eq)]
pub struct ComplexType {
    name: Rc<str>,
    properties: Vec<Rc<str>>,
}

impl ComplexType {
    /// Declares a complex type. Duplicate property names are ignored.
    pub fn new<I, S>(name: &str, properties: I) -> Rc<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut this = Self {
            name: Rc::from(name),
            properties: Vec::new(),
        };
        this.push_properties(properties);
        Rc::new(this)
    }

    /// Declares a derived type: the properties of `self`, followed by `properties`.
    pub fn extend<I, S>(self: &Rc<Self>, name: &str, properties: I) -> Rc<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut this = Self {
            name: Rc::from(name),
            properties: self.properties.clone(),
        };
        this.push_properties(properties);
        Rc::new(this)
    }

    fn push_properties<I, S>(&mut self, properties: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for property in properties {
            let property = property.as_ref();
            if self.index_of(property).is_none() {
                self.properties.push(Rc::from(property));
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn properties(&self) -> &[Rc<str>] {
        &self.properties
    }

    /// Returns the position of `property` among the declared properties.
    pub fn index_of(&self, property: &str) -> Option<usize> {
        self.properties.iter().position(|p| &**p == property)
    }

    /// Resolves a declared property, failing with [`Error::ArgumentInvalid`] otherwise.
    pub(crate) fn property(&self, property: &str) -> Result<(usize, &Rc<str>), Error> {
        self.index_of(property)
            .map(|index| (index, &self.properties[index]))
            .ok_or_else(|| {
                Error::argument(
                    "name",
                    format!("`{property}` is not a property of {}", self.name),
                )
            })
    }
}

/// The storage of a list container: distinct values in order.
#[derive(Clone, Default)]
pub struct ListData {
    elems: Vec<Value>,
    keys: crate::HashSet<Value>,
}

impl ListData {
    /// Builds list storage from `values`, keeping the first occurrence of duplicates.
    pub fn from_values(values: impl IntoIterator<Item = Value>) -> Self {
        let mut this = Self {
            elems: Vec::new(),
            keys: create_set(),
        };
        for value in values {
            if this.keys.insert(value.clone()) {
                this.elems.push(value);
            }
        }
        this
    }

    pub fn elements(&self) -> &[Value] {
        &self.elems
    }

    pub fn len(&self) -> usize {
        self.elems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    pub fn contains(&self, value: &Value) -> bool {
        self.keys.contains(value)
    }

    pub fn position(&self, value: &Value) -> Option<usize> {
        if !self.contains(value) {
            return None;
        }
        self.elems.iter().position(|v| v == value)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.elems.iter()
    }

    /// Replays one primitive change.
    ///
    /// Recorded indices are trusted when they still point at the recorded value. Otherwise the
    /// value is looked up, which keeps replaying composed change sequences well-defined.
    pub(crate) fn apply(&mut self, change: &ListChange) {
        match change {
            ListChange::Add { value, index } => {
                if self.keys.insert(value.clone()) {
                    let index = (*index).min(self.elems.len());
                    self.elems.insert(index, value.clone());
                }
            }
            ListChange::Remove { value, index } => {
                if let Some(at) = self.locate(value, *index) {
                    self.elems.remove(at);
                    self.keys.remove(value);
                }
            }
            ListChange::Move { value, from, to } => {
                if let Some(at) = self.locate(value, *from) {
                    let value = self.elems.remove(at);
                    let to = (*to).min(self.elems.len());
                    self.elems.insert(to, value);
                }
            }
            ListChange::Sort(comparator) => self.elems.sort_by(|a, b| comparator(a, b)),
            ListChange::Clear => {
                self.elems.clear();
                self.keys.clear();
            }
        }
    }

    fn locate(&self, value: &Value, hint: usize) -> Option<usize> {
        if self.elems.get(hint) == Some(value) {
            Some(hint)
        } else {
            self.position(value)
        }
    }
}

impl PartialEq for ListData {
    fn eq(&self, other: &Self) -> bool {
        self.elems == other.elems
    }
}

impl fmt::Debug for ListData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.elems).finish()
    }
}

/// Where a parent holds a child.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Slot {
    /// A property of a complex parent.
    Property(Rc<str>),
    /// An element of a list parent; the element is the child itself.
    Element(ContainerId),
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Property(name) => write!(f, ".{name}"),
            Self::Element(id) => write!(f, "[{id}]"),
        }
    }
}

/// A back-reference: the child is held by `parent` at `slot`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerRef {
    pub parent: ContainerId,
    pub slot: Slot,
}

impl ContainerRef {
    pub fn new(parent: ContainerId, slot: Slot) -> Self {
        Self { parent, slot }
    }
}

pub(crate) type Refs = SmallVec<[ContainerRef; 2]>;

#[derive(Debug)]
pub(crate) enum ContainerData {
    Complex {
        schema: Rc<ComplexType>,
        values: Vec<Value>,
    },
    List(Rc<ListData>),
}

#[derive(Debug)]
pub(crate) struct Container {
    pub(crate) id: ContainerId,
    pub(crate) version: u64,
    pub(crate) refs: Refs,
    pub(crate) data: ContainerData,
}

impl Container {
    pub(crate) fn kind(&self) -> &'static str {
        match self.data {
            ContainerData::Complex { .. } => "complex",
            ContainerData::List(_) => "list",
        }
    }

    /// Creates an empty changeset of the matching kind, capturing the current version.
    pub(crate) fn create_changeset(&self, transaction: TransactionId) -> Changeset {
        let base = ChangesetBase::new(self.id, transaction, self.version);
        match &self.data {
            ContainerData::Complex { schema, .. } => {
                Changeset::Complex(Rc::new(ComplexChangeset::new(base, Rc::clone(schema))))
            }
            ContainerData::List(data) => {
                Changeset::List(Rc::new(ListChangeset::new(base, Rc::clone(data))))
            }
        }
    }

    /// The containers this container holds, with the slot holding each.
    pub(crate) fn children(&self) -> Vec<(Slot, ContainerId)> {
        match &self.data {
            ContainerData::Complex { schema, values } => schema
                .properties()
                .iter()
                .zip(values)
                .filter_map(|(name, value)| {
                    value
                        .as_ref_id()
                        .map(|child| (Slot::Property(Rc::clone(name)), child))
                })
                .collect(),
            ContainerData::List(data) => data
                .iter()
                .filter_map(Value::as_ref_id)
                .map(|child| (Slot::Element(child), child))
                .collect(),
        }
    }

    pub(crate) fn complex(&self) -> Result<(&Rc<ComplexType>, &[Value]), Error> {
        match &self.data {
            ContainerData::Complex { schema, values } => Ok((schema, values)),
            ContainerData::List(_) => Err(Error::WrongKind {
                id: self.id,
                expected: "complex",
            }),
        }
    }

    pub(crate) fn list(&self) -> Result<&Rc<ListData>, Error> {
        match &self.data {
            ContainerData::List(data) => Ok(data),
            ContainerData::Complex { .. } => Err(Error::WrongKind {
                id: self.id,
                expected: "list",
            }),
        }
    }
}

/// Arena of committed containers.
#[derive(Debug)]
pub(crate) struct Store {
    containers: crate::HashMap<ContainerId, Container>,
}

impl Default for Store {
    fn default() -> Self {
        Self {
            containers: create_map(),
        }
    }
}

impl Store {
    pub(crate) fn get(&self, id: ContainerId) -> Result<&Container, Error> {
        self.containers.get(&id).ok_or(Error::NotFound(id))
    }

    pub(crate) fn get_mut(&mut self, id: ContainerId) -> Result<&mut Container, Error> {
        self.containers.get_mut(&id).ok_or(Error::NotFound(id))
    }

    /// Checks that every container referenced by `values` exists.
    pub(crate) fn check_refs<'v>(
        &self,
        values: impl IntoIterator<Item = &'v Value>,
    ) -> Result<(), Error> {
        for child in values.into_iter().filter_map(Value::as_ref_id) {
            self.get(child)?;
        }
        Ok(())
    }

    /// Inserts a new container and registers it as parent of the containers it holds.
    pub(crate) fn insert(&mut self, container: Container) {
        for (slot, child) in container.children() {
            if let Some(child) = self.containers.get_mut(&child) {
                child.refs.push(ContainerRef::new(container.id, slot));
            }
        }
        self.containers.insert(container.id, container);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.containers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::values;

    #[test]
    fn derived_types_extend_their_base() {
        let base = ComplexType::new("Base", ["foo", "bar"]);
        let derived = base.extend("Derived", ["myList", "foo"]);
        let names: Vec<_> = derived.properties().iter().map(|p| p.to_string()).collect();
        assert_eq!(names, ["foo", "bar", "myList"]);
        assert_eq!(derived.name(), "Derived");
        assert!(derived.property("baz").unwrap_err().is_argument_invalid());
    }

    #[test]
    fn list_data_deduplicates() {
        let data = ListData::from_values(values![1, 2, 1, 3]);
        assert_eq!(data.elements(), values![1, 2, 3].as_slice());
        assert_eq!(data.position(&Value::Int(3)), Some(2));
        assert_eq!(data.position(&Value::Int(7)), None);
    }

    #[test]
    fn list_data_replays_primitive_changes() {
        let mut data = ListData::from_values(values![1, 2, 3]);
        data.apply(&ListChange::Add {
            value: 4.into(),
            index: 1,
        });
        assert_eq!(data.elements(), values![1, 4, 2, 3].as_slice());
        data.apply(&ListChange::Move {
            value: 1.into(),
            from: 0,
            to: 3,
        });
        assert_eq!(data.elements(), values![4, 2, 3, 1].as_slice());
        // stale index hint falls back to a lookup
        data.apply(&ListChange::Remove {
            value: 3.into(),
            index: 0,
        });
        assert_eq!(data.elements(), values![4, 2, 1].as_slice());
        data.apply(&ListChange::Sort(Rc::new(Value::natural_cmp)));
        assert_eq!(data.elements(), values![1, 2, 4].as_slice());
        data.apply(&ListChange::Clear);
        assert!(data.is_empty());
        assert!(!data.contains(&Value::Int(1)));
    }

    #[test]
    fn inserting_registers_back_references() {
        let mut store = Store::default();
        let child = ContainerId::for_tests(1);
        let parent = ContainerId::for_tests(2);
        let list = ContainerId::for_tests(3);
        let schema = ComplexType::new("Leaf", ["x"]);
        store.insert(Container {
            id: child,
            version: 0,
            refs: Refs::new(),
            data: ContainerData::Complex {
                schema: Rc::clone(&schema),
                values: vec![Value::Null],
            },
        });
        store.insert(Container {
            id: parent,
            version: 0,
            refs: Refs::new(),
            data: ContainerData::Complex {
                schema: ComplexType::new("Node", ["child"]),
                values: vec![child.into()],
            },
        });
        store.insert(Container {
            id: list,
            version: 0,
            refs: Refs::new(),
            data: ContainerData::List(Rc::new(ListData::from_values(values![child]))),
        });

        let refs = &store.get(child).unwrap().refs;
        assert_eq!(
            refs.as_slice(),
            &[
                ContainerRef::new(parent, Slot::Property("child".into())),
                ContainerRef::new(list, Slot::Element(child)),
            ]
        );
        assert_eq!(store.len(), 3);
        assert!(matches!(
            store.get(list).unwrap().complex(),
            Err(Error::WrongKind { expected: "complex", .. })
        ));
    }
}
