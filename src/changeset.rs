// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Pending mutations of a single container within a single transaction.
//!
//! A [`Changeset`] is created the first time a container is mutated while a transaction is
//! current (or lazily for the container's ancestors while the transaction builds its dependency
//! graph). It records the mutations without touching the committed data; the transaction applies
//! them on commit.
//!
//! Changesets of the same container from successive transactions can be merged with
//! [`Changeset::compose`].

use crate::{
    error::Error,
    ids::{ContainerId, TransactionId},
    store::{Container, ContainerData},
};
use std::{cell::Cell, rc::Rc};

mod complex;
pub use complex::{Change, ComplexChangeset, Replace};
mod list;
pub(crate) use list::ListEdits;
pub use list::{ListChange, ListChangeset, SetOptions};

/// Whether a changeset still accepts mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChangesetState {
    Mutable,
    ReadOnly,
}

/// State shared by both changeset kinds.
#[derive(Debug)]
pub(crate) struct ChangesetBase {
    target: ContainerId,
    transaction: TransactionId,
    target_version: u64,
    transaction_version: Cell<u64>,
    state: Cell<ChangesetState>,
    net_order: Cell<usize>,
}

impl ChangesetBase {
    pub(crate) fn new(target: ContainerId, transaction: TransactionId, target_version: u64) -> Self {
        Self {
            target,
            transaction,
            target_version,
            transaction_version: Cell::new(0),
            state: Cell::new(ChangesetState::Mutable),
            net_order: Cell::new(0),
        }
    }

    /// The base of `first.compose(second)`: read-only, `first`'s target version and
    /// `second`'s transaction.
    fn composite(first: &Self, second: &Self) -> Self {
        Self {
            target: first.target,
            transaction: second.transaction,
            target_version: first.target_version,
            transaction_version: Cell::new(second.transaction_version.get()),
            state: Cell::new(ChangesetState::ReadOnly),
            net_order: Cell::new(0),
        }
    }

    pub(crate) fn target(&self) -> ContainerId {
        self.target
    }

    pub(crate) fn is_read_only(&self) -> bool {
        self.state.get() == ChangesetState::ReadOnly
    }

    pub(crate) fn assert_writable(&self) -> Result<(), Error> {
        if self.is_read_only() {
            return Err(Error::operation(format!(
                "the changeset of {} is read-only",
                self.target
            )));
        }
        Ok(())
    }

    pub(crate) fn bump(&self) {
        self.transaction_version
            .set(self.transaction_version.get() + 1);
    }
}

/// The pending mutations of one container, of either kind.
///
/// This is a cheap handle: clones share the same underlying changeset.
#[derive(Debug, Clone)]
pub enum Changeset {
    Complex(Rc<ComplexChangeset>),
    List(Rc<ListChangeset>),
}

impl Changeset {
    pub(crate) fn base(&self) -> &ChangesetBase {
        match self {
            Self::Complex(c) => &c.base,
            Self::List(l) => &l.base,
        }
    }

    /// The container this changeset mutates.
    pub fn target(&self) -> ContainerId {
        self.base().target
    }

    /// The transaction this changeset belongs to.
    pub fn transaction(&self) -> TransactionId {
        self.base().transaction
    }

    /// The target's version when this changeset was created.
    pub fn target_version(&self) -> u64 {
        self.base().target_version
    }

    /// Local mutation counter. Bumped by every effective mutation.
    pub fn transaction_version(&self) -> u64 {
        self.base().transaction_version.get()
    }

    /// Read-only changesets reject every mutation with [`Error::OperationInvalid`].
    pub fn is_read_only(&self) -> bool {
        self.base().is_read_only()
    }

    /// Either `"complex"` or `"list"`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Complex(_) => "complex",
            Self::List(_) => "list",
        }
    }

    pub fn as_complex(&self) -> Option<&Rc<ComplexChangeset>> {
        match self {
            Self::Complex(c) => Some(c),
            Self::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&Rc<ListChangeset>> {
        match self {
            Self::List(l) => Some(l),
            Self::Complex(_) => None,
        }
    }

    /// True if this changeset or any nested changeset records a change.
    pub fn has_changes(&self) -> bool {
        match self {
            Self::Complex(c) => c.has_changes(),
            Self::List(l) => l.has_changes(),
        }
    }

    /// True if this changeset itself records a change, ignoring nested changesets.
    pub fn has_local_changes(&self) -> bool {
        match self {
            Self::Complex(c) => c.has_local_changes(),
            Self::List(l) => l.has_local_changes(),
        }
    }

    /// Returns true if both handles refer to the same changeset.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Complex(a), Self::Complex(b)) => Rc::ptr_eq(a, b),
            (Self::List(a), Self::List(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Merges `self` followed by `other` into a new, read-only changeset.
    ///
    /// Both changesets must be of the same kind and target the same container, and `other` must
    /// have been created against a target version no older than `self`'s.
    pub fn compose(&self, other: &Changeset) -> Result<Changeset, Error> {
        if self.kind() != other.kind() {
            return Err(Error::argument(
                "other",
                format!(
                    "cannot compose a {} changeset with a {} changeset",
                    self.kind(),
                    other.kind()
                ),
            ));
        }
        if self.ptr_eq(other) {
            return Err(Error::operation("a changeset cannot be composed with itself"));
        }
        if self.target() != other.target() {
            return Err(Error::argument(
                "other",
                format!(
                    "changesets target different containers ({} and {})",
                    self.target(),
                    other.target()
                ),
            ));
        }
        if other.target_version() < self.target_version() {
            return Err(Error::argument(
                "other",
                format!(
                    "target version {} precedes target version {}",
                    other.target_version(),
                    self.target_version()
                ),
            ));
        }

        let base = ChangesetBase::composite(self.base(), other.base());
        Ok(match (self, other) {
            (Self::Complex(a), Self::Complex(b)) => Self::Complex(Rc::new(a.compose(b, base)?)),
            (Self::List(a), Self::List(b)) => Self::List(Rc::new(a.compose(b, base)?)),
            _ => unreachable!("kinds were checked above"),
        })
    }

    /// Discards every recorded change.
    pub(crate) fn clear_changes(&self) -> Result<(), Error> {
        self.base().assert_writable()?;
        match self {
            Self::Complex(c) => c.clear(),
            Self::List(l) => l.clear_changes(),
        }
        self.base().bump();
        Ok(())
    }

    /// Makes the changeset read-only. One-way and idempotent.
    pub(crate) fn freeze(&self) {
        self.base().state.set(ChangesetState::ReadOnly);
    }

    pub fn net_order(&self) -> usize {
        self.base().net_order.get()
    }

    pub(crate) fn set_net_order(&self, order: usize) {
        self.base().net_order.set(order);
    }

    /// The changesets hooked up in this changeset's slots.
    pub(crate) fn nested(&self) -> Vec<Changeset> {
        match self {
            Self::Complex(c) => c.nested(),
            Self::List(l) => l.nested(),
        }
    }

    /// Returns true if `target`'s changeset is reachable through nested entries.
    pub(crate) fn reaches(&self, target: ContainerId) -> bool {
        let mut seen = crate::create_set();
        let mut stack = vec![self.clone()];
        while let Some(changeset) = stack.pop() {
            if changeset.target() == target {
                return true;
            }
            if seen.insert(changeset.target()) {
                stack.extend(changeset.nested());
            }
        }
        false
    }

    /// Writes the recorded changes into the target container.
    pub(crate) fn apply(&self, container: &mut Container, version: u64) -> Result<(), Error> {
        match (self, &mut container.data) {
            (Self::Complex(c), ContainerData::Complex { values, .. }) => c.apply(values),
            (Self::List(l), ContainerData::List(data)) => l.apply(data),
            _ => {
                return Err(Error::WrongKind {
                    id: container.id,
                    expected: self.kind(),
                });
            }
        }
        container.version = version;
        Ok(())
    }
}

impl From<Rc<ComplexChangeset>> for Changeset {
    fn from(changeset: Rc<ComplexChangeset>) -> Self {
        Self::Complex(changeset)
    }
}

impl From<Rc<ListChangeset>> for Changeset {
    fn from(changeset: Rc<ListChangeset>) -> Self {
        Self::List(changeset)
    }
}
