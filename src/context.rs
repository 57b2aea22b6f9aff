// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! The owner of all containers, transactions and scopes.
//!
//! Every operation that depends on "the current transaction" is a method of [`Context`]. The
//! current transaction is the one made current by the innermost entered scope, see
//! [`Context::enter_change`], [`Context::enter`] and [`Context::enter_committed`].
//!
//! Mutating a container with no transaction current runs the mutation in an implicit
//! transaction that is committed right away.

use crate::{
    ActionResult, Change, Changeset, ComplexType, ContainerId, IdAllocator, ListData,
    RejectReason, SetOptions, Transaction, TransactionId, Value,
    changeset::{ListChangeset, ListEdits},
    create_map, create_set,
    error::Error,
    ids::FrameId,
    observer::ChangeObserver,
    store::{Container, ContainerData, ContainerRef, Refs, Slot, Store},
};
use smallvec::SmallVec;
use std::{cmp::Ordering, fmt, rc::Rc};
use tracing::{debug, info, warn};

mod scope;
pub use scope::{CommittedScope, TransactionScope};

/// Seeds of a [`Context`]'s counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub struct Config {
    /// The global version assigned to the first committed transaction.
    pub first_version: u64,
    /// The first container and transaction identifier.
    pub first_id: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            first_version: 1,
            first_id: 1,
        }
    }
}

#[derive(Debug)]
struct ScopeFrame {
    id: FrameId,
    /// `None` for committed scopes.
    transaction: Option<TransactionId>,
}

type Observers = SmallVec<[Rc<dyn ChangeObserver>; 1]>;

/// Containers, their observers, and the transactions changing them.
pub struct Context {
    store: Store,
    transactions: crate::HashMap<TransactionId, Transaction>,
    frames: Vec<ScopeFrame>,
    observers: crate::HashMap<ContainerId, Observers>,
    ids: IdAllocator,
    next_version: u64,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("store", &self.store)
            .field("transactions", &self.transactions)
            .field("frames", &self.frames)
            .field("next_version", &self.next_version)
            .finish_non_exhaustive()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

fn transaction_in(
    transactions: &mut crate::HashMap<TransactionId, Transaction>,
    id: TransactionId,
) -> Result<&mut Transaction, Error> {
    transactions
        .get_mut(&id)
        .ok_or_else(|| Error::argument("transaction", format!("{id} is not an active transaction")))
}

impl Context {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            store: Store::default(),
            transactions: create_map(),
            frames: Vec::new(),
            observers: create_map(),
            ids: IdAllocator::starting_at(config.first_id),
            next_version: config.first_version,
        }
    }

    // --- containers ---------------------------------------------------------------------------

    /// Creates a complex container. Properties missing from `values` start out as null.
    ///
    /// Creation is immediate, even while a transaction is current.
    pub fn create_complex<'n>(
        &mut self,
        schema: &Rc<ComplexType>,
        values: impl IntoIterator<Item = (&'n str, Value)>,
    ) -> Result<ContainerId, Error> {
        let mut data = vec![Value::Null; schema.properties().len()];
        for (name, value) in values {
            let (index, _) = schema.property(name)?;
            data[index] = value;
        }
        self.store.check_refs(&data)?;
        let id = self.ids.container();
        self.store.insert(Container {
            id,
            version: 0,
            refs: Refs::new(),
            data: ContainerData::Complex {
                schema: Rc::clone(schema),
                values: data,
            },
        });
        debug!(container = %id, schema = schema.name(), "created complex container");
        Ok(id)
    }

    /// Creates a list container holding the distinct `values`, in order.
    ///
    /// Creation is immediate, even while a transaction is current.
    pub fn create_list(&mut self, values: Vec<Value>) -> Result<ContainerId, Error> {
        self.store.check_refs(&values)?;
        let id = self.ids.container();
        self.store.insert(Container {
            id,
            version: 0,
            refs: Refs::new(),
            data: ContainerData::List(Rc::new(ListData::from_values(values))),
        });
        debug!(container = %id, "created list container");
        Ok(id)
    }

    /// The committed version of a container: the version of the last transaction that changed
    /// it, or 0.
    pub fn version(&self, id: ContainerId) -> Result<u64, Error> {
        Ok(self.store.get(id)?.version)
    }

    /// The containers holding `id`, as seen from the current transaction.
    pub fn refs(&self, id: ContainerId) -> Result<Vec<ContainerRef>, Error> {
        match self.current() {
            Some(txn) => txn.ambient_refs(&self.store, id),
            None => Ok(self.store.get(id)?.refs.to_vec()),
        }
    }

    /// Reads a property, including changes of the current transaction.
    pub fn get(&self, id: ContainerId, name: &str) -> Result<Value, Error> {
        let (schema, values) = self.store.get(id)?.complex()?;
        let (index, _) = schema.property(name)?;
        if let Some(Changeset::Complex(changeset)) = self.ambient_changeset(id) {
            if let Some(value) = changeset.effective(name) {
                return Ok(value);
            }
        }
        Ok(values[index].clone())
    }

    /// Reads a list, including changes of the current transaction.
    pub fn list(&self, id: ContainerId) -> Result<Rc<ListData>, Error> {
        let data = self.store.get(id)?.list()?;
        Ok(match self.ambient_changeset(id) {
            Some(Changeset::List(changeset)) => changeset.projected_mock(),
            _ => Rc::clone(data),
        })
    }

    /// Registers an observer for the changes of `id`.
    pub fn observe(&mut self, id: ContainerId, observer: Rc<dyn ChangeObserver>) -> Result<(), Error> {
        self.store.get(id)?;
        self.observers.entry(id).or_default().push(observer);
        Ok(())
    }

    fn observers_of(&self, id: ContainerId) -> Observers {
        self.observers.get(&id).cloned().unwrap_or_default()
    }

    // --- mutations ----------------------------------------------------------------------------

    /// Assigns a property.
    pub fn set(&mut self, id: ContainerId, name: &str, value: impl Into<Value>) -> Result<(), Error> {
        let value = value.into();
        self.mutate(|ctx, tx| ctx.record_set(tx, id, name, value))
    }

    fn record_set(
        &mut self,
        tx: TransactionId,
        id: ContainerId,
        name: &str,
        value: Value,
    ) -> Result<(), Error> {
        let (schema, values) = self.store.get(id)?.complex()?;
        let (index, name) = schema.property(name)?;
        let name = Rc::clone(name);
        let committed = values[index].clone();
        self.store.check_refs([&value])?;

        let txn = transaction_in(&mut self.transactions, tx)?;
        let changeset = txn.ensure_changeset(&self.store, id)?;
        let complex = changeset.as_complex().ok_or(Error::WrongKind {
            id,
            expected: "complex",
        })?;
        let Some(previous) = complex.set(&name, value.clone(), &committed)? else {
            return Ok(());
        };

        let slot = Slot::Property(name);
        if let Some(old_child) = previous.as_ref_id() {
            txn.unlink(id, &slot);
            txn.change_ref_mut(old_child)
                .remove_ref(ContainerRef::new(id, slot.clone()));
        }
        if let Some(new_child) = value.as_ref_id() {
            txn.change_ref_mut(new_child)
                .add_ref(ContainerRef::new(id, slot));
        }
        Ok(())
    }

    /// Appends the values the list does not hold yet.
    pub fn list_add(&mut self, id: ContainerId, values: Vec<Value>) -> Result<(), Error> {
        self.list_set(id, values, SetOptions::append())
    }

    /// Inserts the values the list does not hold yet, starting at `index`.
    pub fn list_insert(&mut self, id: ContainerId, index: usize, values: Vec<Value>) -> Result<(), Error> {
        self.list_set(id, values, SetOptions::insert_at(index))
    }

    /// Merges `values` into the list, see [`SetOptions`].
    ///
    /// [`SetOptions::update`] has no effect: list elements are identified by value, so an
    /// element the list already holds has nothing left to update. Setting only that flag
    /// records nothing.
    pub fn list_set(
        &mut self,
        id: ContainerId,
        values: Vec<Value>,
        options: SetOptions,
    ) -> Result<(), Error> {
        self.store.check_refs(&values)?;
        self.edit_list(id, |list| list.set(values, options))
    }

    /// Removes every given value the list holds.
    pub fn list_remove(&mut self, id: ContainerId, values: Vec<Value>) -> Result<(), Error> {
        self.edit_list(id, |list| list.remove(values))
    }

    /// Removes up to `count` elements, starting at `start`.
    pub fn list_remove_at(&mut self, id: ContainerId, start: usize, count: usize) -> Result<(), Error> {
        self.edit_list(id, |list| list.remove_at(start, count))
    }

    pub fn list_clear(&mut self, id: ContainerId) -> Result<(), Error> {
        self.edit_list(id, ListChangeset::clear)
    }

    /// Sorts the list stably.
    pub fn list_sort(
        &mut self,
        id: ContainerId,
        comparator: impl Fn(&Value, &Value) -> Ordering + 'static,
    ) -> Result<(), Error> {
        self.edit_list(id, |list| {
            list.sort(Rc::new(comparator))
                .map(|()| ListEdits::default())
        })
    }

    fn edit_list(
        &mut self,
        id: ContainerId,
        edit: impl FnOnce(&ListChangeset) -> Result<ListEdits, Error>,
    ) -> Result<(), Error> {
        self.store.get(id)?.list()?;
        self.mutate(|ctx, tx| {
            let txn = transaction_in(&mut ctx.transactions, tx)?;
            let changeset = txn.ensure_changeset(&ctx.store, id)?;
            let list = changeset.as_list().ok_or(Error::WrongKind {
                id,
                expected: "list",
            })?;
            let edits = edit(list)?;
            for child in edits.removed.iter().filter_map(Value::as_ref_id) {
                let slot = Slot::Element(child);
                txn.unlink(id, &slot);
                txn.change_ref_mut(child)
                    .remove_ref(ContainerRef::new(id, slot));
            }
            for child in edits.added.iter().filter_map(Value::as_ref_id) {
                txn.change_ref_mut(child)
                    .add_ref(ContainerRef::new(id, Slot::Element(child)));
            }
            Ok(())
        })
    }

    /// Discards the current transaction's changes to `id`, including their reference
    /// bookkeeping.
    pub fn clear_changes(&mut self, id: ContainerId) -> Result<(), Error> {
        let tx = self
            .current_transaction()
            .ok_or_else(|| Error::operation("changes can only be cleared inside a transaction"))?;
        let txn = transaction_in(&mut self.transactions, tx)?;
        let changeset = txn.ensure_changeset(&self.store, id)?;
        if changeset.is_read_only() {
            return Err(Error::operation(format!("the changeset of {id} is read-only")));
        }

        let mut added = Vec::new();
        let mut removed = Vec::new();
        match &changeset {
            Changeset::Complex(complex) => {
                for (name, change) in complex.changes() {
                    let Change::Replace(replace) = change else {
                        continue;
                    };
                    let slot = Slot::Property(name);
                    if let Some(child) = replace.value().as_ref_id() {
                        added.push((child, slot.clone()));
                    }
                    if let Some(child) = replace.old().as_ref_id() {
                        removed.push((child, slot));
                    }
                }
            }
            Changeset::List(list) => {
                let before = list.snapshot();
                let after = list.projected_mock();
                for child in after.iter().filter(|v| !before.contains(v)).filter_map(Value::as_ref_id) {
                    added.push((child, Slot::Element(child)));
                }
                for child in before.iter().filter(|v| !after.contains(v)).filter_map(Value::as_ref_id) {
                    removed.push((child, Slot::Element(child)));
                }
            }
        }
        // undo what the discarded changes did to the children's back-references
        for (child, slot) in added {
            txn.change_ref_mut(child)
                .remove_ref(ContainerRef::new(id, slot));
        }
        for (child, slot) in removed {
            txn.change_ref_mut(child)
                .add_ref(ContainerRef::new(id, slot));
        }
        txn.change_ref_mut(id).unlink_all();
        changeset.clear_changes()
    }

    /// Runs `f` in the current transaction, or in an implicit one committed right after.
    fn mutate<R>(
        &mut self,
        f: impl FnOnce(&mut Self, TransactionId) -> Result<R, Error>,
    ) -> Result<R, Error> {
        if let Some(tx) = self.current_transaction() {
            return f(self, tx);
        }
        let mut scope = self.enter_change();
        let tx = scope.transaction_id();
        debug!(transaction = %tx, "running mutation in an implicit transaction");
        match f(&mut *scope, tx) {
            Ok(value) => {
                scope.accept()?;
                Ok(value)
            }
            Err(error) => {
                drop(scope);
                self.transactions.remove(&tx);
                Err(error)
            }
        }
    }

    // --- scopes -------------------------------------------------------------------------------

    /// The transaction made current by the innermost scope, if any.
    pub fn current_transaction(&self) -> Option<TransactionId> {
        self.frames.last().and_then(|frame| frame.transaction)
    }

    fn current(&self) -> Option<&Transaction> {
        self.current_transaction()
            .and_then(|tx| self.transactions.get(&tx))
    }

    /// The current transaction's changeset of `id`, if it has one.
    pub fn changeset(&self, id: ContainerId) -> Option<Changeset> {
        self.ambient_changeset(id).cloned()
    }

    fn ambient_changeset(&self, id: ContainerId) -> Option<&Changeset> {
        self.current()?.changeset(id)
    }

    /// An unresolved transaction.
    pub fn transaction(&self, id: TransactionId) -> Option<&Transaction> {
        self.transactions.get(&id)
    }

    /// Joins the current transaction, or starts a new one if there is none.
    ///
    /// Only the scope that started the transaction is its root and can accept it.
    pub fn enter_change(&mut self) -> TransactionScope<'_> {
        let (tx, root) = match self.current_transaction() {
            Some(tx) => (tx, false),
            None => {
                let tx = self.ids.transaction();
                self.transactions.insert(tx, Transaction::new(tx));
                debug!(transaction = %tx, "started transaction");
                (tx, true)
            }
        };
        let frame = self.push_frame(Some(tx));
        if let Some(txn) = self.transactions.get_mut(&tx) {
            txn.scope_enter();
        }
        TransactionScope::new(self, frame, tx, root)
    }

    /// Makes `tx` current again.
    ///
    /// Resuming a suspended transaction rejects it with [`RejectReason::Concurrency`] if another
    /// transaction committed changes to one of its containers in the meantime.
    pub fn enter(&mut self, tx: TransactionId) -> Result<TransactionScope<'_>, Error> {
        let (resumed, stale) = {
            let txn = self.transactions.get(&tx).ok_or_else(|| {
                Error::argument("transaction", format!("{tx} is not an active transaction"))
            })?;
            let resumed = txn.scope_count() == 0;
            (resumed, resumed && txn.is_stale(&self.store))
        };
        if stale {
            warn!(transaction = %tx, "containers changed while the transaction was suspended");
            return Err(self.reject(tx, Some(RejectReason::Concurrency)));
        }
        let frame = self.push_frame(Some(tx));
        transaction_in(&mut self.transactions, tx)?.scope_enter();
        Ok(TransactionScope::new(self, frame, tx, resumed))
    }

    /// Makes no transaction current: reads see committed state and mutations commit
    /// immediately.
    pub fn enter_committed(&mut self) -> CommittedScope<'_> {
        let frame = self.push_frame(None);
        CommittedScope::new(self, frame)
    }

    fn push_frame(&mut self, transaction: Option<TransactionId>) -> FrameId {
        let id = self.ids.frame();
        self.frames.push(ScopeFrame { id, transaction });
        id
    }

    /// Removes a frame, unless it was already removed by the resolution of its transaction.
    fn pop_frame(&mut self, frame: FrameId) -> Option<ScopeFrame> {
        let index = self.frames.iter().rposition(|f| f.id == frame)?;
        Some(self.frames.remove(index))
    }

    fn exit_frame(&mut self, frame: FrameId) {
        let Some(ScopeFrame {
            transaction: Some(tx),
            ..
        }) = self.pop_frame(frame)
        else {
            return;
        };
        if let Some(txn) = self.transactions.get_mut(&tx) {
            txn.scope_exit();
        }
    }

    // --- lifecycle ----------------------------------------------------------------------------

    /// Commits a transaction: runs the will phase (unless it was previewed already), applies
    /// the changes and notifies observers.
    ///
    /// Returns the resolved transaction, or [`Error::TransactionRejected`] if it was rejected.
    /// Fails with [`Error::OperationInvalid`] when called from within the transaction's own
    /// commit, e.g. by an observer.
    pub fn commit(&mut self, tx: TransactionId) -> Result<Transaction, Error> {
        transaction_in(&mut self.transactions, tx)?.acquire_action_lock()?;
        let outcome = match self.commit_will_core(tx) {
            Ok(ActionResult::Fulfilled) => {
                let version = self.next_version;
                transaction_in(&mut self.transactions, tx)
                    .and_then(|txn| txn.apply_changes(&mut self.store, version))
                    .map(|()| {
                        self.next_version += 1;
                        debug!(transaction = %tx, version, "committed transaction");
                        ActionResult::Fulfilled
                    })
            }
            other => other,
        };
        if let Some(txn) = self.transactions.get_mut(&tx) {
            txn.release_action_lock();
        }

        let result = outcome?;
        let txn = self.resolve(tx, result.clone())?;
        match result {
            ActionResult::Fulfilled => Ok(txn),
            ActionResult::Rejected(reason) => Err(Error::TransactionRejected(reason)),
        }
    }

    /// Runs the will phase without committing.
    ///
    /// A rejection is reported as [`ActionResult::Rejected`] rather than an error, and resolves
    /// the transaction. After a fulfilled preview the transaction is read-only and can still be
    /// committed or rejected.
    pub fn commit_will(&mut self, tx: TransactionId) -> Result<ActionResult, Error> {
        transaction_in(&mut self.transactions, tx)?.acquire_action_lock()?;
        let result = self.commit_will_core(tx);
        if let Some(txn) = self.transactions.get_mut(&tx) {
            txn.release_action_lock();
        }
        let result = result?;
        if result.is_rejected() {
            self.resolve(tx, result.clone())?;
        }
        Ok(result)
    }

    fn commit_will_core(&mut self, tx: TransactionId) -> Result<ActionResult, Error> {
        let txn = transaction_in(&mut self.transactions, tx)?;
        if let Some(result) = txn.cached_will() {
            return Ok(result);
        }
        let stale = txn.scope_enter() && txn.is_stale(&self.store);
        let frame = self.push_frame(Some(tx));
        let result = if stale {
            warn!(transaction = %tx, "containers changed while the transaction was suspended");
            Ok(ActionResult::Rejected(RejectReason::Concurrency))
        } else {
            self.notify_will(tx)
        };
        self.exit_frame(frame);

        let result = result?;
        transaction_in(&mut self.transactions, tx)?.finish_will(result.clone());
        Ok(result)
    }

    /// Builds the graph and notifies observers in net order, until no new changesets show up.
    fn notify_will(&mut self, tx: TransactionId) -> Result<ActionResult, Error> {
        let mut notified = create_set();
        loop {
            let txn = transaction_in(&mut self.transactions, tx)?;
            txn.build_graph(&self.store)?;
            let pending: Vec<Changeset> = txn
                .effective_changesets()
                .filter(|changeset| !notified.contains(&changeset.target()))
                .cloned()
                .collect();
            if pending.is_empty() {
                return Ok(ActionResult::Fulfilled);
            }
            for changeset in pending {
                notified.insert(changeset.target());
                for observer in self.observers_of(changeset.target()) {
                    if let Err(reason) = observer.will_change(self, &changeset) {
                        info!(
                            transaction = %tx,
                            container = %changeset.target(),
                            %reason,
                            "change canceled by observer"
                        );
                        return Ok(ActionResult::Rejected(reason));
                    }
                }
            }
        }
    }

    /// Rejects a transaction and returns the resulting [`Error::TransactionRejected`].
    ///
    /// The default reason is [`RejectReason::Canceled`]. Returns [`Error::OperationInvalid`]
    /// instead if the transaction is no longer active or is being committed.
    pub fn reject(&mut self, tx: TransactionId, reason: Option<RejectReason>) -> Error {
        match self.transactions.get(&tx) {
            None => {
                return Error::operation(format!("{tx} is not an active transaction"));
            }
            Some(txn) if txn.is_locked() => {
                return Error::operation(format!(
                    "transaction {tx} cannot be rejected while it is being committed"
                ));
            }
            Some(_) => {}
        }
        let reason = reason.unwrap_or(RejectReason::Canceled);
        info!(transaction = %tx, %reason, "rejecting transaction");
        match self.resolve(tx, ActionResult::Rejected(reason.clone())) {
            Ok(_) => Error::TransactionRejected(reason),
            Err(error) => error,
        }
    }

    /// Drops a suspended transaction without notifying anyone.
    pub fn discard(&mut self, tx: TransactionId) -> Result<Transaction, Error> {
        let txn = transaction_in(&mut self.transactions, tx)?;
        if txn.scope_count() > 0 {
            return Err(Error::operation(format!(
                "transaction {tx} is current and cannot be discarded"
            )));
        }
        debug!(transaction = %tx, "discarded transaction");
        self.transactions
            .remove(&tx)
            .ok_or_else(|| Error::argument("transaction", format!("{tx} is not an active transaction")))
    }

    /// Finalizes a transaction: forces its scopes out and notifies observers with no
    /// transaction current.
    fn resolve(&mut self, tx: TransactionId, result: ActionResult) -> Result<Transaction, Error> {
        let mut txn = self
            .transactions
            .remove(&tx)
            .ok_or_else(|| Error::argument("transaction", format!("{tx} is not an active transaction")))?;
        txn.resolve(result.clone());
        self.frames.retain(|frame| frame.transaction != Some(tx));

        let frame = self.push_frame(None);
        for changeset in txn.effective_changesets() {
            for observer in self.observers_of(changeset.target()) {
                match &result {
                    ActionResult::Fulfilled => observer.did_change(self, changeset),
                    ActionResult::Rejected(reason) => observer.rejected(self, changeset, reason),
                }
            }
        }
        self.pop_frame(frame);
        Ok(txn)
    }
}
