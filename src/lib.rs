// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! # typetx: Transactional Change Tracking for Container Graphs
//!
//! This crate provides the transaction and changeset machinery of a client-side type
//! framework. Model instances come in two shapes:
//!
//! - **complex** containers: record-like instances with a fixed, declared set of properties
//!   (see [`ComplexType`]);
//! - **list** containers: ordered collections of distinct values.
//!
//! Properties and list elements can refer to other containers through [`Value::Ref`], so the
//! instances of an application form a graph, and that graph may well contain cycles.
//!
//! ## Core Concepts
//!
//! - [`Changeset`]: the pending mutations of one container within one transaction. A
//!   [`ComplexChangeset`] maps property names to a [`Change`]; a [`ListChangeset`] records an
//!   ordered sequence of primitive [`ListChange`]s and previews the list's future state.
//! - [`ChangeRef`]: per container, the links from its slots to the child changesets hooked up
//!   there, plus the back-references the transaction added or removed.
//! - [`Transaction`]: owns all changesets created while it is current, orders them by
//!   dependency ("net order", leaves first), runs the cancelable *will* phase and then applies
//!   everything atomically, or rejects and rolls back.
//! - [`Context`]: owns the container store, the transactions and the scope stack. It is passed
//!   explicitly wherever "the current transaction" matters.
//!
//! ## Getting Started
//!
//! ```rust
//! use typetx::{ComplexType, Context, Value, values};
//!
//! let mut ctx = Context::new();
//! let derived = ComplexType::new("Derived", ["foo", "bar", "myList"]);
//!
//! let list = ctx.create_list(values![1]).unwrap();
//! let target = ctx
//!     .create_complex(&derived, [("foo", 5.into()), ("bar", 6.into()), ("myList", list.into())])
//!     .unwrap();
//!
//! let mut scope = ctx.enter_change();
//! scope.set(target, "foo", 10).unwrap();
//! scope.list_add(list, values![3]).unwrap();
//!
//! // Reads see the pending changes while the transaction is current.
//! assert_eq!(scope.list(list).unwrap().elements(), values![1, 3].as_slice());
//!
//! let changeset = scope.changeset(target).unwrap();
//! let names: Vec<_> = changeset
//!     .as_complex()
//!     .unwrap()
//!     .property_names()
//!     .iter()
//!     .map(|name| name.to_string())
//!     .collect();
//! assert_eq!(names, ["foo", "myList"]);
//!
//! scope.accept().unwrap();
//! assert_eq!(ctx.get(target, "foo").unwrap(), Value::Int(10));
//! ```
//!
//! ## Lifecycle
//!
//! A transaction starts out *proposed*. Committing it first runs the **will** phase: the
//! dependency graph is built, and every changeset's observers get a chance to cancel (see
//! [`ChangeObserver::will_change`]). Observers may make further changes during that phase;
//! those are picked up before the phase completes. Afterwards every changeset is read-only.
//! If nobody canceled, the transaction gets a new global version, its changes are applied in
//! net order and observers are told via [`ChangeObserver::did_change`]; otherwise they are told
//! via [`ChangeObserver::rejected`] and the stored data is left untouched.
//!
//! ## Concurrency
//!
//! Everything is single-threaded. "Concurrency" means several logical transactions
//! interleaving on one thread: a transaction can be suspended (its root scope exited without
//! committing) and re-entered later. Re-entering checks that no other transaction committed
//! changes to any of its containers in between; if one did, the transaction is rejected with
//! [`RejectReason::Concurrency`].
//!
//! ## Features
//!
//! - `serde`: Provides `serde` support for values, identifiers and transaction states.
//! - `arbitrary`: Implements `quickcheck::Arbitrary` for [`Value`].
#[cfg(test)]
#[macro_use(quickcheck)]
extern crate quickcheck_macros;

use ahash::RandomState;
use std::{
    hash::BuildHasher,
    sync::atomic::{AtomicBool, Ordering},
};

// Use a constant seed for hashing to make benchmarks and debug output reproducible.
pub(crate) const DETERMINISTIC_HASHER: RandomState = RandomState::with_seeds(48, 1516, 23, 42);

pub mod changeset;
pub use changeset::{
    Change, Changeset, ComplexChangeset, ListChange, ListChangeset, Replace, SetOptions,
};
mod context;
pub use context::{CommittedScope, Config, Context, TransactionScope};
mod error;
pub use error::{ActionResult, Error, RejectReason};
mod ids;
pub use ids::{ContainerId, IdAllocator, TransactionId};
/// Macros usable for tests and initialization
pub mod macros;
pub mod observer;
pub use observer::ChangeObserver;
pub mod store;
pub use store::{ComplexType, ContainerRef, ListData, Slot};
pub mod transaction;
pub use transaction::{ChangeRef, Transaction, TransactionState};
mod value;
pub use value::{Comparator, Value};

#[cfg(test)]
pub(crate) mod test_util;

static ENABLE_DETERMINISM: AtomicBool = AtomicBool::new(false);

/// Makes all hash-based data structures use fixed seeds.
///
/// This should only be enabled for testing and benchmarking, as it increases the odds of DoS
/// scenarios.
#[doc(hidden)]
pub fn enable_determinism() {
    ENABLE_DETERMINISM.store(true, Ordering::Release);
}

/// Checks if determinism is enabled.
#[doc(hidden)]
pub fn determinism_enabled() -> bool {
    ENABLE_DETERMINISM.load(Ordering::Acquire)
}

#[inline]
fn make_random_state() -> RandomState {
    if determinism_enabled() {
        DETERMINISTIC_HASHER
    } else {
        RandomState::new()
    }
}

pub(crate) type HashMap<K, V> = std::collections::HashMap<K, V, TxRandomState>;
pub(crate) type HashSet<T> = std::collections::HashSet<T, TxRandomState>;

pub(crate) fn create_map<K, V>() -> HashMap<K, V> {
    HashMap::with_hasher(TxRandomState::default())
}

pub(crate) fn create_set<T>() -> HashSet<T> {
    HashSet::with_hasher(TxRandomState::default())
}

/// This is a small wrapper around ahash's `RandomState`.
/// This allows us to easily switch to a non-random `RandomState` for use in tests.
#[derive(Clone)]
pub struct TxRandomState {
    inner: RandomState,
}

// Falls back on a regular ahash::RandomState except when `enable_determinism` has been
// called, in which case the fixed-seed state is used.
impl Default for TxRandomState {
    #[inline]
    fn default() -> Self {
        Self {
            inner: make_random_state(),
        }
    }
}

impl BuildHasher for TxRandomState {
    type Hasher = <RandomState as BuildHasher>::Hasher;

    #[inline]
    fn build_hasher(&self) -> Self::Hasher {
        self.inner.build_hasher()
    }
}
