// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Observe and validate changes to a container.
//!
//! Observers are registered per container with
//! [`Context::observe`](crate::Context::observe). While a transaction commits, every observer
//! of every changed container is told about the changeset in three stages:
//!
//! 1. [`ChangeObserver::will_change`] during the will phase. Returning an `Err` cancels the whole
//!    transaction. The transaction is still current at this point, so the observer may make
//!    further changes through the context; those become part of the same transaction.
//! 2. [`ChangeObserver::did_change`] once the changes have been applied, or
//! 3. [`ChangeObserver::rejected`] if the transaction was rejected instead.
//!
//! The last two run with no transaction current, so reads see committed state.
//!
//! For a testing-oriented example, see the [`recording`] module.

use crate::{Changeset, Context, RejectReason};

pub mod recording;

/// Observes and optionally cancels the changes of a container.
///
/// An observer that never cancels is a plain observer. One whose `will_change` can fail may be
/// referred to as a validator.
#[expect(unused_variables)]
pub trait ChangeObserver {
    /// Observe and validate a pending change.
    ///
    /// Called in net order, i.e. after the observers of every container this one holds.
    fn will_change(&self, ctx: &mut Context, changeset: &Changeset) -> Result<(), RejectReason> {
        Ok(())
    }

    /// Observe an applied change.
    fn did_change(&self, ctx: &mut Context, changeset: &Changeset) {}

    /// Observe a change that was rejected, for `reason`.
    fn rejected(&self, ctx: &mut Context, changeset: &Changeset, reason: &RejectReason) {}
}

/// Adapts a validating closure into an observer.
///
/// ```rust
/// # use typetx::{observer::Validator, RejectReason};
/// let no_lists = Validator(|changeset: &typetx::Changeset| {
///     if changeset.kind() == "list" {
///         Err(RejectReason::from("lists are frozen"))
///     } else {
///         Ok(())
///     }
/// });
/// # let _ = no_lists;
/// ```
pub struct Validator<F>(pub F);

impl<F> ChangeObserver for Validator<F>
where
    F: Fn(&Changeset) -> Result<(), RejectReason>,
{
    fn will_change(&self, _ctx: &mut Context, changeset: &Changeset) -> Result<(), RejectReason> {
        (self.0)(changeset)
    }
}
