// (c) Copyright 2025 Helsing GmbH. All rights reserved.
use super::Context;
use crate::{ActionResult, RejectReason, Transaction, TransactionId, error::Error, ids::FrameId};
use std::ops::{Deref, DerefMut};
use tracing::debug;

/// Makes a transaction current for as long as it lives.
///
/// Dereferences to the [`Context`], so all reads and mutations go through the scope. Dropping
/// the root scope without accepting or rejecting suspends the transaction; see
/// [`Context::enter`] and [`Context::discard`].
#[must_use = "the transaction is only current while the scope is alive"]
pub struct TransactionScope<'a> {
    ctx: &'a mut Context,
    frame: FrameId,
    transaction: TransactionId,
    root: bool,
}

impl<'a> TransactionScope<'a> {
    pub(super) fn new(
        ctx: &'a mut Context,
        frame: FrameId,
        transaction: TransactionId,
        root: bool,
    ) -> Self {
        Self {
            ctx,
            frame,
            transaction,
            root,
        }
    }

    pub fn transaction_id(&self) -> TransactionId {
        self.transaction
    }

    /// True for the scope that started or resumed the transaction.
    pub fn is_root(&self) -> bool {
        self.root
    }

    /// Commits the transaction. Only the root scope may do so.
    pub fn accept(self) -> Result<Transaction, Error> {
        if !self.root {
            return Err(Error::operation(format!(
                "only the root scope of transaction {} can accept it",
                self.transaction
            )));
        }
        self.ctx.commit(self.transaction)
    }

    /// Rejects the transaction, by default with [`RejectReason::Canceled`].
    pub fn reject(self, reason: Option<RejectReason>) -> Error {
        self.ctx.reject(self.transaction, reason)
    }

    /// Runs the will phase without committing, see [`Context::commit_will`].
    pub fn preview(&mut self) -> Result<ActionResult, Error> {
        self.ctx.commit_will(self.transaction)
    }

    /// Leaves the transaction pending so that it can be resumed with [`Context::enter`].
    pub fn suspend(self) -> TransactionId {
        debug!(transaction = %self.transaction, "suspended transaction");
        self.transaction
    }
}

impl Deref for TransactionScope<'_> {
    type Target = Context;

    fn deref(&self) -> &Context {
        self.ctx
    }
}

impl DerefMut for TransactionScope<'_> {
    fn deref_mut(&mut self) -> &mut Context {
        self.ctx
    }
}

impl Drop for TransactionScope<'_> {
    fn drop(&mut self) {
        self.ctx.exit_frame(self.frame);
    }
}

/// Makes no transaction current for as long as it lives.
#[must_use = "no transaction is current only while the scope is alive"]
pub struct CommittedScope<'a> {
    ctx: &'a mut Context,
    frame: FrameId,
}

impl<'a> CommittedScope<'a> {
    pub(super) fn new(ctx: &'a mut Context, frame: FrameId) -> Self {
        Self { ctx, frame }
    }
}

impl Deref for CommittedScope<'_> {
    type Target = Context;

    fn deref(&self) -> &Context {
        self.ctx
    }
}

impl DerefMut for CommittedScope<'_> {
    fn deref_mut(&mut self) -> &mut Context {
        self.ctx
    }
}

impl Drop for CommittedScope<'_> {
    fn drop(&mut self) {
        self.ctx.exit_frame(self.frame);
    }
}
