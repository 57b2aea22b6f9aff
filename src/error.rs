// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Errors and outcomes of changeset and transaction operations.
//!
//! Misuse is reported through [`Error::ArgumentInvalid`] (and its store-lookup relatives
//! [`Error::NotFound`] and [`Error::WrongKind`]) or [`Error::OperationInvalid`]. Both are
//! detected before any state is touched, and neither is ever retried internally.
//!
//! A rejected transaction is an expected outcome rather than a bug. Committing surfaces it as
//! [`Error::TransactionRejected`], while previewing (see
//! [`Context::commit_will`](crate::Context::commit_will)) reports it as a non-failing
//! [`ActionResult::Rejected`].

use crate::ids::ContainerId;
use std::{borrow::Cow, fmt, sync::Arc};

/// An error raised by a changeset, transaction or store operation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// An argument was not acceptable, e.g. an undeclared property name.
    #[error("argument `{name}` is invalid: {reason}")]
    ArgumentInvalid {
        /// The name of the offending argument.
        name: &'static str,
        /// What was wrong with it.
        reason: Cow<'static, str>,
    },

    /// The operation cannot be performed in the current state, e.g. mutating a read-only
    /// changeset or committing a transaction from within its own commit.
    #[error("operation is invalid: {0}")]
    OperationInvalid(Cow<'static, str>),

    /// The transaction was rejected, either explicitly or by an observer.
    #[error("transaction rejected: {0}")]
    TransactionRejected(RejectReason),

    /// No container with the given identifier exists.
    #[error("container {0} does not exist")]
    NotFound(ContainerId),

    /// The container exists but is not of the expected kind.
    #[error("container {id} is not a {expected} container")]
    WrongKind {
        /// The container that was looked up.
        id: ContainerId,
        /// The kind the operation needs ("complex" or "list").
        expected: &'static str,
    },
}

impl Error {
    pub(crate) fn argument(name: &'static str, reason: impl Into<Cow<'static, str>>) -> Self {
        Self::ArgumentInvalid {
            name,
            reason: reason.into(),
        }
    }

    pub(crate) fn operation(reason: impl Into<Cow<'static, str>>) -> Self {
        Self::OperationInvalid(reason.into())
    }

    /// Returns the rejection reason if this error is a [`Error::TransactionRejected`].
    pub fn reject_reason(&self) -> Option<&RejectReason> {
        match self {
            Self::TransactionRejected(reason) => Some(reason),
            _ => None,
        }
    }

    /// Returns true for errors caused by invalid arguments.
    pub fn is_argument_invalid(&self) -> bool {
        matches!(
            self,
            Self::ArgumentInvalid { .. } | Self::NotFound(_) | Self::WrongKind { .. }
        )
    }

    /// Returns true for errors caused by calling an operation in the wrong state.
    pub fn is_operation_invalid(&self) -> bool {
        matches!(self, Self::OperationInvalid(_))
    }
}

/// Why a transaction was rejected.
#[derive(Debug, Clone)]
pub enum RejectReason {
    /// Rejected without a more specific reason.
    Canceled,
    /// Another transaction committed changes to a container this transaction also changed.
    Concurrency,
    /// A user-facing message, typically from a validating observer.
    Message(String),
    /// An arbitrary error.
    Error(Arc<dyn std::error::Error + Send + Sync>),
}

impl RejectReason {
    /// Wraps an arbitrary error as a rejection reason.
    pub fn error(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Error(Arc::new(error))
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Canceled => f.write_str("Transaction canceled"),
            Self::Concurrency => f.write_str("Concurrency error."),
            Self::Message(message) => f.write_str(message),
            Self::Error(error) => write!(f, "{error}"),
        }
    }
}

// Errors are compared by their message, which is all an observer can act on anyway.
impl PartialEq for RejectReason {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Canceled, Self::Canceled) | (Self::Concurrency, Self::Concurrency) => true,
            (Self::Message(l), Self::Message(r)) => l == r,
            (Self::Error(l), Self::Error(r)) => Arc::ptr_eq(l, r) || l.to_string() == r.to_string(),
            _ => false,
        }
    }
}

impl From<&str> for RejectReason {
    fn from(message: &str) -> Self {
        Self::Message(message.to_owned())
    }
}

impl From<String> for RejectReason {
    fn from(message: String) -> Self {
        Self::Message(message)
    }
}

/// The outcome of a transaction phase that reports rejection without failing.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "a rejected result should be handled"]
pub enum ActionResult {
    /// The phase completed and nobody objected.
    Fulfilled,
    /// The phase was canceled for the given reason.
    Rejected(RejectReason),
}

impl ActionResult {
    /// Returns true if nobody objected.
    pub fn is_fulfilled(&self) -> bool {
        matches!(self, Self::Fulfilled)
    }

    /// Returns true if the phase was canceled.
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }

    /// Returns the rejection reason, if any.
    pub fn reason(&self) -> Option<&RejectReason> {
        match self {
            Self::Fulfilled => None,
            Self::Rejected(reason) => Some(reason),
        }
    }

    /// Converts into a `Result`, turning a rejection into [`Error::TransactionRejected`].
    pub fn into_result(self) -> Result<(), Error> {
        match self {
            Self::Fulfilled => Ok(()),
            Self::Rejected(reason) => Err(Error::TransactionRejected(reason)),
        }
    }
}
