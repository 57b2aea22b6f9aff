// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Identifiers for containers, transactions and scope frames, and the allocator issuing them.
//!
//! There are no process-wide counters: every [`Context`](crate::Context) owns one
//! [`IdAllocator`], seeded from its [`Config`](crate::Config).

use std::fmt;

/// Identity of a container (a complex or list instance) within one context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub struct ContainerId(u64);

impl ContainerId {
    /// Returns the raw identifier.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identity of a transaction within one context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub struct TransactionId(u64);

impl TransactionId {
    /// Returns the raw identifier.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx{}", self.0)
    }
}

/// Identity of one entered scope on a context's scope stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FrameId(u64);

/// Issues identifiers. Each kind of identifier has its own monotonic sequence.
#[derive(Debug, Clone)]
pub struct IdAllocator {
    next_container: u64,
    next_transaction: u64,
    next_frame: u64,
}

impl IdAllocator {
    /// Creates an allocator whose container and transaction sequences start at `first`.
    pub fn starting_at(first: u64) -> Self {
        Self {
            next_container: first,
            next_transaction: first,
            next_frame: 0,
        }
    }

    pub(crate) fn container(&mut self) -> ContainerId {
        let id = ContainerId(self.next_container);
        self.next_container += 1;
        id
    }

    pub(crate) fn transaction(&mut self) -> TransactionId {
        let id = TransactionId(self.next_transaction);
        self.next_transaction += 1;
        id
    }

    pub(crate) fn frame(&mut self) -> FrameId {
        let id = FrameId(self.next_frame);
        self.next_frame += 1;
        id
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

#[cfg(test)]
impl ContainerId {
    pub(crate) fn for_tests(raw: u64) -> Self {
        Self(raw)
    }
}

#[cfg(test)]
impl TransactionId {
    pub(crate) fn for_tests(raw: u64) -> Self {
        Self(raw)
    }
}
