// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! This module contains an implementation of ChangeObserver that simply records
//! all calls in a human readable form. This is mostly useful for tests.

use crate::{Changeset, Context, RejectReason, observer::ChangeObserver};
use std::cell::RefCell;

/// An observer that records all calls.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    changes_seen: RefCell<Vec<String>>,
}

impl RecordingObserver {
    /// Create a new RecordingObserver
    pub fn new() -> RecordingObserver {
        RecordingObserver::default()
    }

    /// A string-representation of each call that the observer has received.
    pub fn changes_seen(&self) -> Vec<String> {
        self.changes_seen.borrow().clone()
    }

    /// Forgets every call seen so far.
    pub fn reset(&self) {
        self.changes_seen.borrow_mut().clear();
    }

    fn record(&self, call: String) {
        self.changes_seen.borrow_mut().push(call);
    }
}

/// Renders the local contents of a changeset, e.g. `complex [foo, myList]` or `list [add, move]`.
fn describe(changeset: &Changeset) -> String {
    match changeset {
        Changeset::Complex(c) => {
            let names: Vec<_> = c.property_names().iter().map(|n| n.to_string()).collect();
            format!("complex [{}]", names.join(", "))
        }
        Changeset::List(l) => {
            let kinds: Vec<_> = l.changes().iter().map(|c| c.kind()).collect();
            format!("list [{}]", kinds.join(", "))
        }
    }
}

impl ChangeObserver for RecordingObserver {
    fn will_change(&self, _: &mut Context, changeset: &Changeset) -> Result<(), RejectReason> {
        self.record(format!(
            "will_change {} {}",
            changeset.target(),
            describe(changeset)
        ));
        Ok(())
    }

    fn did_change(&self, _: &mut Context, changeset: &Changeset) {
        self.record(format!(
            "did_change {} {}",
            changeset.target(),
            describe(changeset)
        ));
    }

    fn rejected(&self, _: &mut Context, changeset: &Changeset, reason: &RejectReason) {
        self.record(format!("rejected {}: {reason}", changeset.target()));
    }
}
