// (c) Copyright 2025 Helsing GmbH. All rights reserved.
use crate::{ListChangeset, SetOptions, Value, create_set};
use quickcheck::{Arbitrary, Gen};
use std::rc::Rc;

/// Installs a `tracing` subscriber honouring `RUST_LOG`. Safe to call from every test.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A list operation as issued by a user of the context.
#[derive(Debug, Clone)]
pub(crate) enum ListOp {
    Append(Vec<Value>),
    Insert(usize, Vec<Value>),
    Remove(Vec<Value>),
    RemoveAt(usize, usize),
    ReplaceAll(Vec<Value>),
    Clear,
    Sort,
}

fn small_index(g: &mut Gen) -> usize {
    usize::from(u8::arbitrary(g) % 8)
}

fn fragment(g: &mut Gen) -> Vec<Value> {
    let len = usize::from(u8::arbitrary(g) % 4);
    (0..len).map(|_| Value::arbitrary(g)).collect()
}

impl Arbitrary for ListOp {
    fn arbitrary(g: &mut Gen) -> Self {
        match u8::arbitrary(g) % 10 {
            0..=2 => Self::Append(fragment(g)),
            3 => Self::Insert(small_index(g), fragment(g)),
            4 | 5 => Self::Remove(fragment(g)),
            6 => Self::RemoveAt(small_index(g), small_index(g)),
            7 => Self::ReplaceAll(fragment(g)),
            8 => Self::Clear,
            _ => Self::Sort,
        }
    }

    fn shrink(&self) -> Box<dyn Iterator<Item = Self>> {
        match self {
            Self::Append(values) => Box::new(values.shrink().map(Self::Append)),
            Self::Remove(values) => Box::new(values.shrink().map(Self::Remove)),
            Self::ReplaceAll(values) => Box::new(values.shrink().map(Self::ReplaceAll)),
            Self::Insert(index, values) => {
                let index = *index;
                Box::new(values.shrink().map(move |values| Self::Insert(index, values)))
            }
            _ => quickcheck::empty_shrinker(),
        }
    }
}

fn dedup(values: &[Value]) -> Vec<Value> {
    let mut seen = create_set();
    values
        .iter()
        .filter(|value| seen.insert((*value).clone()))
        .cloned()
        .collect()
}

impl ListOp {
    pub(crate) fn apply_to_changeset(&self, changeset: &ListChangeset) {
        let outcome = match self {
            Self::Append(values) => changeset.set(values.clone(), SetOptions::append()),
            Self::Insert(index, values) => {
                changeset.set(values.clone(), SetOptions::insert_at(*index))
            }
            Self::Remove(values) => changeset.remove(values.clone()),
            Self::RemoveAt(start, count) => changeset.remove_at(*start, *count),
            Self::ReplaceAll(values) => changeset.set(values.clone(), SetOptions::replace_all()),
            Self::Clear => changeset.clear(),
            Self::Sort => changeset
                .sort(Rc::new(Value::natural_cmp))
                .map(|()| Default::default()),
        };
        outcome.expect("list operations on a mutable changeset succeed");
    }

    /// The same operation on a plain `Vec`.
    pub(crate) fn apply_to_model(&self, model: &mut Vec<Value>) {
        match self {
            Self::Append(values) => {
                for value in dedup(values) {
                    if !model.contains(&value) {
                        model.push(value);
                    }
                }
            }
            Self::Insert(index, values) => {
                let mut at = (*index).min(model.len());
                for value in dedup(values) {
                    if !model.contains(&value) {
                        model.insert(at, value);
                        at += 1;
                    }
                }
            }
            Self::Remove(values) => model.retain(|value| !values.contains(value)),
            Self::RemoveAt(start, count) => {
                if *start < model.len() {
                    let end = start.saturating_add(*count).min(model.len());
                    model.drain(*start..end);
                }
            }
            Self::ReplaceAll(values) => *model = dedup(values),
            Self::Clear => model.clear(),
            Self::Sort => model.sort_by(Value::natural_cmp),
        }
    }
}
