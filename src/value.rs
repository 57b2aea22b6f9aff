// (c) Copyright 2025 Helsing GmbH. All rights reserved.
use crate::ids::ContainerId;
use std::{cmp::Ordering, fmt, rc::Rc};

/// A property value or list element.
///
/// Values are compared (and, inside lists, identified) structurally. A [`Value::Ref`] is a
/// structural reference to another container, which makes the referenced container a child of
/// the one holding the value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    Ref(ContainerId),
}

/// Orders list elements for [`ListChange::Sort`](crate::ListChange::Sort).
pub type Comparator = Rc<dyn Fn(&Value, &Value) -> Ordering>;

impl Value {
    /// Returns the referenced container, if this value is a [`Value::Ref`].
    pub fn as_ref_id(&self) -> Option<ContainerId> {
        match self {
            Self::Ref(id) => Some(*id),
            _ => None,
        }
    }

    /// Returns the integer, if this value is a [`Value::Int`].
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the string, if this value is a [`Value::Str`].
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// A total order over values: null < bools < ints < strings < refs.
    ///
    /// Handy as a default [`Comparator`].
    pub fn natural_cmp(&self, other: &Self) -> Ordering {
        fn rank(v: &Value) -> u8 {
            match v {
                Value::Null => 0,
                Value::Bool(_) => 1,
                Value::Int(_) => 2,
                Value::Str(_) => 3,
                Value::Ref(_) => 4,
            }
        }
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Str(a), Self::Str(b)) => a.cmp(b),
            (Self::Ref(a), Self::Ref(b)) => a.cmp(b),
            _ => rank(self).cmp(&rank(other)),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Ref(id) => write!(f, "{id}"),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<ContainerId> for Value {
    fn from(value: ContainerId) -> Self {
        Self::Ref(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

#[cfg(any(test, feature = "arbitrary"))]
impl quickcheck::Arbitrary for Value {
    fn arbitrary(g: &mut quickcheck::Gen) -> Self {
        // keep the domain small so that lists see plenty of duplicates and removals
        match u8::arbitrary(g) % 4 {
            0 => Self::Bool(bool::arbitrary(g)),
            1 | 2 => Self::Int(i64::from(u8::arbitrary(g) % 16)),
            _ => Self::Str(format!("s{}", u8::arbitrary(g) % 8)),
        }
    }

    fn shrink(&self) -> Box<dyn Iterator<Item = Self>> {
        match self {
            Self::Int(i) => Box::new(i.shrink().map(Self::Int)),
            Self::Str(_) | Self::Bool(true) => Box::new(std::iter::once(Self::Bool(false))),
            _ => quickcheck::empty_shrinker(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions() {
        assert_eq!(Value::from(3), Value::Int(3));
        assert_eq!(Value::from("x"), Value::Str("x".into()));
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(
            Value::from(ContainerId::for_tests(4)).as_ref_id(),
            Some(ContainerId::for_tests(4))
        );
    }

    #[test]
    fn natural_order_ranks_kinds_first() {
        let mut values = vec![
            Value::from("b"),
            Value::from(2),
            Value::Null,
            Value::from(true),
            Value::from(1),
            Value::from("a"),
        ];
        values.sort_by(Value::natural_cmp);
        assert_eq!(
            values,
            vec![
                Value::Null,
                Value::from(true),
                Value::from(1),
                Value::from(2),
                Value::from("a"),
                Value::from("b"),
            ]
        );
    }
}
