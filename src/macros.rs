// (c) Copyright 2025 Helsing GmbH. All rights reserved.
/// Convenience macro for creating a `Vec<Value>`.
///
/// Every element goes through `Value::from`, so integers, strings, bools and container ids can be
/// mixed freely.
///
/// ```rust
/// # use typetx::{values, Value};
/// assert_eq!(values![1, "two", true], vec![Value::Int(1), Value::from("two"), Value::Bool(true)]);
/// assert!(values![].is_empty());
/// ```
#[macro_export]
macro_rules! values {
    () => {
        ::std::vec::Vec::<$crate::Value>::new()
    };
    ($($v:expr),+ $(,)?) => {
        ::std::vec![$($crate::Value::from($v)),+]
    };
}

/// Convenience macro for declaring a complex type.
///
/// ```rust
/// # use typetx::complex_type;
/// let point = complex_type!(Point { x, y });
/// assert_eq!(point.name(), "Point");
/// assert_eq!(point.index_of("y"), Some(1));
/// ```
#[macro_export]
macro_rules! complex_type {
    ($name:ident { $($prop:ident),* $(,)? }) => {
        $crate::ComplexType::new(stringify!($name), [$(stringify!($prop)),*])
    };
}
