//! Value object trait: equality by value, not identity.
//!
//! An address's attribute map is a value object: two maps holding the same
//! name/value pairs are the same address content, regardless of which address
//! id they are stored under or in which order they were inserted.

/// Marker trait for value objects.
///
/// Value objects are **immutable** in intent and **compared by value**. To
/// "modify" one, build a new one (e.g. [`crate::Address::restrict`]).
///
/// The trait requires:
/// - **Clone**: values are copied rather than shared
/// - **PartialEq**: comparison is by content
/// - **Debug**: values show up in logs and test failures
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
