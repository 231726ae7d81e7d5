//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects have no identity: two values with the same attributes are the
/// same value. In this domain a permission name or a claim's `(type, value)`
/// pair are value objects, while a `Role` or `Principal` is an entity.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
