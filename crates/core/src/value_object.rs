//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects have no identity and are compared by their attributes: two `Money(250_000)`
/// values are the same amount no matter which document they came from. They are immutable;
/// "changing" one means producing a new value.
///
/// Entities (see [`crate::Entity`]) are the opposite: an invoice detail keeps its identity while
/// its quantity or price changes.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
