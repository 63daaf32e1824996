//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects have no identity: two instances with the same attributes are
/// interchangeable. `Money` and recipe quantities are value objects; stock
/// items, orders and events are entities.
///
/// ```ignore
/// let a = Money::from_cents(250);
/// let b = Money::from_cents(250);
/// assert_eq!(a, b); // equal by value
/// ```
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
