//! Value object marker: equality by value, no identity.

/// Marker for immutable values compared by their attributes.
///
/// Period keys and bucket sub-totals are value objects: two `2024-03` keys
/// are the same key, and "modifying" bucket totals means computing a new
/// value from the old one.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
