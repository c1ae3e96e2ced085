//! Entity trait: identity that survives state changes.

/// Something with a stable identity, compared by id rather than by value.
///
/// Ledger records are entities: the totals change on every write, the id
/// never does.
pub trait Entity {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;
}
