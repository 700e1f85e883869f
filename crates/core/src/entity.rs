//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Document lines (invoice details, voucher items) are entities owned by their aggregate: they
/// are addressed by id when updated or removed, and never outlive the owning document.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}

/// Find an entity by id in an ordered collection.
pub fn position_of<E: Entity>(entities: &[E], id: &E::Id) -> Option<usize> {
    entities.iter().position(|e| e.id() == id)
}
