//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Stored rows (spare parts, equipment, serialized units, movements) expose
/// their identifier through this trait so tables can be keyed generically.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Copy + Eq + Ord + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> Self::Id;
}
