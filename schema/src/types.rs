/// Registry-assigned id of a structured record type.
pub type TypeId = u8;

/// Wire position of a field within its type (assigned at registration).
pub type FieldOrder = u8;

/// Registry id value reserved by the reflection protocol to mean "primitive
/// container element"; ids at or above it are never assigned.
pub const PRIMITIVE_ELEMENT: TypeId = 0xFF;

/// Identity of a record/list/map instance, derived from its allocation.
///
/// Stable for the instance's life but reusable after it is dropped, so every
/// tracking entry keyed by it must be dropped no later than the end of the
/// encode cycle in which the instance left its container (`forget` on
/// removal, `retire` + commit on replacement). A live entry for a dead
/// instance would let a fresh allocation at the same address inherit it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ElementId(pub(crate) usize);

/// Opaque handle identifying one observer of a filtered encode pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RecipientId(pub u64);
