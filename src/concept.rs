//! Core identifier types for the taxonomy engine.
//!
//! A [`ConceptId`] is the externally meaningful identifier of a concept and is
//! opaque to this engine. An [`InternalId`] is the dense index assigned when a
//! concept is registered in a snapshot; every adjacency array is indexed by it.

use serde::{Deserialize, Serialize};

/// Well-known component identifiers used by the engine.
pub mod well_known {
    /// The IS-A relationship type.
    pub const IS_A: u64 = 116_680_003;
    /// Stated (authored) characteristic type.
    pub const STATED_RELATIONSHIP: u64 = 900_000_000_000_010_007;
    /// Inferred (classifier output) characteristic type.
    pub const INFERRED_RELATIONSHIP: u64 = 900_000_000_000_011_006;
    /// Additional (non-defining) characteristic type.
    pub const ADDITIONAL_RELATIONSHIP: u64 = 900_000_000_000_227_009;
    /// Universal ("all values from") restriction modifier.
    pub const UNIVERSAL_RESTRICTION_MODIFIER: u64 = 900_000_000_000_452_009;
    /// Existential ("some values from") restriction modifier.
    pub const EXISTENTIAL_RESTRICTION_MODIFIER: u64 = 900_000_000_000_451_002;
}

/// Externally meaningful 64-bit concept identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConceptId(pub u64);

impl ConceptId {
    /// Get the underlying `u64` value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for ConceptId {
    fn from(raw: u64) -> Self {
        ConceptId(raw)
    }
}

impl std::fmt::Display for ConceptId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Dense index of a concept within one snapshot lineage.
///
/// Assigned append-only by [`ConceptRegistry`](crate::registry::ConceptRegistry).
/// A tombstoned concept leaves its slot empty; the index is never handed out
/// to another concept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct InternalId(pub(crate) u32);

impl InternalId {
    /// Position of this concept in the per-node arrays.
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Get the underlying `u32` value.
    pub fn get(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for InternalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Store-assigned key of a component revision.
///
/// Removals in a change-set only carry this key, so every fragment remembers
/// the key it was loaded with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageKey(pub u64);

impl std::fmt::Display for StorageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "key:{}", self.0)
    }
}

/// Provenance of a relationship or concrete-domain fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CharacteristicType {
    /// Authored by a modeller.
    Stated,
    /// Produced by the external classifier.
    Inferred,
    /// Supplementary, non-defining.
    Additional,
}

impl CharacteristicType {
    /// All characteristic types in partition order.
    pub const ALL: [CharacteristicType; 3] = [
        CharacteristicType::Stated,
        CharacteristicType::Inferred,
        CharacteristicType::Additional,
    ];

    /// Map a characteristic type concept id to its variant.
    pub fn from_id(id: u64) -> Option<Self> {
        match id {
            well_known::STATED_RELATIONSHIP => Some(CharacteristicType::Stated),
            well_known::INFERRED_RELATIONSHIP => Some(CharacteristicType::Inferred),
            well_known::ADDITIONAL_RELATIONSHIP => Some(CharacteristicType::Additional),
            _ => None,
        }
    }

    /// The characteristic type concept id.
    pub fn id(self) -> u64 {
        match self {
            CharacteristicType::Stated => well_known::STATED_RELATIONSHIP,
            CharacteristicType::Inferred => well_known::INFERRED_RELATIONSHIP,
            CharacteristicType::Additional => well_known::ADDITIONAL_RELATIONSHIP,
        }
    }
}

impl std::fmt::Display for CharacteristicType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CharacteristicType::Stated => write!(f, "stated"),
            CharacteristicType::Inferred => write!(f, "inferred"),
            CharacteristicType::Additional => write!(f, "additional"),
        }
    }
}

/// Kind of a tracked component in a change-set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComponentKind {
    Concept,
    Relationship,
    ConcreteDomainMember,
}

impl std::fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComponentKind::Concept => write!(f, "concept"),
            ComponentKind::Relationship => write!(f, "relationship"),
            ComponentKind::ConcreteDomainMember => write!(f, "concrete domain member"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn characteristic_type_round_trips_through_id() {
        for ct in CharacteristicType::ALL {
            assert_eq!(CharacteristicType::from_id(ct.id()), Some(ct));
        }
        assert_eq!(CharacteristicType::from_id(well_known::IS_A), None);
    }

    #[test]
    fn concept_id_display_is_bare_number() {
        assert_eq!(ConceptId(116_680_003).to_string(), "116680003");
        assert_eq!(InternalId(7).to_string(), "#7");
    }
}
