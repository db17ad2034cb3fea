//! Relationship and concrete-domain fragments.
//!
//! Fragments are the compact, id-only projections of relationship rows and
//! concrete-domain reference set members that the classifier input and the
//! normal-form generator consume. They are stored per owner in a
//! [`FragmentStore`].

pub mod store;

use serde::{Deserialize, Serialize};

use crate::concept::{ConceptId, StorageKey};

pub use store::{FragmentSlot, FragmentStore, Locator, Removed};

/// One relationship, keyed by its source concept in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatementFragment {
    /// Relationship component id.
    pub statement_id: u64,
    /// Storage key of the relationship revision.
    pub storage_key: StorageKey,
    /// Attribute type, `IS_A` for taxonomy edges.
    pub type_id: ConceptId,
    /// Destination concept.
    pub destination_id: ConceptId,
    pub destination_negated: bool,
    /// Role group, 0 for ungrouped.
    pub group: u8,
    pub union_group: u8,
    /// Universal ("only") restriction instead of existential ("some").
    pub universal: bool,
}

impl StatementFragment {
    /// Whether this fragment is an IS-A edge for the given IS-A type.
    pub fn is_a(&self, is_a_type: ConceptId) -> bool {
        self.type_id == is_a_type
    }
}

/// Value type of a concrete-domain member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Boolean,
    Integer,
    Decimal,
    Date,
    String,
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataType::Boolean => write!(f, "boolean"),
            DataType::Integer => write!(f, "integer"),
            DataType::Decimal => write!(f, "decimal"),
            DataType::Date => write!(f, "date"),
            DataType::String => write!(f, "string"),
        }
    }
}

/// One attribute/value annotation attached to a concept or a relationship.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConcreteDomainFragment {
    /// Serialized value.
    pub value: String,
    /// Attribute name.
    pub label: String,
    pub data_type: DataType,
    /// Unit of measure, if any.
    pub unit_id: Option<ConceptId>,
    pub storage_key: StorageKey,
    pub refset_id: ConceptId,
    pub group: Option<u8>,
}
