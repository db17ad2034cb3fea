//! Read collaborator: paged access to the active facts of one branch.
//!
//! The loader never assumes a query fits in one page. Every query result is an
//! iterator of bounded pages, and every page may fail independently.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::concept::{CharacteristicType, ComponentKind, ConceptId, StorageKey, well_known};
use crate::error::SourceError;
use crate::fragment::{ConcreteDomainFragment, DataType, StatementFragment};

/// Result type for read collaborator calls.
pub type SourceResult<T> = std::result::Result<T, SourceError>;

/// A stream of bounded pages.
pub type Pages<'a, T> = Box<dyn Iterator<Item = SourceResult<Vec<T>>> + 'a>;

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_modifier() -> u64 {
    well_known::EXISTENTIAL_RESTRICTION_MODIFIER
}

/// One concept revision with its definition flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptRow {
    pub id: ConceptId,
    pub storage_key: StorageKey,
    #[serde(default = "default_true")]
    pub active: bool,
    /// Primitive concepts are not fully defined.
    #[serde(default = "default_true")]
    pub primitive: bool,
    #[serde(default)]
    pub exhaustive: bool,
}

/// One relationship revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipRow {
    pub id: u64,
    pub storage_key: StorageKey,
    #[serde(default = "default_true")]
    pub active: bool,
    pub source_id: ConceptId,
    pub type_id: ConceptId,
    pub destination_id: ConceptId,
    #[serde(default)]
    pub destination_negated: bool,
    #[serde(default)]
    pub group: u8,
    #[serde(default)]
    pub union_group: u8,
    #[serde(default = "default_modifier")]
    pub modifier_id: u64,
    pub characteristic_type_id: u64,
}

impl RelationshipRow {
    /// Characteristic type, `None` for ids outside the three known types.
    pub fn characteristic(&self) -> Option<CharacteristicType> {
        CharacteristicType::from_id(self.characteristic_type_id)
    }

    /// Project onto a fragment; `universal_modifier` marks "only" restrictions.
    pub fn to_fragment(&self, universal_modifier: u64) -> StatementFragment {
        StatementFragment {
            statement_id: self.id,
            storage_key: self.storage_key,
            type_id: self.type_id,
            destination_id: self.destination_id,
            destination_negated: self.destination_negated,
            group: self.group,
            union_group: self.union_group,
            universal: self.modifier_id == universal_modifier,
        }
    }
}

/// One concrete-domain reference set member revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcreteDomainRow {
    /// Concept or relationship the member annotates.
    pub referenced_component_id: u64,
    pub referenced_kind: ComponentKind,
    pub refset_id: ConceptId,
    pub attribute_name: String,
    pub data_type: DataType,
    pub value: String,
    #[serde(default)]
    pub unit_id: Option<ConceptId>,
    pub storage_key: StorageKey,
    pub characteristic_type_id: u64,
    #[serde(default)]
    pub group: Option<u8>,
    #[serde(default = "default_true")]
    pub active: bool,
}

impl ConcreteDomainRow {
    pub fn characteristic(&self) -> Option<CharacteristicType> {
        CharacteristicType::from_id(self.characteristic_type_id)
    }

    pub fn to_fragment(&self) -> ConcreteDomainFragment {
        ConcreteDomainFragment {
            value: self.value.clone(),
            label: self.attribute_name.clone(),
            data_type: self.data_type,
            unit_id: self.unit_id,
            storage_key: self.storage_key,
            refset_id: self.refset_id,
            group: self.group,
        }
    }
}

/// Preferred term of a concept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferredTermRow {
    pub concept_id: ConceptId,
    pub term: String,
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Which relationships of a characteristic type to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeFilter {
    /// Only relationships of the IS-A type.
    IsA(ConceptId),
    /// Every relationship except the IS-A type.
    NonIsA(ConceptId),
}

impl TypeFilter {
    pub fn matches(self, type_id: ConceptId) -> bool {
        match self {
            TypeFilter::IsA(is_a) => type_id == is_a,
            TypeFilter::NonIsA(is_a) => type_id != is_a,
        }
    }
}

/// Active relationships of one characteristic type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationshipQuery {
    pub characteristic: CharacteristicType,
    pub filter: TypeFilter,
}

impl std::fmt::Display for RelationshipQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.filter {
            TypeFilter::IsA(_) => "is-a",
            TypeFilter::NonIsA(_) => "non-is-a",
        };
        write!(f, "{} {kind} relationships", self.characteristic)
    }
}

/// Active concrete-domain members of one characteristic type and referenced kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcreteDomainQuery {
    pub characteristic: CharacteristicType,
    pub referenced_kind: ComponentKind,
}

impl std::fmt::Display for ConcreteDomainQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} concrete domain members of {}s",
            self.characteristic, self.referenced_kind
        )
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Paged read access to the active facts of one branch.
///
/// Implementations return only active rows. Deadlines and retries belong to
/// the implementation.
pub trait TaxonomySource: Sync {
    /// Branch or version token the rows are read from.
    fn branch(&self) -> &str;

    /// Active concepts with their definition flags.
    fn concepts(&self, page_size: usize) -> Pages<'_, ConceptRow>;

    /// Active relationships matching `query`.
    fn relationships(
        &self,
        query: RelationshipQuery,
        page_size: usize,
    ) -> Pages<'_, RelationshipRow>;

    /// Active concrete-domain members matching `query`.
    fn concrete_domain_members(
        &self,
        query: ConcreteDomainQuery,
        page_size: usize,
    ) -> Pages<'_, ConcreteDomainRow>;

    /// Preferred terms of active concepts. Empty unless overridden.
    fn preferred_terms(&self, _page_size: usize) -> Pages<'_, PreferredTermRow> {
        Box::new(std::iter::empty())
    }
}

// ---------------------------------------------------------------------------
// In-memory source
// ---------------------------------------------------------------------------

/// A whole branch held in memory, loadable from JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InMemorySource {
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default)]
    pub concepts: Vec<ConceptRow>,
    #[serde(default)]
    pub relationships: Vec<RelationshipRow>,
    #[serde(default)]
    pub concrete_domain_members: Vec<ConcreteDomainRow>,
    #[serde(default)]
    pub preferred_terms: Vec<PreferredTermRow>,
}

fn default_branch() -> String {
    "MAIN".into()
}

impl InMemorySource {
    /// An empty source on `branch`.
    pub fn new(branch: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            ..Default::default()
        }
    }

    pub fn from_json_str(json: &str) -> SourceResult<Self> {
        serde_json::from_str(json).map_err(|e| SourceError::Parse {
            message: e.to_string(),
        })
    }

    pub fn from_json_file(path: &Path) -> SourceResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| SourceError::Io { source: e })?;
        Self::from_json_str(&content)
    }
}

/// Chunk the matching rows of `rows` into pages of at most `page_size`.
fn paged<'a, T, F>(rows: &'a [T], page_size: usize, keep: F) -> Pages<'a, T>
where
    T: Clone + 'a,
    F: Fn(&T) -> bool + 'a,
{
    let page_size = page_size.max(1);
    let mut matching = rows.iter().filter(move |row| keep(row)).cloned().peekable();
    Box::new(std::iter::from_fn(move || {
        matching.peek()?;
        Some(Ok(matching.by_ref().take(page_size).collect()))
    }))
}

impl TaxonomySource for InMemorySource {
    fn branch(&self) -> &str {
        &self.branch
    }

    fn concepts(&self, page_size: usize) -> Pages<'_, ConceptRow> {
        paged(&self.concepts, page_size, |row| row.active)
    }

    fn relationships(
        &self,
        query: RelationshipQuery,
        page_size: usize,
    ) -> Pages<'_, RelationshipRow> {
        paged(&self.relationships, page_size, move |row| {
            row.active
                && row.characteristic() == Some(query.characteristic)
                && query.filter.matches(row.type_id)
        })
    }

    fn concrete_domain_members(
        &self,
        query: ConcreteDomainQuery,
        page_size: usize,
    ) -> Pages<'_, ConcreteDomainRow> {
        paged(&self.concrete_domain_members, page_size, move |row| {
            row.active
                && row.characteristic() == Some(query.characteristic)
                && row.referenced_kind == query.referenced_kind
        })
    }

    fn preferred_terms(&self, page_size: usize) -> Pages<'_, PreferredTermRow> {
        paged(&self.preferred_terms, page_size, |_| true)
    }
}
