//! Concept registry: bidirectional ConceptId ↔ InternalId mapping.
//!
//! The [`ConceptRegistry`] hands out dense internal ids append-only. Removing a
//! concept tombstones its slot instead of renumbering, so every adjacency array
//! built against an older registry state stays index-compatible.

use std::collections::HashMap;

use crate::concept::{ConceptId, InternalId};
use crate::error::RegistryError;

/// Result type for registry operations.
pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

/// Bidirectional concept registry with tombstoning.
#[derive(Debug, Clone, Default)]
pub struct ConceptRegistry {
    /// Forward map: InternalId → ConceptId. `None` marks a tombstone hole.
    slots: Vec<Option<ConceptId>>,
    /// Reverse map: ConceptId → InternalId, active concepts only.
    index: HashMap<ConceptId, InternalId>,
}

impl ConceptRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty registry sized for `capacity` concepts.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
        }
    }

    /// Register a concept, returning its internal id.
    ///
    /// Already active concepts keep their id. A concept that was tombstoned
    /// earlier gets a fresh slot at the end; its old hole stays empty.
    pub fn register(&mut self, concept: ConceptId) -> RegistryResult<InternalId> {
        if let Some(&id) = self.index.get(&concept) {
            return Ok(id);
        }
        let raw = u32::try_from(self.slots.len()).map_err(|_| RegistryError::Exhausted {
            slots: self.slots.len(),
        })?;
        let id = InternalId(raw);
        self.slots.push(Some(concept));
        self.index.insert(concept, id);
        Ok(id)
    }

    /// Look up the internal id of an active concept.
    pub fn internal_id(&self, concept: ConceptId) -> RegistryResult<InternalId> {
        self.get(concept).ok_or(RegistryError::NotFound {
            concept_id: concept.get(),
        })
    }

    /// Look up the internal id of a concept, `None` if absent or tombstoned.
    pub fn get(&self, concept: ConceptId) -> Option<InternalId> {
        self.index.get(&concept).copied()
    }

    /// The concept occupying a slot, `None` for holes and out-of-range ids.
    pub fn concept_at(&self, id: InternalId) -> Option<ConceptId> {
        self.slots.get(id.index()).copied().flatten()
    }

    /// Tombstone a concept. Returns the vacated internal id, if it was active.
    pub fn tombstone(&mut self, concept: ConceptId) -> Option<InternalId> {
        let id = self.index.remove(&concept)?;
        self.slots[id.index()] = None;
        Some(id)
    }

    /// Whether the concept is registered and not tombstoned.
    pub fn contains(&self, concept: ConceptId) -> bool {
        self.index.contains_key(&concept)
    }

    /// Allocated slot count, holes included. Sizes every per-node array.
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// Number of active concepts.
    pub fn active_count(&self) -> usize {
        self.index.len()
    }

    /// Number of tombstone holes.
    pub fn hole_count(&self) -> usize {
        self.slots.len() - self.index.len()
    }

    /// Whether no concept is active.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Active concepts in internal id order.
    pub fn iter(&self) -> impl Iterator<Item = (InternalId, ConceptId)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.map(|c| (InternalId(i as u32), c)))
    }
}
