//! Incremental update of a snapshot from one change-set.
//!
//! The engine clones the baseline, then runs three passes in a fixed order:
//! removals, additions, and a lenient rebuild of the taxonomy arrays. The
//! baseline is never touched, so the stated and inferred views of one commit
//! can be patched concurrently (see [`DeltaEngine::apply_views`]).

use std::collections::{BTreeSet, HashSet};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::concept::{CharacteristicType, ComponentKind, ConceptId, StorageKey};
use crate::config::TaxonomyConfig;
use crate::error::TaxonomyResult;
use crate::fragment::Removed;
use crate::snapshot::Snapshot;
use crate::source::{ConceptRow, ConcreteDomainRow, RelationshipRow};
use crate::taxonomy::{BuildReport, EdgePolicy};

// ---------------------------------------------------------------------------
// Change-set
// ---------------------------------------------------------------------------

/// One component revision in a change-set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Component {
    Concept(ConceptRow),
    Relationship(RelationshipRow),
    ConcreteDomainMember(ConcreteDomainRow),
}

impl Component {
    pub fn kind(&self) -> ComponentKind {
        match self {
            Component::Concept(_) => ComponentKind::Concept,
            Component::Relationship(_) => ComponentKind::Relationship,
            Component::ConcreteDomainMember(_) => ComponentKind::ConcreteDomainMember,
        }
    }

    pub fn storage_key(&self) -> StorageKey {
        match self {
            Component::Concept(row) => row.storage_key,
            Component::Relationship(row) => row.storage_key,
            Component::ConcreteDomainMember(row) => row.storage_key,
        }
    }
}

/// A component changed in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirtyComponent {
    pub before: Component,
    pub after: Component,
}

/// A deleted component; only its storage key survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetachedComponent {
    pub kind: ComponentKind,
    pub storage_key: StorageKey,
}

/// One commit's batch of new, changed and deleted components.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    #[serde(default)]
    pub new: Vec<Component>,
    #[serde(default)]
    pub dirty: Vec<DirtyComponent>,
    #[serde(default)]
    pub detached: Vec<DetachedComponent>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.dirty.is_empty() && self.detached.is_empty()
    }

    pub fn len(&self) -> usize {
        self.new.len() + self.dirty.len() + self.detached.len()
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// The patched snapshot and the concepts downstream indexers must revisit.
#[derive(Debug, Clone)]
pub struct DeltaOutcome {
    snapshot: Snapshot,
    concepts_to_add: BTreeSet<ConceptId>,
    concepts_to_remove: BTreeSet<ConceptId>,
    build: BuildReport,
}

impl DeltaOutcome {
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn into_snapshot(self) -> Snapshot {
        self.snapshot
    }

    /// Concepts whose derived artifacts must be regenerated.
    pub fn concepts_to_add(&self) -> &BTreeSet<ConceptId> {
        &self.concepts_to_add
    }

    /// Concepts that are gone.
    pub fn concepts_to_remove(&self) -> &BTreeSet<ConceptId> {
        &self.concepts_to_remove
    }

    /// Report of the lenient rebuild.
    pub fn build_report(&self) -> &BuildReport {
        &self.build
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Reprocessing {
    to_add: BTreeSet<ConceptId>,
    to_remove: BTreeSet<ConceptId>,
}

/// Applies change-sets to snapshots.
#[derive(Debug, Clone, Default)]
pub struct DeltaEngine {
    config: TaxonomyConfig,
}

impl DeltaEngine {
    pub fn new(config: TaxonomyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TaxonomyConfig {
        &self.config
    }

    /// Apply `changes` to a copy of `baseline`.
    ///
    /// Fails with [`GraphError::DirtyState`](crate::error::GraphError::DirtyState)
    /// when the baseline itself has not been rebuilt.
    pub fn apply(&self, baseline: &Snapshot, changes: &ChangeSet) -> TaxonomyResult<DeltaOutcome> {
        baseline.graph().check_clean()?;
        let start = Instant::now();
        let mut snapshot = baseline.clone();
        let mut sets = Reprocessing::default();

        self.removal_pass(&mut snapshot, changes, &mut sets);
        self.addition_pass(&mut snapshot, changes, &mut sets)?;
        let build = snapshot.rebuild(EdgePolicy::Lenient)?;

        tracing::info!(
            view = %snapshot.view(),
            new = changes.new.len(),
            dirty = changes.dirty.len(),
            detached = changes.detached.len(),
            to_add = sets.to_add.len(),
            to_remove = sets.to_remove.len(),
            dropped_edges = build.dropped.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "applied change-set"
        );

        Ok(DeltaOutcome {
            snapshot,
            concepts_to_add: sets.to_add,
            concepts_to_remove: sets.to_remove,
            build,
        })
    }

    /// Patch the stated and inferred views of one commit concurrently.
    pub fn apply_views(
        &self,
        stated: &Snapshot,
        inferred: &Snapshot,
        changes: &ChangeSet,
    ) -> TaxonomyResult<(DeltaOutcome, DeltaOutcome)> {
        let (stated, inferred) = rayon::join(
            || self.apply(stated, changes),
            || self.apply(inferred, changes),
        );
        Ok((stated?, inferred?))
    }

    fn removal_pass(&self, snapshot: &mut Snapshot, changes: &ChangeSet, sets: &mut Reprocessing) {
        let mut detached_concepts: HashSet<ConceptId> = HashSet::new();

        for detached in &changes.detached {
            match snapshot.remove_by_key(detached.storage_key) {
                Some(Removed::Concept(concept)) => {
                    snapshot.remove_concept(concept);
                    sets.to_remove.insert(concept);
                    detached_concepts.insert(concept);
                }
                Some(removed) => {
                    if let Some(owner) = removed.owner() {
                        sets.to_add.insert(owner);
                    }
                }
                None => tracing::debug!(
                    kind = %detached.kind,
                    storage_key = %detached.storage_key,
                    "skipping detached component that is not loaded"
                ),
            }
        }

        for dirty in &changes.dirty {
            match &dirty.before {
                Component::Concept(row) => {
                    snapshot.clear_flags(row.id);
                    sets.to_add.insert(row.id);
                }
                before => match snapshot.remove_by_key(before.storage_key()) {
                    Some(removed) => {
                        if let Some(owner) = removed.owner() {
                            sets.to_add.insert(owner);
                        }
                    }
                    None => tracing::debug!(
                        kind = %before.kind(),
                        storage_key = %before.storage_key(),
                        "skipping pre-image that is not loaded"
                    ),
                },
            }
        }

        // Detached concepts are never regenerated.
        for concept in &detached_concepts {
            sets.to_add.remove(concept);
        }
    }

    fn addition_pass(
        &self,
        snapshot: &mut Snapshot,
        changes: &ChangeSet,
        sets: &mut Reprocessing,
    ) -> TaxonomyResult<()> {
        let post_images = changes
            .dirty
            .iter()
            .map(|d| &d.after)
            .chain(changes.new.iter());

        // Members attached to statements resolve their owner through the
        // statement, so they go in after every relationship.
        let mut members: Vec<&ConcreteDomainRow> = Vec::new();
        for component in post_images {
            match component {
                Component::Concept(row) => self.add_concept(snapshot, row, sets)?,
                Component::Relationship(row) => self.add_relationship(snapshot, row, sets),
                Component::ConcreteDomainMember(row) => members.push(row),
            }
        }
        for row in members {
            self.add_concrete_domain(snapshot, row, sets);
        }
        Ok(())
    }

    fn add_concept(
        &self,
        snapshot: &mut Snapshot,
        row: &ConceptRow,
        sets: &mut Reprocessing,
    ) -> TaxonomyResult<()> {
        if !row.active {
            // Inactivation removes the concept like a detach would.
            if snapshot.remove_concept(row.id) {
                sets.to_remove.insert(row.id);
                sets.to_add.remove(&row.id);
            }
            return Ok(());
        }
        snapshot.register_concept(row.id, row.storage_key)?;
        snapshot.set_flags(row.id, row.exhaustive, !row.primitive);
        sets.to_add.insert(row.id);
        Ok(())
    }

    fn add_relationship(
        &self,
        snapshot: &mut Snapshot,
        row: &RelationshipRow,
        sets: &mut Reprocessing,
    ) {
        let Some(characteristic) = row.characteristic() else {
            return;
        };
        if !row.active || !self.config.mode.allows(characteristic) {
            return;
        }
        let fragment = row.to_fragment(self.config.universal_modifier_id);
        snapshot.add_statement(row.source_id, characteristic, fragment);
        sets.to_add.insert(row.source_id);
    }

    fn add_concrete_domain(
        &self,
        snapshot: &mut Snapshot,
        row: &ConcreteDomainRow,
        sets: &mut Reprocessing,
    ) {
        if !self.config.concrete_domains || !row.active {
            return;
        }
        let Some(characteristic) = row.characteristic() else {
            return;
        };
        let on_statement = row.referenced_kind == ComponentKind::Relationship;
        let allowed = self.config.mode.allows(characteristic)
            || (on_statement
                && characteristic == CharacteristicType::Additional
                && self.config.additional_statement_concrete_domains);
        if !allowed {
            return;
        }

        let owner = if on_statement {
            snapshot
                .fragments()
                .source_of_statement(row.referenced_component_id)
        } else {
            Some(ConceptId(row.referenced_component_id))
        };
        if owner.is_none() {
            tracing::debug!(
                statement_id = row.referenced_component_id,
                storage_key = %row.storage_key,
                "member references a statement that is not loaded"
            );
        }
        snapshot.add_concrete_domain(
            row.referenced_component_id,
            characteristic,
            owner,
            row.to_fragment(),
        );
        if let Some(owner) = owner {
            sets.to_add.insert(owner);
        }
    }
}
