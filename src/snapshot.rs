//! Snapshots: one consistent view of registry, fragments, graph and flags.
//!
//! A snapshot is built whole by the [`ParallelLoader`](crate::loader::ParallelLoader)
//! or derived from a baseline by the [`DeltaEngine`](crate::delta::DeltaEngine).
//! Every component sits behind an `Arc`, so deriving a snapshot is a
//! structural copy and patching touches only what changes.
//!
//! Two accessor families exist. The methods on [`Snapshot`] are permissive:
//! unknown or inactive concepts yield empty results. [`Snapshot::strict`]
//! returns a view whose accessors fail with
//! [`RegistryError::NotFound`](crate::error::RegistryError::NotFound) instead.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use fixedbitset::FixedBitSet;

use crate::concept::{CharacteristicType, ConceptId, InternalId, StorageKey};
use crate::config::BuilderMode;
use crate::error::{GraphResult, RegistryError, TaxonomyResult};
use crate::fragment::{ConcreteDomainFragment, FragmentStore, Removed, StatementFragment};
use crate::registry::ConceptRegistry;
use crate::taxonomy::closure::{self, Axis};
use crate::taxonomy::cycles::{self, Cycle};
use crate::taxonomy::{BuildReport, EdgePolicy, IsAEdge, TaxonomyGraph};

/// IS-A statements that differ between two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaxonomyDifference {
    /// Statement ids present here but not in the other snapshot.
    pub new_edges: HashSet<u64>,
    /// Statement ids present in the other snapshot but not here.
    pub detached_edges: HashSet<u64>,
}

impl TaxonomyDifference {
    pub fn is_empty(&self) -> bool {
        self.new_edges.is_empty() && self.detached_edges.is_empty()
    }
}

/// Registry, fragments, taxonomy graph and definition flags of one view.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Characteristic type whose IS-A statements form the graph.
    view: CharacteristicType,
    mode: BuilderMode,
    registry: Arc<ConceptRegistry>,
    fragments: FragmentStore,
    graph: Arc<TaxonomyGraph>,
    exhaustive: Arc<HashSet<ConceptId>>,
    fully_defined: Arc<HashSet<ConceptId>>,
}

impl Snapshot {
    /// An empty, clean snapshot.
    pub fn empty(view: CharacteristicType, mode: BuilderMode, is_a_type: ConceptId) -> Self {
        Self {
            view,
            mode,
            registry: Arc::default(),
            fragments: FragmentStore::new(is_a_type),
            graph: Arc::default(),
            exhaustive: Arc::default(),
            fully_defined: Arc::default(),
        }
    }

    pub fn view(&self) -> CharacteristicType {
        self.view
    }

    pub fn mode(&self) -> BuilderMode {
        self.mode
    }

    pub fn registry(&self) -> &ConceptRegistry {
        &self.registry
    }

    pub fn fragments(&self) -> &FragmentStore {
        &self.fragments
    }

    pub fn graph(&self) -> &TaxonomyGraph {
        &self.graph
    }

    /// Whether fragments changed since the last rebuild.
    pub fn is_dirty(&self) -> bool {
        self.graph.is_dirty()
    }

    /// Number of active concepts.
    pub fn concept_count(&self) -> usize {
        self.registry.active_count()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Active concept ids in internal id order.
    pub fn concept_ids(&self) -> impl Iterator<Item = ConceptId> + '_ {
        self.registry.iter().map(|(_, c)| c)
    }

    /// Accessors that fail for unknown or inactive concepts.
    pub fn strict(&self) -> StrictView<'_> {
        StrictView { snapshot: self }
    }

    // -----------------------------------------------------------------------
    // Taxonomy queries
    // -----------------------------------------------------------------------

    pub fn direct_ancestors(&self, concept: ConceptId) -> GraphResult<Vec<ConceptId>> {
        self.direct(concept, Axis::Up)
    }

    pub fn direct_descendants(&self, concept: ConceptId) -> GraphResult<Vec<ConceptId>> {
        self.direct(concept, Axis::Down)
    }

    pub fn all_ancestors(&self, concept: ConceptId) -> GraphResult<BTreeSet<ConceptId>> {
        self.closure(concept, |g, r, id| closure::all(g, r, id, Axis::Up))
    }

    pub fn all_descendants(&self, concept: ConceptId) -> GraphResult<BTreeSet<ConceptId>> {
        self.closure(concept, |g, r, id| closure::all(g, r, id, Axis::Down))
    }

    /// All ancestors plus the concept itself.
    pub fn self_and_all_ancestors(&self, concept: ConceptId) -> GraphResult<BTreeSet<ConceptId>> {
        self.closure(concept, |g, r, id| closure::self_and_all(g, r, id, Axis::Up))
    }

    /// Ancestors reachable through the direct parents.
    pub fn indirect_ancestors(&self, concept: ConceptId) -> GraphResult<BTreeSet<ConceptId>> {
        self.closure(concept, closure::indirect_ancestors)
    }

    /// Whether `descendant` is strictly subsumed by `ancestor`.
    pub fn is_descendant_of(
        &self,
        descendant: ConceptId,
        ancestor: ConceptId,
    ) -> GraphResult<bool> {
        self.graph.check_clean()?;
        match (self.registry.get(descendant), self.registry.get(ancestor)) {
            (Some(d), Some(a)) => closure::is_descendant_of(&self.graph, d, a),
            _ => Ok(false),
        }
    }

    fn direct(&self, concept: ConceptId, axis: Axis) -> GraphResult<Vec<ConceptId>> {
        self.graph.check_clean()?;
        let Some(id) = self.registry.get(concept) else {
            return Ok(Vec::new());
        };
        Ok(closure::direct(&self.graph, id, axis)?
            .iter()
            .filter_map(|&n| self.registry.concept_at(n))
            .collect())
    }

    fn closure<F>(&self, concept: ConceptId, walk: F) -> GraphResult<BTreeSet<ConceptId>>
    where
        F: FnOnce(&TaxonomyGraph, &ConceptRegistry, InternalId) -> GraphResult<FixedBitSet>,
    {
        self.graph.check_clean()?;
        let Some(id) = self.registry.get(concept) else {
            return Ok(BTreeSet::new());
        };
        let visited = walk(&*self.graph, &*self.registry, id)?;
        Ok(self.to_concepts(&visited))
    }

    fn to_concepts(&self, visited: &FixedBitSet) -> BTreeSet<ConceptId> {
        visited
            .ones()
            .filter_map(|i| self.registry.concept_at(InternalId(i as u32)))
            .collect()
    }

    /// Whether an IS-A statement of this view is loaded.
    pub fn contains_edge(&self, statement_id: u64) -> bool {
        self.fragments
            .find_is_a_statement(statement_id, self.view)
            .is_some()
    }

    /// Source and destination of an IS-A statement of this view.
    pub fn edge_endpoints(&self, statement_id: u64) -> Option<IsAEdge> {
        self.fragments
            .find_is_a_statement(statement_id, self.view)
            .map(|(source, f)| IsAEdge {
                source,
                destination: f.destination_id,
            })
    }

    /// IS-A statement ids added and removed relative to `baseline`.
    pub fn difference(&self, baseline: &Snapshot) -> TaxonomyDifference {
        let (mine, theirs) = rayon::join(
            || self.fragments.is_a_statement_ids(self.view),
            || baseline.fragments.is_a_statement_ids(baseline.view),
        );
        let (new_edges, detached_edges) = rayon::join(
            || mine.difference(&theirs).copied().collect(),
            || theirs.difference(&mine).copied().collect(),
        );
        TaxonomyDifference {
            new_edges,
            detached_edges,
        }
    }

    /// Every IS-A cycle of the current graph.
    pub fn cycles(&self) -> GraphResult<Vec<Cycle>> {
        self.graph.check_clean()?;
        Ok(cycles::find_cycles(&self.graph, &self.registry))
    }

    // -----------------------------------------------------------------------
    // Fragment and flag queries
    // -----------------------------------------------------------------------

    pub fn statements_of(
        &self,
        concept: ConceptId,
        characteristic: CharacteristicType,
    ) -> Vec<StatementFragment> {
        self.fragments.statements_of(concept, characteristic)
    }

    pub fn non_is_a_statements_of(
        &self,
        concept: ConceptId,
        characteristic: CharacteristicType,
    ) -> &[StatementFragment] {
        self.fragments.non_is_a_statements_of(concept, characteristic)
    }

    /// Members attached to a concept or statement id.
    pub fn concrete_domains_of(
        &self,
        component_id: u64,
        characteristic: CharacteristicType,
    ) -> &[ConcreteDomainFragment] {
        self.fragments.concrete_domains_of(component_id, characteristic)
    }

    pub fn all_concrete_domain_labels(
        &self,
        characteristic: CharacteristicType,
    ) -> BTreeSet<String> {
        self.fragments.all_concrete_domain_labels(characteristic)
    }

    /// Whether the concept is not fully defined. Unknown concepts count as primitive.
    pub fn is_primitive(&self, concept: ConceptId) -> bool {
        !self.fully_defined.contains(&concept)
    }

    pub fn is_exhaustive(&self, concept: ConceptId) -> bool {
        self.exhaustive.contains(&concept)
    }

    pub fn is_active(&self, concept: ConceptId) -> bool {
        self.registry.contains(concept)
    }

    /// Compare by concept id rather than internal id: same active concepts,
    /// flags, fragments and IS-A edges.
    pub fn equivalent(&self, other: &Snapshot) -> bool {
        let concepts = |s: &Snapshot| s.concept_ids().collect::<HashSet<_>>();
        let edges = |s: &Snapshot| -> HashSet<(ConceptId, ConceptId)> {
            s.registry
                .iter()
                .flat_map(|(id, source)| {
                    s.graph
                        .ancestors_of(id)
                        .iter()
                        .filter_map(|&p| s.registry.concept_at(p))
                        .map(move |dest| (source, dest))
                })
                .collect()
        };
        self.view == other.view
            && self.is_dirty() == other.is_dirty()
            && concepts(self) == concepts(other)
            && self.exhaustive == other.exhaustive
            && self.fully_defined == other.fully_defined
            && self.fragments.content_eq(&other.fragments)
            && edges(self) == edges(other)
    }

    // -----------------------------------------------------------------------
    // Patching
    // -----------------------------------------------------------------------

    /// Drop the adjacency arrays; queries fail until [`Snapshot::rebuild`].
    fn mark_dirty(&mut self) {
        if !self.graph.is_dirty() {
            let mut stale = TaxonomyGraph::default();
            stale.mark_dirty();
            self.graph = Arc::new(stale);
        }
    }

    /// Register a concept and its storage key.
    pub fn register_concept(
        &mut self,
        concept: ConceptId,
        storage_key: StorageKey,
    ) -> TaxonomyResult<InternalId> {
        if !self.registry.contains(concept) {
            self.mark_dirty();
        }
        let id = Arc::make_mut(&mut self.registry).register(concept)?;
        self.fragments.register_concept_key(storage_key, concept);
        Ok(id)
    }

    /// Record the definition flags of a concept.
    pub fn set_flags(&mut self, concept: ConceptId, exhaustive: bool, fully_defined: bool) {
        set_member(&mut self.exhaustive, concept, exhaustive);
        set_member(&mut self.fully_defined, concept, fully_defined);
    }

    pub fn clear_flags(&mut self, concept: ConceptId) {
        self.set_flags(concept, false, false);
    }

    /// Tombstone a concept and drop everything it owns. Returns whether it was active.
    pub fn remove_concept(&mut self, concept: ConceptId) -> bool {
        self.mark_dirty();
        self.clear_flags(concept);
        self.fragments.remove_concept(concept);
        Arc::make_mut(&mut self.registry).tombstone(concept).is_some()
    }

    pub fn add_statement(
        &mut self,
        source: ConceptId,
        characteristic: CharacteristicType,
        fragment: StatementFragment,
    ) {
        self.mark_dirty();
        self.fragments.add_statement(source, characteristic, fragment);
    }

    pub fn add_concrete_domain(
        &mut self,
        component_id: u64,
        characteristic: CharacteristicType,
        owner: Option<ConceptId>,
        fragment: ConcreteDomainFragment,
    ) {
        self.fragments
            .add_concrete_domain(component_id, characteristic, owner, fragment);
    }

    /// Remove the component behind a storage key, if loaded.
    pub fn remove_by_key(&mut self, storage_key: StorageKey) -> Option<Removed> {
        let removed = self.fragments.remove_by_key(storage_key)?;
        if matches!(removed, Removed::Statement { .. }) {
            self.mark_dirty();
        }
        Some(removed)
    }

    /// Rebuild the adjacency arrays from the IS-A statements of this view.
    ///
    /// Sources are visited in internal id order and each source's statements
    /// in statement id order, so equal content produces identical arrays
    /// whatever edit history led to it.
    pub fn rebuild(&mut self, policy: EdgePolicy) -> GraphResult<BuildReport> {
        let view = self.view;
        let fragments = &self.fragments;
        let registry = &*self.registry;
        let edges_of = move |source: ConceptId| {
            fragments
                .is_a_statements_of(source, view)
                .iter()
                .map(move |f| IsAEdge {
                    source,
                    destination: f.destination_id,
                })
        };
        let registered = registry.iter().flat_map(move |(_, source)| edges_of(source));
        let orphaned = fragments
            .is_a_sources(view)
            .filter(|source| !registry.contains(*source))
            .flat_map(move |source| edges_of(source));

        let (graph, report) = TaxonomyGraph::build(registry, registered.chain(orphaned), policy)?;
        tracing::debug!(
            view = %self.view,
            nodes = graph.size(),
            edges = report.edges,
            dropped = report.dropped.len(),
            "rebuilt taxonomy arrays"
        );
        self.graph = Arc::new(graph);
        Ok(report)
    }
}

fn set_member(set: &mut Arc<HashSet<ConceptId>>, concept: ConceptId, member: bool) {
    if set.contains(&concept) != member {
        let set = Arc::make_mut(set);
        if member {
            set.insert(concept);
        } else {
            set.remove(&concept);
        }
    }
}

/// Accessors that fail with [`RegistryError::NotFound`] for unknown or
/// inactive concepts.
#[derive(Debug, Clone, Copy)]
pub struct StrictView<'a> {
    snapshot: &'a Snapshot,
}

impl StrictView<'_> {
    fn require(&self, concept: ConceptId) -> TaxonomyResult<()> {
        self.snapshot.registry.internal_id(concept)?;
        Ok(())
    }

    pub fn direct_ancestors(&self, concept: ConceptId) -> TaxonomyResult<Vec<ConceptId>> {
        self.require(concept)?;
        Ok(self.snapshot.direct_ancestors(concept)?)
    }

    pub fn direct_descendants(&self, concept: ConceptId) -> TaxonomyResult<Vec<ConceptId>> {
        self.require(concept)?;
        Ok(self.snapshot.direct_descendants(concept)?)
    }

    pub fn all_ancestors(&self, concept: ConceptId) -> TaxonomyResult<BTreeSet<ConceptId>> {
        self.require(concept)?;
        Ok(self.snapshot.all_ancestors(concept)?)
    }

    pub fn all_descendants(&self, concept: ConceptId) -> TaxonomyResult<BTreeSet<ConceptId>> {
        self.require(concept)?;
        Ok(self.snapshot.all_descendants(concept)?)
    }

    pub fn statements_of(
        &self,
        concept: ConceptId,
        characteristic: CharacteristicType,
    ) -> TaxonomyResult<Vec<StatementFragment>> {
        self.require(concept)?;
        Ok(self.snapshot.statements_of(concept, characteristic))
    }

    pub fn is_primitive(&self, concept: ConceptId) -> TaxonomyResult<bool> {
        self.require(concept)?;
        Ok(self.snapshot.is_primitive(concept))
    }

    pub fn is_exhaustive(&self, concept: ConceptId) -> TaxonomyResult<bool> {
        self.require(concept)?;
        Ok(self.snapshot.is_exhaustive(concept))
    }

    /// The internal id of an active concept.
    pub fn internal_id(&self, concept: ConceptId) -> Result<InternalId, RegistryError> {
        self.snapshot.registry.internal_id(concept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concept::well_known;
    use crate::error::{GraphError, TaxonomyError};

    const STATED: CharacteristicType = CharacteristicType::Stated;

    fn is_a(id: u64, key: u64, dest: u64) -> StatementFragment {
        StatementFragment {
            statement_id: id,
            storage_key: StorageKey(key),
            type_id: ConceptId(well_known::IS_A),
            destination_id: ConceptId(dest),
            destination_negated: false,
            group: 0,
            union_group: 0,
            universal: false,
        }
    }

    /// Animal(1) <- Mammal(2) <- Dog(3)
    fn animals() -> Snapshot {
        let mut snap = Snapshot::empty(
            STATED,
            BuilderMode::Classification,
            ConceptId(well_known::IS_A),
        );
        for id in [1, 2, 3] {
            snap.register_concept(ConceptId(id), StorageKey(100 + id)).unwrap();
        }
        snap.set_flags(ConceptId(2), false, true);
        snap.add_statement(ConceptId(2), STATED, is_a(20, 200, 1));
        snap.add_statement(ConceptId(3), STATED, is_a(30, 300, 2));
        snap.rebuild(EdgePolicy::Strict).unwrap();
        snap
    }

    fn set(ids: &[u64]) -> BTreeSet<ConceptId> {
        ids.iter().map(|&i| ConceptId(i)).collect()
    }

    #[test]
    fn closure_queries() {
        let snap = animals();
        assert_eq!(snap.all_ancestors(ConceptId(3)).unwrap(), set(&[1, 2]));
        assert_eq!(snap.all_descendants(ConceptId(1)).unwrap(), set(&[2, 3]));
        assert_eq!(snap.direct_descendants(ConceptId(2)).unwrap(), vec![ConceptId(3)]);
        assert_eq!(
            snap.self_and_all_ancestors(ConceptId(3)).unwrap(),
            set(&[1, 2, 3])
        );
        assert_eq!(snap.indirect_ancestors(ConceptId(3)).unwrap(), set(&[1]));
        assert!(snap.is_descendant_of(ConceptId(3), ConceptId(1)).unwrap());
        assert!(snap.cycles().unwrap().is_empty());
    }

    #[test]
    fn permissive_and_strict_accessors_differ_for_unknown() {
        let snap = animals();
        let unknown = ConceptId(404);
        assert!(snap.all_ancestors(unknown).unwrap().is_empty());
        assert!(snap.direct_ancestors(unknown).unwrap().is_empty());
        assert!(snap.is_primitive(unknown));

        let err = snap.strict().all_ancestors(unknown).unwrap_err();
        assert!(matches!(
            err,
            TaxonomyError::Registry(RegistryError::NotFound { concept_id: 404 })
        ));
        assert!(!snap.strict().is_primitive(ConceptId(2)).unwrap());
    }

    #[test]
    fn patching_makes_queries_fail_until_rebuild() {
        let mut snap = animals();
        snap.add_statement(ConceptId(3), STATED, is_a(31, 301, 1));
        assert!(snap.is_dirty());
        assert!(matches!(
            snap.all_ancestors(ConceptId(3)),
            Err(GraphError::DirtyState)
        ));
        snap.rebuild(EdgePolicy::Lenient).unwrap();
        assert_eq!(
            snap.direct_ancestors(ConceptId(3)).unwrap(),
            vec![ConceptId(2), ConceptId(1)]
        );
    }

    #[test]
    fn clone_leaves_baseline_untouched() {
        let baseline = animals();
        let mut derived = baseline.clone();
        derived.remove_concept(ConceptId(3));
        derived.rebuild(EdgePolicy::Lenient).unwrap();

        assert!(baseline.is_active(ConceptId(3)));
        assert!(!derived.is_active(ConceptId(3)));
        assert_eq!(derived.registry().size(), 3);
        assert_eq!(baseline.all_descendants(ConceptId(1)).unwrap(), set(&[2, 3]));
        assert_eq!(derived.all_descendants(ConceptId(1)).unwrap(), set(&[2]));

        let diff = derived.difference(&baseline);
        assert!(diff.new_edges.is_empty());
        assert_eq!(diff.detached_edges, HashSet::from([30]));
    }

    #[test]
    fn edge_lookup_by_statement_id() {
        let snap = animals();
        assert!(snap.contains_edge(30));
        assert_eq!(
            snap.edge_endpoints(30),
            Some(IsAEdge {
                source: ConceptId(3),
                destination: ConceptId(2)
            })
        );
        assert!(!snap.contains_edge(99));
    }

    #[test]
    fn strict_rebuild_reports_dangling_edge() {
        let mut snap = animals();
        snap.add_statement(ConceptId(3), STATED, is_a(32, 302, 77));
        let err = snap.rebuild(EdgePolicy::Strict).unwrap_err();
        assert!(matches!(err, GraphError::IncompleteTaxonomy { ref edges } if edges.len() == 1));
        assert!(snap.is_dirty());
    }
}
