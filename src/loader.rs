//! Parallel initial load of a snapshot from a read collaborator.
//!
//! Every bulk query runs as its own task on a bounded `rayon` pool and scrolls
//! its pages into a private slot. The pool scope is the barrier: once every
//! task has finished, the slots are merged on the calling thread in a fixed
//! order and the taxonomy graph is built strictly.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::concept::{CharacteristicType, ComponentKind, ConceptId};
use crate::config::TaxonomyConfig;
use crate::error::{LoadError, SourceError, TaxonomyResult};
use crate::snapshot::Snapshot;
use crate::source::{
    ConceptRow, ConcreteDomainQuery, ConcreteDomainRow, Pages, PreferredTermRow, RelationshipQuery,
    RelationshipRow, TaxonomySource, TypeFilter,
};
use crate::taxonomy::EdgePolicy;

// ---------------------------------------------------------------------------
// Task slots
// ---------------------------------------------------------------------------

/// One query and the slot its task writes into.
struct Task<Q, T> {
    name: String,
    query: Q,
    result: Option<Result<Vec<T>, SourceError>>,
}

impl<Q: std::fmt::Display, T> Task<Q, T> {
    fn new(query: Q) -> Self {
        Self {
            name: query.to_string(),
            query,
            result: None,
        }
    }
}

impl<Q, T> Task<Q, T> {
    fn run(&mut self, pages: Pages<'_, T>) {
        self.result = Some(drain(pages));
    }

    /// The query and its rows, or the task's failure.
    fn into_parts(self) -> Result<(Q, Vec<T>), LoadError> {
        match self.result {
            Some(Ok(rows)) => Ok((self.query, rows)),
            Some(Err(source)) => Err(LoadError::Task {
                task: self.name,
                source,
            }),
            None => Err(LoadError::MissingResult { task: self.name }),
        }
    }

    fn take(self) -> Result<Vec<T>, LoadError> {
        self.into_parts().map(|(_, rows)| rows)
    }
}

fn drain<T>(pages: Pages<'_, T>) -> Result<Vec<T>, SourceError> {
    let mut rows = Vec::new();
    for page in pages {
        rows.extend(page?);
    }
    Ok(rows)
}

/// Label for the parameterless queries.
struct Named(&'static str);

impl std::fmt::Display for Named {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Counts from one load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub tasks: usize,
    pub concepts: usize,
    pub statements: usize,
    pub is_a_edges: usize,
    pub concrete_domains: usize,
    /// Non-IS-A statements whose source concept is not active.
    pub dropped_statements: usize,
    /// Members whose concept or statement is not loaded.
    pub dropped_members: usize,
    pub elapsed: Duration,
}

/// A freshly built snapshot and what came with it.
#[derive(Debug, Clone)]
pub struct LoadOutcome {
    pub snapshot: Snapshot,
    /// Empty unless `preferred_terms` is enabled.
    pub preferred_terms: HashMap<ConceptId, String>,
    pub stats: LoadStats,
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Builds initial snapshots on a bounded worker pool.
pub struct ParallelLoader {
    config: TaxonomyConfig,
    pool: ThreadPool,
}

impl std::fmt::Debug for ParallelLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelLoader")
            .field("config", &self.config)
            .field("workers", &self.pool.current_num_threads())
            .finish()
    }
}

impl ParallelLoader {
    /// Validate `config` and start the worker pool.
    pub fn new(config: TaxonomyConfig) -> TaxonomyResult<Self> {
        config.validate()?;
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.max_workers)
            .thread_name(|i| format!("taxonomy-loader-{i}"))
            .build()
            .map_err(|e| LoadError::Pool {
                message: e.to_string(),
            })?;
        Ok(Self { config, pool })
    }

    pub fn config(&self) -> &TaxonomyConfig {
        &self.config
    }

    /// Build the snapshot whose graph is formed by the IS-A statements of `view`.
    ///
    /// Every task is awaited before any failure is reported; the first failure
    /// in task order wins and no snapshot is returned.
    pub fn load(
        &self,
        source: &dyn TaxonomySource,
        view: CharacteristicType,
    ) -> TaxonomyResult<LoadOutcome> {
        let mode = self.config.mode;
        if !mode.allows(view) {
            return Err(LoadError::ViewNotLoaded {
                characteristic: view.to_string(),
                mode: mode.to_string(),
            }
            .into());
        }

        let start = Instant::now();
        let is_a = self.config.is_a_type();
        let page_size = self.config.page_size;
        let allowed = mode.allowed_characteristics();

        let mut concepts: Task<Named, ConceptRow> = Task::new(Named("active concepts"));
        let mut is_a_tasks: Vec<Task<RelationshipQuery, RelationshipRow>> = allowed
            .iter()
            .map(|&characteristic| {
                Task::new(RelationshipQuery {
                    characteristic,
                    filter: TypeFilter::IsA(is_a),
                })
            })
            .collect();
        let mut attribute_tasks: Vec<Task<RelationshipQuery, RelationshipRow>> = allowed
            .iter()
            .map(|&characteristic| {
                Task::new(RelationshipQuery {
                    characteristic,
                    filter: TypeFilter::NonIsA(is_a),
                })
            })
            .collect();
        let mut member_tasks: Vec<Task<ConcreteDomainQuery, ConcreteDomainRow>> =
            self.member_queries().into_iter().map(Task::new).collect();
        let mut terms: Option<Task<Named, PreferredTermRow>> = self
            .config
            .preferred_terms
            .then(|| Task::new(Named("preferred terms")));

        let task_count = 1
            + is_a_tasks.len()
            + attribute_tasks.len()
            + member_tasks.len()
            + usize::from(terms.is_some());
        tracing::info!(
            branch = source.branch(),
            view = %view,
            mode = %mode,
            tasks = task_count,
            workers = self.pool.current_num_threads(),
            "loading taxonomy snapshot"
        );

        self.pool.scope(|scope| {
            let concepts = &mut concepts;
            scope.spawn(move |_| concepts.run(source.concepts(page_size)));
            for task in is_a_tasks.iter_mut().chain(attribute_tasks.iter_mut()) {
                scope.spawn(move |_| {
                    let pages = source.relationships(task.query, page_size);
                    task.run(pages)
                });
            }
            for task in member_tasks.iter_mut() {
                scope.spawn(move |_| {
                    let pages = source.concrete_domain_members(task.query, page_size);
                    task.run(pages)
                });
            }
            if let Some(task) = terms.as_mut() {
                scope.spawn(move |_| task.run(source.preferred_terms(page_size)));
            }
        });

        // Barrier passed: surface the first failure in task order.
        let concepts = concepts.take()?;
        let is_a_rows = take_all(is_a_tasks)?;
        let attribute_rows = take_all(attribute_tasks)?;
        let member_rows = take_all(member_tasks)?;
        let terms = terms.map(Task::take).transpose()?.unwrap_or_default();

        let mut stats = LoadStats {
            tasks: task_count,
            ..Default::default()
        };
        let mut snapshot = Snapshot::empty(view, mode, is_a);
        self.merge(
            &mut snapshot,
            concepts,
            is_a_rows,
            attribute_rows,
            member_rows,
            &mut stats,
        )?;
        let report = snapshot
            .rebuild(EdgePolicy::Strict)
            .map_err(LoadError::from)?;
        stats.is_a_edges = report.edges;

        if self.config.detect_cycles {
            let cycles = snapshot.cycles()?;
            if !cycles.is_empty() {
                tracing::warn!(
                    view = %view,
                    cycles = cycles.len(),
                    largest = cycles[0].len(),
                    "IS-A cycles found; closure queries on their members will fail"
                );
            }
        }

        let preferred_terms = terms
            .into_iter()
            .filter(|row| snapshot.is_active(row.concept_id))
            .map(|row| (row.concept_id, row.term))
            .collect();

        stats.elapsed = start.elapsed();
        tracing::info!(
            view = %view,
            concepts = stats.concepts,
            statements = stats.statements,
            is_a_edges = stats.is_a_edges,
            concrete_domains = stats.concrete_domains,
            dropped_statements = stats.dropped_statements,
            dropped_members = stats.dropped_members,
            elapsed_ms = stats.elapsed.as_millis() as u64,
            "taxonomy snapshot loaded"
        );

        Ok(LoadOutcome {
            snapshot,
            preferred_terms,
            stats,
        })
    }

    /// Load the stated and inferred views side by side.
    pub fn load_views(
        &self,
        source: &dyn TaxonomySource,
    ) -> TaxonomyResult<(LoadOutcome, LoadOutcome)> {
        let (stated, inferred) = rayon::join(
            || self.load(source, CharacteristicType::Stated),
            || self.load(source, CharacteristicType::Inferred),
        );
        Ok((stated?, inferred?))
    }

    fn member_queries(&self) -> Vec<ConcreteDomainQuery> {
        if !self.config.concrete_domains {
            return Vec::new();
        }
        let mut queries = Vec::new();
        for &characteristic in self.config.mode.allowed_characteristics() {
            for referenced_kind in [ComponentKind::Concept, ComponentKind::Relationship] {
                queries.push(ConcreteDomainQuery {
                    characteristic,
                    referenced_kind,
                });
            }
        }
        if self.config.additional_statement_concrete_domains
            && !self.config.mode.allows(CharacteristicType::Additional)
        {
            queries.push(ConcreteDomainQuery {
                characteristic: CharacteristicType::Additional,
                referenced_kind: ComponentKind::Relationship,
            });
        }
        queries
    }

    /// Single-threaded merge. Rows are sorted first, so the result does not
    /// depend on page or task completion order.
    fn merge(
        &self,
        snapshot: &mut Snapshot,
        mut concepts: Vec<ConceptRow>,
        is_a_rows: Vec<(RelationshipQuery, Vec<RelationshipRow>)>,
        attribute_rows: Vec<(RelationshipQuery, Vec<RelationshipRow>)>,
        member_rows: Vec<(ConcreteDomainQuery, Vec<ConcreteDomainRow>)>,
        stats: &mut LoadStats,
    ) -> TaxonomyResult<()> {
        concepts.sort_by_key(|row| row.id);
        for row in &concepts {
            snapshot.register_concept(row.id, row.storage_key)?;
            snapshot.set_flags(row.id, row.exhaustive, !row.primitive);
        }
        stats.concepts = snapshot.concept_count();

        let universal = self.config.universal_modifier_id;
        for (query, mut rows) in is_a_rows {
            rows.sort_by_key(|row| (row.source_id, row.id));
            for row in &rows {
                snapshot.add_statement(
                    row.source_id,
                    query.characteristic,
                    row.to_fragment(universal),
                );
            }
            stats.statements += rows.len();
        }
        for (query, mut rows) in attribute_rows {
            rows.sort_by_key(|row| (row.source_id, row.id));
            for row in &rows {
                if !snapshot.is_active(row.source_id) {
                    stats.dropped_statements += 1;
                    continue;
                }
                snapshot.add_statement(
                    row.source_id,
                    query.characteristic,
                    row.to_fragment(universal),
                );
                stats.statements += 1;
            }
        }

        for (query, mut rows) in member_rows {
            rows.sort_by_key(|row| (row.referenced_component_id, row.storage_key));
            for row in &rows {
                let owner = match query.referenced_kind {
                    ComponentKind::Relationship => snapshot
                        .fragments()
                        .source_of_statement(row.referenced_component_id),
                    _ => Some(ConceptId(row.referenced_component_id))
                        .filter(|&c| snapshot.is_active(c)),
                };
                let Some(owner) = owner else {
                    stats.dropped_members += 1;
                    continue;
                };
                snapshot.add_concrete_domain(
                    row.referenced_component_id,
                    query.characteristic,
                    Some(owner),
                    row.to_fragment(),
                );
                stats.concrete_domains += 1;
            }
        }

        if stats.dropped_statements + stats.dropped_members > 0 {
            tracing::debug!(
                dropped_statements = stats.dropped_statements,
                dropped_members = stats.dropped_members,
                "dropped rows of inactive or unknown components"
            );
        }
        Ok(())
    }
}

fn take_all<Q, T>(tasks: Vec<Task<Q, T>>) -> Result<Vec<(Q, Vec<T>)>, LoadError> {
    tasks.into_iter().map(Task::into_parts).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concept::{StorageKey, well_known};
    use crate::config::BuilderMode;
    use crate::error::{GraphError, TaxonomyError};
    use crate::fragment::DataType;
    use crate::source::InMemorySource;

    fn concept(id: u64) -> ConceptRow {
        ConceptRow {
            id: ConceptId(id),
            storage_key: StorageKey(100 + id),
            active: true,
            primitive: true,
            exhaustive: false,
        }
    }

    fn relationship(
        id: u64,
        source: u64,
        type_id: u64,
        dest: u64,
        characteristic: CharacteristicType,
    ) -> RelationshipRow {
        RelationshipRow {
            id,
            storage_key: StorageKey(1000 + id),
            active: true,
            source_id: ConceptId(source),
            type_id: ConceptId(type_id),
            destination_id: ConceptId(dest),
            destination_negated: false,
            group: 0,
            union_group: 0,
            modifier_id: well_known::EXISTENTIAL_RESTRICTION_MODIFIER,
            characteristic_type_id: characteristic.id(),
        }
    }

    fn animals() -> InMemorySource {
        let stated = CharacteristicType::Stated;
        let mut source = InMemorySource::new("MAIN");
        source.concepts = vec![concept(3), concept(1), concept(2)];
        source.relationships = vec![
            relationship(20, 2, well_known::IS_A, 1, stated),
            relationship(30, 3, well_known::IS_A, 2, stated),
            relationship(31, 3, well_known::IS_A, 1, CharacteristicType::Inferred),
            relationship(40, 3, 55, 1, stated),
            // Source concept not active.
            relationship(41, 9, 55, 1, stated),
        ];
        source.concrete_domain_members = vec![ConcreteDomainRow {
            referenced_component_id: 404,
            referenced_kind: ComponentKind::Concept,
            refset_id: ConceptId(99),
            attribute_name: "weight".into(),
            data_type: DataType::Integer,
            value: "4".into(),
            unit_id: None,
            storage_key: StorageKey(7000),
            characteristic_type_id: stated.id(),
            group: None,
            active: true,
        }];
        source
    }

    fn loader(mode: BuilderMode) -> ParallelLoader {
        let config = TaxonomyConfig {
            mode,
            page_size: 2,
            max_workers: 2,
            ..Default::default()
        };
        ParallelLoader::new(config).unwrap()
    }

    #[test]
    fn load_builds_stated_view() {
        let outcome = loader(BuilderMode::ChangeProcessing)
            .load(&animals(), CharacteristicType::Stated)
            .unwrap();
        let snap = &outcome.snapshot;
        assert_eq!(
            snap.direct_ancestors(ConceptId(3)).unwrap(),
            vec![ConceptId(2)]
        );
        assert_eq!(outcome.stats.concepts, 3);
        assert_eq!(outcome.stats.dropped_statements, 1);
        assert_eq!(outcome.stats.dropped_members, 1);
        assert_eq!(outcome.stats.is_a_edges, 2);
        // Internal ids follow concept id order regardless of row order.
        assert_eq!(snap.registry().get(ConceptId(1)).map(|i| i.get()), Some(0));
    }

    #[test]
    fn views_differ_by_is_a_partition() {
        let (stated, inferred) = loader(BuilderMode::ChangeProcessing)
            .load_views(&animals())
            .unwrap();
        assert_eq!(stated.snapshot.graph().edge_count(), 2);
        assert_eq!(inferred.snapshot.graph().edge_count(), 1);
        assert_eq!(
            inferred.snapshot.direct_ancestors(ConceptId(3)).unwrap(),
            vec![ConceptId(1)]
        );
    }

    #[test]
    fn classification_mode_rejects_inferred_view() {
        let err = loader(BuilderMode::Classification)
            .load(&animals(), CharacteristicType::Inferred)
            .unwrap_err();
        assert!(matches!(
            err,
            TaxonomyError::Load(LoadError::ViewNotLoaded { .. })
        ));
    }

    #[test]
    fn dangling_is_a_fails_strictly() {
        let mut source = animals();
        source.relationships.push(relationship(
            50,
            3,
            well_known::IS_A,
            77,
            CharacteristicType::Stated,
        ));
        source.relationships.push(relationship(
            51,
            88,
            well_known::IS_A,
            1,
            CharacteristicType::Stated,
        ));
        let err = loader(BuilderMode::Classification)
            .load(&source, CharacteristicType::Stated)
            .unwrap_err();
        match err {
            TaxonomyError::Load(LoadError::Graph(GraphError::IncompleteTaxonomy { edges })) => {
                assert_eq!(edges.len(), 2)
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn zero_page_size_is_rejected() {
        let config = TaxonomyConfig {
            page_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            ParallelLoader::new(config),
            Err(TaxonomyError::Config(_))
        ));
    }
}
