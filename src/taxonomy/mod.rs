//! Taxonomy graph: exact-size IS-A adjacency arrays indexed by internal id.
//!
//! The graph is built in two passes over the IS-A edges of one
//! characteristic-type partition:
//!
//! 1. count out-degree and in-degree per internal id, classifying edges that
//!    reference unregistered concepts as invalid,
//! 2. allocate every array at its exact degree and fill it through per-node
//!    cursors.
//!
//! - **Closure queries** ([`closure`]): explicit-stack walks over the arrays
//! - **Cycle diagnostics** ([`cycles`]): strongly connected components via `petgraph`

pub mod closure;
pub mod cycles;

use serde::{Deserialize, Serialize};

use crate::concept::{ConceptId, InternalId};
use crate::error::{GraphError, GraphResult};
use crate::registry::ConceptRegistry;

/// One IS-A fact: `source` is-a `destination`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IsAEdge {
    pub source: ConceptId,
    pub destination: ConceptId,
}

/// How a build treats edges that reference unregistered concepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EdgePolicy {
    /// Collect every invalid edge and fail once with all of them.
    Strict,
    /// Drop invalid edges and continue.
    Lenient,
}

/// Which end of an invalid edge is not registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MissingEnd {
    Source,
    Destination,
    Both,
}

impl std::fmt::Display for MissingEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MissingEnd::Source => write!(f, "source"),
            MissingEnd::Destination => write!(f, "destination"),
            MissingEnd::Both => write!(f, "source and destination"),
        }
    }
}

/// An IS-A edge with at least one unregistered end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InvalidEdge {
    pub source: ConceptId,
    pub destination: ConceptId,
    pub missing: MissingEnd,
}

impl std::fmt::Display for InvalidEdge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} -> {} (missing {})",
            self.source, self.destination, self.missing
        )
    }
}

/// Summary of one graph build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    /// Edges placed in the arrays.
    pub edges: usize,
    /// Edges dropped under [`EdgePolicy::Lenient`], sorted.
    pub dropped: Vec<InvalidEdge>,
}

/// Per-node direct ancestor and descendant arrays.
///
/// Every array has exactly the node's out-degree (ancestors) or in-degree
/// (descendants) entries. Tombstoned slots keep empty arrays.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaxonomyGraph {
    ancestors: Vec<Box<[InternalId]>>,
    descendants: Vec<Box<[InternalId]>>,
    dirty: bool,
}

impl TaxonomyGraph {
    /// Build the adjacency arrays for every slot of `registry`.
    ///
    /// Edges are placed in iteration order, so identical inputs produce
    /// identical arrays.
    pub fn build<I>(
        registry: &ConceptRegistry,
        edges: I,
        policy: EdgePolicy,
    ) -> GraphResult<(TaxonomyGraph, BuildReport)>
    where
        I: IntoIterator<Item = IsAEdge>,
    {
        let node_count = registry.size();
        let mut out_degree = vec![0usize; node_count];
        let mut in_degree = vec![0usize; node_count];
        let mut resolved: Vec<(InternalId, InternalId)> = Vec::new();
        let mut invalid: Vec<InvalidEdge> = Vec::new();

        // First pass: degree histograms.
        for edge in edges {
            match (registry.get(edge.source), registry.get(edge.destination)) {
                (Some(source), Some(destination)) => {
                    out_degree[source.index()] += 1;
                    in_degree[destination.index()] += 1;
                    resolved.push((source, destination));
                }
                (source, destination) => {
                    let missing = match (source, destination) {
                        (None, None) => MissingEnd::Both,
                        (None, Some(_)) => MissingEnd::Source,
                        _ => MissingEnd::Destination,
                    };
                    invalid.push(InvalidEdge {
                        source: edge.source,
                        destination: edge.destination,
                        missing,
                    });
                }
            }
        }

        invalid.sort();
        invalid.dedup();
        if !invalid.is_empty() {
            match policy {
                EdgePolicy::Strict => {
                    return Err(GraphError::IncompleteTaxonomy { edges: invalid });
                }
                EdgePolicy::Lenient => {
                    tracing::debug!(
                        dropped = invalid.len(),
                        "dropped IS-A edges referencing unregistered concepts"
                    );
                }
            }
        }

        let allocate = |degrees: &[usize]| -> Vec<Box<[InternalId]>> {
            degrees
                .iter()
                .map(|&d| vec![InternalId(0); d].into_boxed_slice())
                .collect()
        };
        let mut ancestors = allocate(&out_degree);
        let mut descendants = allocate(&in_degree);

        // Second pass: fill through per-node cursors.
        let mut up_cursor = vec![0usize; node_count];
        let mut down_cursor = vec![0usize; node_count];
        for &(source, destination) in &resolved {
            let (s, d) = (source.index(), destination.index());
            ancestors[s][up_cursor[s]] = destination;
            up_cursor[s] += 1;
            descendants[d][down_cursor[d]] = source;
            down_cursor[d] += 1;
        }

        let report = BuildReport {
            edges: resolved.len(),
            dropped: invalid,
        };
        let graph = TaxonomyGraph {
            ancestors,
            descendants,
            dirty: false,
        };
        Ok((graph, report))
    }

    /// Number of node slots, holes included.
    pub fn size(&self) -> usize {
        self.ancestors.len()
    }

    /// Number of IS-A edges in the arrays.
    pub fn edge_count(&self) -> usize {
        self.ancestors.iter().map(|a| a.len()).sum()
    }

    /// Direct ancestors of a node; empty for out-of-range ids.
    pub fn ancestors_of(&self, id: InternalId) -> &[InternalId] {
        self.ancestors.get(id.index()).map(|a| &a[..]).unwrap_or(&[])
    }

    /// Direct descendants of a node; empty for out-of-range ids.
    pub fn descendants_of(&self, id: InternalId) -> &[InternalId] {
        self.descendants.get(id.index()).map(|d| &d[..]).unwrap_or(&[])
    }

    /// Whether edges changed since the arrays were built.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Flag the arrays as stale.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Fail with [`GraphError::DirtyState`] if the arrays are stale.
    pub fn check_clean(&self) -> GraphResult<()> {
        if self.dirty {
            Err(GraphError::DirtyState)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(ids: &[u64]) -> ConceptRegistry {
        let mut reg = ConceptRegistry::new();
        for &id in ids {
            reg.register(ConceptId(id)).unwrap();
        }
        reg
    }

    fn edge(source: u64, destination: u64) -> IsAEdge {
        IsAEdge {
            source: ConceptId(source),
            destination: ConceptId(destination),
        }
    }

    #[test]
    fn arrays_have_exact_degree() {
        // 4 is-a 2, 4 is-a 3, 2 is-a 1, 3 is-a 1
        let reg = registry(&[1, 2, 3, 4]);
        let edges = [edge(4, 2), edge(4, 3), edge(2, 1), edge(3, 1)];
        let (graph, report) = TaxonomyGraph::build(&reg, edges, EdgePolicy::Strict).unwrap();

        assert_eq!(report.edges, 4);
        assert_eq!(graph.size(), 4);
        assert_eq!(graph.edge_count(), 4);

        let id = |c: u64| reg.get(ConceptId(c)).unwrap();
        assert_eq!(graph.ancestors_of(id(4)), &[id(2), id(3)]);
        assert_eq!(graph.descendants_of(id(1)), &[id(2), id(3)]);
        assert!(graph.ancestors_of(id(1)).is_empty());
        assert!(graph.descendants_of(id(4)).is_empty());

        for (e, (s, d)) in edges.iter().map(|e| (e, (id(e.source.0), id(e.destination.0)))) {
            assert!(graph.ancestors_of(s).contains(&d), "missing {e:?}");
            assert!(graph.descendants_of(d).contains(&s), "missing {e:?}");
        }
    }

    #[test]
    fn strict_build_aggregates_all_invalid_edges() {
        let reg = registry(&[1, 2]);
        let edges = [edge(2, 1), edge(2, 77), edge(88, 1)];
        let err = TaxonomyGraph::build(&reg, edges, EdgePolicy::Strict).unwrap_err();
        match err {
            GraphError::IncompleteTaxonomy { edges } => {
                assert_eq!(edges.len(), 2);
                assert_eq!(edges[0].destination, ConceptId(77));
                assert_eq!(edges[0].missing, MissingEnd::Destination);
                assert_eq!(edges[1].source, ConceptId(88));
                assert_eq!(edges[1].missing, MissingEnd::Source);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn lenient_build_drops_invalid_edges() {
        let reg = registry(&[1, 2]);
        let edges = [edge(2, 1), edge(2, 77)];
        let (graph, report) = TaxonomyGraph::build(&reg, edges, EdgePolicy::Lenient).unwrap();
        assert_eq!(report.edges, 1);
        assert_eq!(report.dropped.len(), 1);
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn holes_keep_empty_arrays() {
        let mut reg = registry(&[1, 2, 3]);
        reg.tombstone(ConceptId(2));
        let (graph, _) =
            TaxonomyGraph::build(&reg, [edge(3, 1), edge(2, 1)], EdgePolicy::Lenient).unwrap();
        assert_eq!(graph.size(), 3);
        let hole = InternalId(1);
        assert!(graph.ancestors_of(hole).is_empty());
        assert!(graph.descendants_of(hole).is_empty());
        assert_eq!(graph.descendants_of(InternalId(0)), &[InternalId(2)]);
    }

    #[test]
    fn dirty_flag() {
        let mut graph = TaxonomyGraph::default();
        assert!(graph.check_clean().is_ok());
        graph.mark_dirty();
        assert!(matches!(graph.check_clean(), Err(GraphError::DirtyState)));
    }
}
