//! IS-A cycle diagnostics.
//!
//! The closure walks terminate on cyclic input but only report the queried
//! node. This scan lists every cycle at once by running Tarjan's strongly
//! connected components over a `petgraph` copy of the ancestor arrays.

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::concept::{ConceptId, InternalId};
use crate::registry::ConceptRegistry;

use super::TaxonomyGraph;

/// A set of concepts that are mutually reachable over IS-A edges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cycle {
    /// Member concepts, sorted by id.
    pub members: Vec<ConceptId>,
}

impl Cycle {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Find every IS-A cycle, self-loops included. Largest first, ties by
/// smallest member.
pub fn find_cycles(graph: &TaxonomyGraph, registry: &ConceptRegistry) -> Vec<Cycle> {
    let node_count = graph.size();
    let mut g: DiGraph<(), ()> = DiGraph::with_capacity(node_count, graph.edge_count());
    for _ in 0..node_count {
        g.add_node(());
    }
    for i in 0..node_count {
        let id = InternalId(i as u32);
        for parent in graph.ancestors_of(id) {
            g.add_edge(NodeIndex::new(i), NodeIndex::new(parent.index()), ());
        }
    }

    let mut cycles: Vec<Cycle> = tarjan_scc(&g)
        .into_iter()
        .filter(|scc| scc.len() > 1 || g.contains_edge(scc[0], scc[0]))
        .map(|scc| {
            let mut members: Vec<ConceptId> = scc
                .iter()
                .filter_map(|idx| registry.concept_at(InternalId(idx.index() as u32)))
                .collect();
            members.sort();
            Cycle { members }
        })
        .collect();

    cycles.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.members.cmp(&b.members)));
    cycles
}
