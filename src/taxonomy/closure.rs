//! Transitive closure over the adjacency arrays.
//!
//! Walks use an explicit work stack and a bitset sized to the graph, so deep
//! hierarchies never recurse and cyclic input still terminates: a node is
//! pushed only when its bit is first set.

use fixedbitset::FixedBitSet;

use crate::concept::InternalId;
use crate::error::{GraphError, GraphResult};
use crate::registry::ConceptRegistry;

use super::TaxonomyGraph;

/// Direction of a walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    /// Follow ancestor arrays.
    Up,
    /// Follow descendant arrays.
    Down,
}

fn neighbours(graph: &TaxonomyGraph, id: InternalId, axis: Axis) -> &[InternalId] {
    match axis {
        Axis::Up => graph.ancestors_of(id),
        Axis::Down => graph.descendants_of(id),
    }
}

/// Direct neighbours of a node along `axis`.
pub fn direct(graph: &TaxonomyGraph, id: InternalId, axis: Axis) -> GraphResult<&[InternalId]> {
    graph.check_clean()?;
    Ok(neighbours(graph, id, axis))
}

/// Mark every node reachable from the neighbours of each start node.
///
/// The start nodes themselves are only marked when reachable again.
pub fn reach(graph: &TaxonomyGraph, starts: &[InternalId], axis: Axis) -> GraphResult<FixedBitSet> {
    graph.check_clean()?;
    let mut visited = FixedBitSet::with_capacity(graph.size());
    let mut stack: Vec<InternalId> = Vec::new();

    for &start in starts {
        push_unvisited(&mut visited, &mut stack, neighbours(graph, start, axis));
        while let Some(node) = stack.pop() {
            push_unvisited(&mut visited, &mut stack, neighbours(graph, node, axis));
        }
    }
    Ok(visited)
}

fn push_unvisited(visited: &mut FixedBitSet, stack: &mut Vec<InternalId>, nodes: &[InternalId]) {
    for &n in nodes {
        if !visited.put(n.index()) {
            stack.push(n);
        }
    }
}

/// Every proper ancestor (`Up`) or descendant (`Down`) of `id`.
///
/// Fails with [`GraphError::LoopDetected`] when `id` reaches itself.
pub fn all(
    graph: &TaxonomyGraph,
    registry: &ConceptRegistry,
    id: InternalId,
    axis: Axis,
) -> GraphResult<FixedBitSet> {
    let visited = reach(graph, &[id], axis)?;
    check_loop(&visited, registry, id)?;
    Ok(visited)
}

/// Like [`all`], with the node's own bit set.
pub fn self_and_all(
    graph: &TaxonomyGraph,
    registry: &ConceptRegistry,
    id: InternalId,
    axis: Axis,
) -> GraphResult<FixedBitSet> {
    let mut visited = all(graph, registry, id, axis)?;
    if id.index() < visited.len() {
        visited.insert(id.index());
    }
    Ok(visited)
}

/// Ancestors reachable through the direct parents, excluding the parents
/// unless they are also reachable through another parent.
pub fn indirect_ancestors(
    graph: &TaxonomyGraph,
    registry: &ConceptRegistry,
    id: InternalId,
) -> GraphResult<FixedBitSet> {
    let parents = direct(graph, id, Axis::Up)?;
    let visited = reach(graph, parents, Axis::Up)?;
    check_loop(&visited, registry, id)?;
    Ok(visited)
}

/// Whether `descendant` lies strictly below `ancestor`.
pub fn is_descendant_of(
    graph: &TaxonomyGraph,
    descendant: InternalId,
    ancestor: InternalId,
) -> GraphResult<bool> {
    graph.check_clean()?;
    if descendant == ancestor {
        return Ok(false);
    }
    let mut visited = FixedBitSet::with_capacity(graph.size());
    let mut stack = vec![descendant];
    while let Some(node) = stack.pop() {
        for &parent in graph.ancestors_of(node) {
            if parent == ancestor {
                return Ok(true);
            }
            if !visited.put(parent.index()) {
                stack.push(parent);
            }
        }
    }
    Ok(false)
}

fn check_loop(
    visited: &FixedBitSet,
    registry: &ConceptRegistry,
    id: InternalId,
) -> GraphResult<()> {
    if visited.contains(id.index()) {
        let concept_id = registry.concept_at(id).map(|c| c.get()).unwrap_or_default();
        return Err(GraphError::LoopDetected { concept_id });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concept::ConceptId;
    use crate::taxonomy::{EdgePolicy, IsAEdge};

    fn build(ids: &[u64], edges: &[(u64, u64)]) -> (ConceptRegistry, TaxonomyGraph) {
        let mut reg = ConceptRegistry::new();
        for &id in ids {
            reg.register(ConceptId(id)).unwrap();
        }
        let edges = edges.iter().map(|&(s, d)| IsAEdge {
            source: ConceptId(s),
            destination: ConceptId(d),
        });
        let (graph, _) = TaxonomyGraph::build(&reg, edges, EdgePolicy::Strict).unwrap();
        (reg, graph)
    }

    fn ids(reg: &ConceptRegistry, set: &FixedBitSet) -> Vec<u64> {
        set.ones()
            .filter_map(|i| reg.concept_at(InternalId(i as u32)))
            .map(|c| c.get())
            .collect()
    }

    #[test]
    fn animal_mammal_dog() {
        let (reg, graph) = build(&[1, 2, 3], &[(2, 1), (3, 2)]);
        let id = |c: u64| reg.get(ConceptId(c)).unwrap();

        let up = all(&graph, &reg, id(3), Axis::Up).unwrap();
        assert_eq!(ids(&reg, &up), vec![1, 2]);
        let down = all(&graph, &reg, id(1), Axis::Down).unwrap();
        assert_eq!(ids(&reg, &down), vec![2, 3]);
        assert_eq!(direct(&graph, id(2), Axis::Down).unwrap(), &[id(3)]);

        let with_self = self_and_all(&graph, &reg, id(3), Axis::Up).unwrap();
        assert_eq!(ids(&reg, &with_self), vec![1, 2, 3]);

        let indirect = indirect_ancestors(&graph, &reg, id(3)).unwrap();
        assert_eq!(ids(&reg, &indirect), vec![1]);

        assert!(is_descendant_of(&graph, id(3), id(1)).unwrap());
        assert!(!is_descendant_of(&graph, id(1), id(3)).unwrap());
        assert!(!is_descendant_of(&graph, id(3), id(3)).unwrap());
    }

    #[test]
    fn diamond_visits_shared_ancestor_once() {
        let (reg, graph) = build(&[1, 2, 3, 4], &[(2, 1), (3, 1), (4, 2), (4, 3)]);
        let up = all(&graph, &reg, reg.get(ConceptId(4)).unwrap(), Axis::Up).unwrap();
        assert_eq!(ids(&reg, &up), vec![1, 2, 3]);
    }

    #[test]
    fn cycle_terminates_and_reports_loop() {
        let (reg, graph) = build(&[1, 2, 3], &[(1, 2), (2, 3), (3, 1)]);
        let err = all(&graph, &reg, reg.get(ConceptId(1)).unwrap(), Axis::Up).unwrap_err();
        assert!(matches!(err, GraphError::LoopDetected { concept_id: 1 }));
    }

    #[test]
    fn dirty_graph_refuses_queries() {
        let (reg, mut graph) = build(&[1, 2], &[(2, 1)]);
        graph.mark_dirty();
        let id = reg.get(ConceptId(2)).unwrap();
        assert!(matches!(direct(&graph, id, Axis::Up), Err(GraphError::DirtyState)));
        assert!(matches!(all(&graph, &reg, id, Axis::Up), Err(GraphError::DirtyState)));
        assert!(matches!(
            is_descendant_of(&graph, id, id),
            Err(GraphError::DirtyState)
        ));
    }
}
