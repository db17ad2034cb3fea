//! Benchmarks for taxonomy builds and closure walks.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use taxonomy_engine::concept::ConceptId;
use taxonomy_engine::registry::ConceptRegistry;
use taxonomy_engine::taxonomy::closure::{self, Axis};
use taxonomy_engine::taxonomy::{EdgePolicy, IsAEdge, TaxonomyGraph};

const NODES: u64 = 100_000;

fn concept(i: u64) -> ConceptId {
    ConceptId(1_000_000 + i)
}

/// A 4-ary tree with an extra parent on every seventh node.
fn hierarchy() -> (ConceptRegistry, Vec<IsAEdge>) {
    let mut registry = ConceptRegistry::with_capacity(NODES as usize);
    for i in 0..NODES {
        registry.register(concept(i)).unwrap();
    }
    let mut edges = Vec::new();
    for i in 1..NODES {
        edges.push(IsAEdge {
            source: concept(i),
            destination: concept((i - 1) / 4),
        });
        if i % 7 == 0 && i / 2 != (i - 1) / 4 {
            edges.push(IsAEdge {
                source: concept(i),
                destination: concept(i / 2),
            });
        }
    }
    (registry, edges)
}

fn bench_build(c: &mut Criterion) {
    let (registry, edges) = hierarchy();

    c.bench_function("build_100k", |bench| {
        bench.iter(|| {
            let edges = edges.iter().copied();
            black_box(TaxonomyGraph::build(&registry, edges, EdgePolicy::Strict).unwrap())
        })
    });
}

fn bench_ancestors(c: &mut Criterion) {
    let (registry, edges) = hierarchy();
    let (graph, _) = TaxonomyGraph::build(&registry, edges, EdgePolicy::Strict).unwrap();
    let leaf = registry.get(concept(NODES - 1)).unwrap();

    c.bench_function("all_ancestors_leaf", |bench| {
        bench.iter(|| black_box(closure::all(&graph, &registry, leaf, Axis::Up).unwrap()))
    });
}

fn bench_descendants(c: &mut Criterion) {
    let (registry, edges) = hierarchy();
    let (graph, _) = TaxonomyGraph::build(&registry, edges, EdgePolicy::Strict).unwrap();
    let root = registry.get(concept(0)).unwrap();

    c.bench_function("all_descendants_root", |bench| {
        bench.iter(|| black_box(closure::all(&graph, &registry, root, Axis::Down).unwrap()))
    });
}

criterion_group!(benches, bench_build, bench_ancestors, bench_descendants);
criterion_main!(benches);
