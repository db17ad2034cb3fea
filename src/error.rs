//! Rich diagnostic error types for the taxonomy engine.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes and help text so callers can tell a caller mistake
//! (unknown concept) from a data problem (dangling IS-A edge, cycle) or an
//! infrastructure failure (read collaborator down).

use miette::Diagnostic;
use thiserror::Error;

use crate::taxonomy::InvalidEdge;

/// Top-level error type for the taxonomy engine.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain through to the caller.
#[derive(Debug, Error, Diagnostic)]
pub enum TaxonomyError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Registry errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic, PartialEq, Eq)]
pub enum RegistryError {
    #[error("concept does not exist with id {concept_id}")]
    #[diagnostic(
        code(taxonomy::registry::not_found),
        help(
            "The concept is not registered in this snapshot: it was never loaded, \
             is inactive, or was detached by a change-set. Use the permissive \
             accessors on `Snapshot` if absence is expected."
        )
    )]
    NotFound { concept_id: u64 },

    #[error("internal id space exhausted after {slots} slots")]
    #[diagnostic(
        code(taxonomy::registry::exhausted),
        help("Internal ids are 32-bit. Rebuild the snapshot from the store to compact tombstone holes.")
    )]
    Exhausted { slots: usize },
}

// ---------------------------------------------------------------------------
// Graph errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    #[error(
        "incomplete taxonomy: {} IS-A edge(s) reference unregistered concepts: {}",
        edges.len(),
        format_edges(edges)
    )]
    #[diagnostic(
        code(taxonomy::graph::incomplete),
        help(
            "Every active IS-A statement must connect two active concepts. \
             Inactivate the listed statements or reactivate the missing concepts, \
             then rebuild."
        )
    )]
    IncompleteTaxonomy { edges: Vec<InvalidEdge> },

    #[error("taxonomy is in dirty state: adjacency arrays have not been rebuilt")]
    #[diagnostic(
        code(taxonomy::graph::dirty),
        help("Call `Snapshot::rebuild` after adding or removing fragments before querying.")
    )]
    DirtyState,

    #[error("concept {concept_id} found in its own ancestor or descendant set (loop)")]
    #[diagnostic(
        code(taxonomy::graph::loop_detected),
        help(
            "The IS-A hierarchy must be acyclic. Use `Snapshot::cycles` to list the \
             strongly connected components and fix the offending statements."
        )
    )]
    LoopDetected { concept_id: u64 },
}

fn format_edges(edges: &[InvalidEdge]) -> String {
    edges
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

// ---------------------------------------------------------------------------
// Read collaborator errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum SourceError {
    #[error("I/O error reading taxonomy source: {source}")]
    #[diagnostic(
        code(taxonomy::source::io),
        help("Check that the fixture or export file exists and is readable.")
    )]
    Io {
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse taxonomy source data: {message}")]
    #[diagnostic(
        code(taxonomy::source::parse),
        help("The source rows do not match the expected concept/relationship/member layout.")
    )]
    Parse { message: String },

    #[error("query '{query}' failed on branch '{branch}': {message}")]
    #[diagnostic(
        code(taxonomy::source::backend),
        help("The search backend rejected or aborted the query. Deadlines are enforced by the backend.")
    )]
    Backend {
        branch: String,
        query: String,
        message: String,
    },
}

// ---------------------------------------------------------------------------
// Loader errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum LoadError {
    #[error("load task '{task}' failed")]
    #[diagnostic(
        code(taxonomy::load::task),
        help("One bulk read failed; the whole build was aborted and no snapshot was produced.")
    )]
    Task {
        task: String,
        #[source]
        source: SourceError,
    },

    #[error("load task '{task}' did not produce a result")]
    #[diagnostic(
        code(taxonomy::load::missing_result),
        help("The task panicked or was never scheduled. This is a bug in the loader.")
    )]
    MissingResult { task: String },

    #[error("failed to start loader worker pool: {message}")]
    #[diagnostic(
        code(taxonomy::load::pool),
        help("Lower `max_workers` in the taxonomy configuration.")
    )]
    Pool { message: String },

    #[error("characteristic type {characteristic} is not loaded in {mode} mode")]
    #[diagnostic(
        code(taxonomy::load::view),
        help("The inferred view needs `mode = \"change-processing\"`; classification mode loads stated facts only.")
    )]
    ViewNotLoaded {
        characteristic: String,
        mode: String,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}")]
    #[diagnostic(
        code(taxonomy::config::io),
        help("Check that the configuration file exists and is readable.")
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {message}")]
    #[diagnostic(
        code(taxonomy::config::parse),
        help("The configuration must be valid TOML matching `TaxonomyConfig`.")
    )]
    Parse { message: String },

    #[error("invalid configuration: {message}")]
    #[diagnostic(code(taxonomy::config::invalid), help("{message}"))]
    Invalid { message: String },
}

/// Convenience alias for functions returning taxonomy engine results.
pub type TaxonomyResult<T> = std::result::Result<T, TaxonomyError>;

/// Result type for graph and closure operations.
pub type GraphResult<T> = std::result::Result<T, GraphError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concept::ConceptId;
    use crate::taxonomy::MissingEnd;

    #[test]
    fn registry_error_converts_to_taxonomy_error() {
        let err = RegistryError::NotFound { concept_id: 42 };
        let top: TaxonomyError = err.into();
        assert!(matches!(
            top,
            TaxonomyError::Registry(RegistryError::NotFound { concept_id: 42 })
        ));
    }

    #[test]
    fn incomplete_taxonomy_lists_every_edge() {
        let err = GraphError::IncompleteTaxonomy {
            edges: vec![
                InvalidEdge {
                    source: ConceptId(10),
                    destination: ConceptId(1),
                    missing: MissingEnd::Destination,
                },
                InvalidEdge {
                    source: ConceptId(11),
                    destination: ConceptId(2),
                    missing: MissingEnd::Source,
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("2 IS-A edge(s)"));
        assert!(msg.contains("10 -> 1"));
        assert!(msg.contains("11 -> 2"));
    }

    #[test]
    fn load_error_wraps_graph_error() {
        let load: LoadError = GraphError::DirtyState.into();
        assert!(matches!(load, LoadError::Graph(GraphError::DirtyState)));
    }
}
