// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # taxonomy-engine
//!
//! IS-A taxonomy and closure engine for clinical terminologies. Builds dense
//! in-memory ancestor/descendant arrays over hundreds of thousands of
//! concepts and keeps them current from change-sets without reloading.
//!
//! ## Architecture
//!
//! - **Registry** (`registry`): ConceptId ↔ dense InternalId, append-only with tombstones
//! - **Fragments** (`fragment`): statement and concrete-domain multimaps, copy-on-write
//! - **Taxonomy** (`taxonomy`): exact-size adjacency arrays, closure walks, cycle scan
//! - **Snapshot** (`snapshot`): the registry/fragments/graph triple readers query
//! - **Loader** (`loader`): parallel bulk load from a paged [`source::TaxonomySource`]
//! - **Delta** (`delta`): change-set application producing a new snapshot
//!
//! ## Library usage
//!
//! ```no_run
//! use taxonomy_engine::concept::{CharacteristicType, ConceptId};
//! use taxonomy_engine::config::TaxonomyConfig;
//! use taxonomy_engine::loader::ParallelLoader;
//! use taxonomy_engine::source::InMemorySource;
//!
//! let source = InMemorySource::from_json_file("branch.json".as_ref()).unwrap();
//! let loader = ParallelLoader::new(TaxonomyConfig::default()).unwrap();
//! let outcome = loader.load(&source, CharacteristicType::Stated).unwrap();
//! let ancestors = outcome.snapshot.all_ancestors(ConceptId(404_684_003)).unwrap();
//! ```

pub mod concept;
pub mod config;
pub mod delta;
pub mod error;
pub mod fragment;
pub mod loader;
pub mod registry;
pub mod snapshot;
pub mod source;
pub mod taxonomy;
