//! Partitioned fragment multimaps with a storage-key locator index.
//!
//! Statements are keyed by source concept and split by characteristic type and
//! by IS-A-ness; concrete-domain members are keyed by the concept or statement
//! they annotate and split by characteristic type. Every partition sits behind
//! an `Arc`, so cloning a store for a derived snapshot is cheap and the first
//! write to a partition copies only that partition.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use crate::concept::{CharacteristicType, ConceptId, StorageKey};

use super::{ConcreteDomainFragment, StatementFragment};

type Multimap<T> = HashMap<u64, Vec<T>>;

fn slot(characteristic: CharacteristicType) -> usize {
    match characteristic {
        CharacteristicType::Stated => 0,
        CharacteristicType::Inferred => 1,
        CharacteristicType::Additional => 2,
    }
}

/// Which list a storage key lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentSlot {
    /// The key of a concept revision; no fragment list, only ownership.
    Concept,
    /// A statement list of the owner.
    Statement {
        characteristic: CharacteristicType,
        is_a: bool,
    },
    /// A concrete-domain list of a concept or statement.
    ConcreteDomain {
        characteristic: CharacteristicType,
        component_id: u64,
    },
}

/// Where the component behind a storage key is stored and which concept owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Locator {
    /// Owning concept. `None` for members annotating a statement that is not loaded.
    pub owner: Option<ConceptId>,
    pub slot: FragmentSlot,
}

/// What a removal by storage key took out of the store.
#[derive(Debug, Clone, PartialEq)]
pub enum Removed {
    Concept(ConceptId),
    Statement {
        source: ConceptId,
        characteristic: CharacteristicType,
        fragment: StatementFragment,
    },
    ConcreteDomain {
        owner: Option<ConceptId>,
        fragment: ConcreteDomainFragment,
    },
}

impl Removed {
    /// The concept whose derived artifacts depend on the removed component.
    pub fn owner(&self) -> Option<ConceptId> {
        match self {
            Removed::Concept(concept) => Some(*concept),
            Removed::Statement { source, .. } => Some(*source),
            Removed::ConcreteDomain { owner, .. } => *owner,
        }
    }
}

/// Multimap store of statement and concrete-domain fragments.
#[derive(Debug, Clone)]
pub struct FragmentStore {
    is_a_type: ConceptId,
    /// IS-A statements by source concept, per characteristic type.
    is_a: [Arc<Multimap<StatementFragment>>; 3],
    /// Non-IS-A statements by source concept, per characteristic type.
    attributes: [Arc<Multimap<StatementFragment>>; 3],
    /// Concrete-domain members by concept or statement id, per characteristic type.
    concrete_domains: [Arc<Multimap<ConcreteDomainFragment>>; 3],
    locators: Arc<HashMap<StorageKey, Locator>>,
    /// Statement id → source concept.
    statement_sources: Arc<HashMap<u64, ConceptId>>,
}

impl FragmentStore {
    /// Create an empty store that treats `is_a_type` statements as taxonomy edges.
    pub fn new(is_a_type: ConceptId) -> Self {
        Self {
            is_a_type,
            is_a: Default::default(),
            attributes: Default::default(),
            concrete_domains: Default::default(),
            locators: Default::default(),
            statement_sources: Default::default(),
        }
    }

    /// The relationship type routed into the IS-A partitions.
    pub fn is_a_type(&self) -> ConceptId {
        self.is_a_type
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// All statements of a source concept, IS-A first.
    pub fn statements_of(
        &self,
        concept: ConceptId,
        characteristic: CharacteristicType,
    ) -> Vec<StatementFragment> {
        self.is_a_statements_of(concept, characteristic)
            .iter()
            .chain(self.non_is_a_statements_of(concept, characteristic))
            .copied()
            .collect()
    }

    /// IS-A statements of a source concept.
    pub fn is_a_statements_of(
        &self,
        concept: ConceptId,
        characteristic: CharacteristicType,
    ) -> &[StatementFragment] {
        self.is_a[slot(characteristic)]
            .get(&concept.get())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Statements of a source concept whose type is not IS-A.
    pub fn non_is_a_statements_of(
        &self,
        concept: ConceptId,
        characteristic: CharacteristicType,
    ) -> &[StatementFragment] {
        self.attributes[slot(characteristic)]
            .get(&concept.get())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Concrete-domain members attached to a concept or statement id.
    pub fn concrete_domains_of(
        &self,
        component_id: u64,
        characteristic: CharacteristicType,
    ) -> &[ConcreteDomainFragment] {
        self.concrete_domains[slot(characteristic)]
            .get(&component_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Every distinct concrete-domain attribute name of a partition.
    pub fn all_concrete_domain_labels(
        &self,
        characteristic: CharacteristicType,
    ) -> BTreeSet<String> {
        self.concrete_domains[slot(characteristic)]
            .values()
            .flatten()
            .map(|f| f.label.clone())
            .collect()
    }

    /// The source concept of a loaded statement.
    pub fn source_of_statement(&self, statement_id: u64) -> Option<ConceptId> {
        self.statement_sources.get(&statement_id).copied()
    }

    /// Locate the component behind a storage key.
    pub fn locate(&self, storage_key: StorageKey) -> Option<&Locator> {
        self.locators.get(&storage_key)
    }

    /// Source concepts with at least one IS-A statement in a partition.
    pub fn is_a_sources(
        &self,
        characteristic: CharacteristicType,
    ) -> impl Iterator<Item = ConceptId> + '_ {
        self.is_a[slot(characteristic)].keys().map(|&id| ConceptId(id))
    }

    /// Ids of all IS-A statements in a partition.
    pub fn is_a_statement_ids(&self, characteristic: CharacteristicType) -> HashSet<u64> {
        self.is_a[slot(characteristic)]
            .values()
            .flatten()
            .map(|f| f.statement_id)
            .collect()
    }

    /// Find an IS-A statement by id, with its source concept.
    pub fn find_is_a_statement(
        &self,
        statement_id: u64,
        characteristic: CharacteristicType,
    ) -> Option<(ConceptId, StatementFragment)> {
        let source = self.source_of_statement(statement_id)?;
        self.is_a_statements_of(source, characteristic)
            .iter()
            .find(|f| f.statement_id == statement_id)
            .map(|f| (source, *f))
    }

    /// Number of statements in a partition, IS-A and non-IS-A.
    pub fn statement_count(&self, characteristic: CharacteristicType) -> usize {
        let s = slot(characteristic);
        self.is_a[s].values().map(Vec::len).sum::<usize>()
            + self.attributes[s].values().map(Vec::len).sum::<usize>()
    }

    /// Number of concrete-domain members in a partition.
    pub fn concrete_domain_count(&self, characteristic: CharacteristicType) -> usize {
        self.concrete_domains[slot(characteristic)]
            .values()
            .map(Vec::len)
            .sum()
    }

    /// Compare two stores ignoring the order of each fragment list.
    pub fn content_eq(&self, other: &FragmentStore) -> bool {
        if self.is_a_type != other.is_a_type
            || self.locators != other.locators
            || self.statement_sources != other.statement_sources
        {
            return false;
        }
        (0..3).all(|s| {
            multimap_eq(&self.is_a[s], &other.is_a[s], |f| (f.storage_key, f.statement_id))
                && multimap_eq(&self.attributes[s], &other.attributes[s], |f| {
                    (f.storage_key, f.statement_id)
                })
                && multimap_eq(&self.concrete_domains[s], &other.concrete_domains[s], |f| {
                    (f.storage_key, 0)
                })
        })
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Record the storage key of a concept revision.
    pub fn register_concept_key(&mut self, storage_key: StorageKey, concept: ConceptId) {
        Arc::make_mut(&mut self.locators).insert(
            storage_key,
            Locator {
                owner: Some(concept),
                slot: FragmentSlot::Concept,
            },
        );
    }

    /// Add a statement to its source concept's list.
    ///
    /// Lists stay ordered by statement id, so the list a concept ends up with
    /// does not depend on the order its statements were added in.
    pub fn add_statement(
        &mut self,
        source: ConceptId,
        characteristic: CharacteristicType,
        fragment: StatementFragment,
    ) {
        let is_a = fragment.is_a(self.is_a_type);
        let partition = if is_a {
            &mut self.is_a[slot(characteristic)]
        } else {
            &mut self.attributes[slot(characteristic)]
        };
        let list = Arc::make_mut(partition).entry(source.get()).or_default();
        let pos = list.partition_point(|f| f.statement_id <= fragment.statement_id);
        list.insert(pos, fragment);
        Arc::make_mut(&mut self.locators).insert(
            fragment.storage_key,
            Locator {
                owner: Some(source),
                slot: FragmentSlot::Statement {
                    characteristic,
                    is_a,
                },
            },
        );
        Arc::make_mut(&mut self.statement_sources).insert(fragment.statement_id, source);
    }

    /// Remove the first statement of `source` with the given storage key.
    pub fn remove_statement(
        &mut self,
        source: ConceptId,
        characteristic: CharacteristicType,
        storage_key: StorageKey,
    ) -> Option<StatementFragment> {
        let s = slot(characteristic);
        let matches = |f: &StatementFragment| f.storage_key == storage_key;
        let removed = remove_first(&mut self.is_a[s], source.get(), matches)
            .or_else(|| remove_first(&mut self.attributes[s], source.get(), matches))?;

        Arc::make_mut(&mut self.locators).remove(&storage_key);
        if self.statement_sources.get(&removed.statement_id) == Some(&source) {
            Arc::make_mut(&mut self.statement_sources).remove(&removed.statement_id);
        }
        Some(removed)
    }

    /// Attach a concrete-domain member to a concept or statement.
    pub fn add_concrete_domain(
        &mut self,
        component_id: u64,
        characteristic: CharacteristicType,
        owner: Option<ConceptId>,
        fragment: ConcreteDomainFragment,
    ) {
        let storage_key = fragment.storage_key;
        Arc::make_mut(&mut self.concrete_domains[slot(characteristic)])
            .entry(component_id)
            .or_default()
            .push(fragment);
        Arc::make_mut(&mut self.locators).insert(
            storage_key,
            Locator {
                owner,
                slot: FragmentSlot::ConcreteDomain {
                    characteristic,
                    component_id,
                },
            },
        );
    }

    /// Remove the first concrete-domain member of a component with the given storage key.
    pub fn remove_concrete_domain(
        &mut self,
        component_id: u64,
        characteristic: CharacteristicType,
        storage_key: StorageKey,
    ) -> Option<ConcreteDomainFragment> {
        let removed = remove_first(
            &mut self.concrete_domains[slot(characteristic)],
            component_id,
            |f| f.storage_key == storage_key,
        )?;
        Arc::make_mut(&mut self.locators).remove(&storage_key);
        Some(removed)
    }

    /// Remove whatever component a storage key points at.
    ///
    /// Returns `None` for unknown keys. A concept key only loses its locator;
    /// the caller decides what happens to the concept itself.
    pub fn remove_by_key(&mut self, storage_key: StorageKey) -> Option<Removed> {
        let locator = *self.locators.get(&storage_key)?;
        let removed = match locator.slot {
            FragmentSlot::Concept => {
                Arc::make_mut(&mut self.locators).remove(&storage_key);
                locator.owner.map(Removed::Concept)
            }
            FragmentSlot::Statement { characteristic, .. } => {
                let source = locator.owner?;
                self.remove_statement(source, characteristic, storage_key)
                    .map(|fragment| Removed::Statement {
                        source,
                        characteristic,
                        fragment,
                    })
            }
            FragmentSlot::ConcreteDomain {
                characteristic,
                component_id,
            } => self
                .remove_concrete_domain(component_id, characteristic, storage_key)
                .map(|fragment| Removed::ConcreteDomain {
                    owner: locator.owner,
                    fragment,
                }),
        };
        if removed.is_none() {
            // Stale locator: the list entry is already gone.
            Arc::make_mut(&mut self.locators).remove(&storage_key);
        }
        removed
    }

    /// Drop every fragment owned by a concept: its statements in all
    /// partitions, the members attached to those statements, and the members
    /// attached to the concept. Returns the number of fragments dropped.
    pub fn remove_concept(&mut self, concept: ConceptId) -> usize {
        let mut dropped = 0;
        let mut statement_ids = Vec::new();

        for s in 0..3 {
            for partition in [&mut self.is_a[s], &mut self.attributes[s]] {
                if !partition.contains_key(&concept.get()) {
                    continue;
                }
                let Some(list) = Arc::make_mut(partition).remove(&concept.get()) else {
                    continue;
                };
                let locators = Arc::make_mut(&mut self.locators);
                for fragment in &list {
                    locators.remove(&fragment.storage_key);
                    statement_ids.push(fragment.statement_id);
                }
                dropped += list.len();
            }
        }

        let sources = Arc::make_mut(&mut self.statement_sources);
        for id in &statement_ids {
            sources.remove(id);
        }

        for s in 0..3 {
            let keys = statement_ids.iter().copied().chain([concept.get()]);
            for component_id in keys {
                if !self.concrete_domains[s].contains_key(&component_id) {
                    continue;
                }
                let domains = Arc::make_mut(&mut self.concrete_domains[s]);
                if let Some(list) = domains.remove(&component_id) {
                    let locators = Arc::make_mut(&mut self.locators);
                    for fragment in &list {
                        locators.remove(&fragment.storage_key);
                    }
                    dropped += list.len();
                }
            }
        }

        dropped
    }
}

/// Remove the first matching entry of `key`'s list, pruning the list when it
/// becomes empty. Leaves the partition untouched (no copy) when nothing matches.
fn remove_first<T: Clone>(
    partition: &mut Arc<Multimap<T>>,
    key: u64,
    matches: impl Fn(&T) -> bool,
) -> Option<T> {
    let pos = partition.get(&key)?.iter().position(|f| matches(f))?;
    let map = Arc::make_mut(partition);
    let list = map.get_mut(&key)?;
    let removed = list.remove(pos);
    if list.is_empty() {
        map.remove(&key);
    }
    Some(removed)
}

fn multimap_eq<T: Clone + PartialEq, K: Ord>(
    left: &Multimap<T>,
    right: &Multimap<T>,
    sort_key: impl Fn(&T) -> K,
) -> bool {
    if left.len() != right.len() {
        return false;
    }
    left.iter().all(|(key, l)| {
        let Some(r) = right.get(key) else {
            return false;
        };
        if l.len() != r.len() {
            return false;
        }
        let mut l = l.clone();
        let mut r = r.clone();
        l.sort_by_key(|f| sort_key(f));
        r.sort_by_key(|f| sort_key(f));
        l == r
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concept::well_known;
    use crate::fragment::DataType;

    const STATED: CharacteristicType = CharacteristicType::Stated;

    fn store() -> FragmentStore {
        FragmentStore::new(ConceptId(well_known::IS_A))
    }

    fn stmt(id: u64, key: u64, type_id: u64, dest: u64) -> StatementFragment {
        StatementFragment {
            statement_id: id,
            storage_key: StorageKey(key),
            type_id: ConceptId(type_id),
            destination_id: ConceptId(dest),
            destination_negated: false,
            group: 0,
            union_group: 0,
            universal: false,
        }
    }

    fn cd(key: u64, label: &str) -> ConcreteDomainFragment {
        ConcreteDomainFragment {
            value: "5".into(),
            label: label.into(),
            data_type: DataType::Integer,
            unit_id: None,
            storage_key: StorageKey(key),
            refset_id: ConceptId(99),
            group: None,
        }
    }

    #[test]
    fn statements_are_partitioned_by_is_a() {
        let mut fs = store();
        let dog = ConceptId(3);
        fs.add_statement(dog, STATED, stmt(1, 1001, well_known::IS_A, 2));
        fs.add_statement(dog, STATED, stmt(2, 1002, 55, 7));

        assert_eq!(fs.statements_of(dog, STATED).len(), 2);
        assert_eq!(fs.is_a_statements_of(dog, STATED).len(), 1);
        assert_eq!(fs.non_is_a_statements_of(dog, STATED)[0].statement_id, 2);
        assert!(fs.statements_of(dog, CharacteristicType::Inferred).is_empty());
        assert!(fs.statements_of(ConceptId(404), STATED).is_empty());
        assert_eq!(fs.source_of_statement(1), Some(dog));
    }

    #[test]
    fn statements_stay_in_statement_id_order() {
        let mut fs = store();
        let dog = ConceptId(3);
        fs.add_statement(dog, STATED, stmt(32, 1032, well_known::IS_A, 2));
        fs.add_statement(dog, STATED, stmt(31, 1031, well_known::IS_A, 1));
        fs.add_statement(dog, STATED, stmt(33, 1033, well_known::IS_A, 4));
        let ids: Vec<u64> = fs
            .is_a_statements_of(dog, STATED)
            .iter()
            .map(|f| f.statement_id)
            .collect();
        assert_eq!(ids, vec![31, 32, 33]);

        // Removing and re-adding lands the statement back in place.
        fs.remove_statement(dog, STATED, StorageKey(1031)).unwrap();
        fs.add_statement(dog, STATED, stmt(31, 1031, well_known::IS_A, 1));
        assert_eq!(fs.is_a_statements_of(dog, STATED)[0].statement_id, 31);
    }

    #[test]
    fn remove_statement_takes_first_match_and_prunes() {
        let mut fs = store();
        let dog = ConceptId(3);
        // Two entries sharing a storage key: only the first goes.
        fs.add_statement(dog, STATED, stmt(1, 1001, well_known::IS_A, 2));
        fs.add_statement(dog, STATED, stmt(9, 1001, well_known::IS_A, 4));

        let removed = fs.remove_statement(dog, STATED, StorageKey(1001)).unwrap();
        assert_eq!(removed.statement_id, 1);
        assert_eq!(fs.is_a_statements_of(dog, STATED).len(), 1);

        fs.remove_statement(dog, STATED, StorageKey(1001)).unwrap();
        assert!(fs.is_a_statements_of(dog, STATED).is_empty());
        assert!(fs.remove_statement(dog, STATED, StorageKey(1001)).is_none());
        assert_eq!(fs.statement_count(STATED), 0);
    }

    #[test]
    fn remove_by_key_reports_owner() {
        let mut fs = store();
        let dog = ConceptId(3);
        fs.register_concept_key(StorageKey(500), dog);
        fs.add_statement(dog, STATED, stmt(1, 1001, 55, 2));
        fs.add_concrete_domain(1, STATED, Some(dog), cd(2001, "strength"));

        let removed = fs.remove_by_key(StorageKey(2001)).unwrap();
        assert_eq!(removed.owner(), Some(dog));
        assert!(fs.concrete_domains_of(1, STATED).is_empty());

        let removed = fs.remove_by_key(StorageKey(1001)).unwrap();
        assert!(matches!(removed, Removed::Statement { source, .. } if source == dog));

        assert_eq!(fs.remove_by_key(StorageKey(500)), Some(Removed::Concept(dog)));
        assert_eq!(fs.remove_by_key(StorageKey(500)), None);
    }

    #[test]
    fn remove_concept_drops_statement_members() {
        let mut fs = store();
        let dog = ConceptId(3);
        fs.add_statement(dog, STATED, stmt(1, 1001, 55, 2));
        fs.add_concrete_domain(1, STATED, Some(dog), cd(2001, "strength"));
        fs.add_concrete_domain(3, STATED, Some(dog), cd(2002, "weight"));

        assert_eq!(fs.remove_concept(dog), 3);
        assert!(fs.statements_of(dog, STATED).is_empty());
        assert!(fs.locate(StorageKey(2001)).is_none());
        assert!(fs.locate(StorageKey(2002)).is_none());
        assert!(fs.source_of_statement(1).is_none());
    }

    #[test]
    fn clone_is_copy_on_write() {
        let mut base = store();
        base.add_statement(ConceptId(3), STATED, stmt(1, 1001, well_known::IS_A, 2));
        let mut derived = base.clone();
        derived.remove_statement(ConceptId(3), STATED, StorageKey(1001));

        assert_eq!(base.is_a_statements_of(ConceptId(3), STATED).len(), 1);
        assert!(derived.is_a_statements_of(ConceptId(3), STATED).is_empty());
        assert!(!base.content_eq(&derived));
    }

    #[test]
    fn content_eq_ignores_list_order() {
        let mut a = store();
        let mut b = store();
        let dog = ConceptId(3);
        a.add_statement(dog, STATED, stmt(1, 1001, 55, 2));
        a.add_statement(dog, STATED, stmt(2, 1002, 56, 2));
        b.add_statement(dog, STATED, stmt(2, 1002, 56, 2));
        b.add_statement(dog, STATED, stmt(1, 1001, 55, 2));
        assert!(a.content_eq(&b));
    }

    #[test]
    fn concrete_domain_labels() {
        let mut fs = store();
        fs.add_concrete_domain(3, STATED, Some(ConceptId(3)), cd(1, "strength"));
        fs.add_concrete_domain(4, STATED, Some(ConceptId(4)), cd(2, "strength"));
        fs.add_concrete_domain(4, STATED, Some(ConceptId(4)), cd(3, "weight"));
        let labels: Vec<_> = fs.all_concrete_domain_labels(STATED).into_iter().collect();
        assert_eq!(labels, vec!["strength".to_string(), "weight".to_string()]);
        assert_eq!(fs.concrete_domain_count(STATED), 3);
    }
}
