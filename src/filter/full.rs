//! Full-sample isomorphism filter.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::isomorphism::is_isomorphic;
use super::{handle_of, name_of, FilterError, FilterKind, NodeFilter, SampleHandles, SampleNames};
use crate::canonical::shape_fingerprint;
use crate::store::{SampleGroup, SampleRef, SampleStore};
use crate::tree::NodeId;
use crate::types::Sample;

#[derive(Debug, Clone, Copy)]
struct Kept {
    handle: SampleRef,
    fingerprint: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct KeptRecord {
    sample: String,
    statements: usize,
    fingerprint: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SavedState {
    kept: Vec<KeptRecord>,
    comparisons: u64,
    hits: u64,
}

/// Filter that keeps every accepted sample and compares candidates against
/// all kept samples with the same number of statements.
pub struct IsomorphismFilter {
    store: Arc<dyn SampleStore>,
    /// Kept samples by statement count.
    kept: BTreeMap<usize, Vec<Kept>>,
    initialized: bool,
    comparisons: u64,
    hits: u64,
    /// Samples kept since the last commit.
    pending: Vec<(usize, SampleRef)>,
}

impl IsomorphismFilter {
    /// Create a filter keeping its samples in `store`.
    pub fn new(store: Arc<dyn SampleStore>) -> Self {
        Self {
            store,
            kept: BTreeMap::new(),
            initialized: false,
            comparisons: 0,
            hits: 0,
            pending: Vec::new(),
        }
    }

    /// Number of kept samples.
    pub fn len(&self) -> usize {
        self.kept.values().map(Vec::len).sum()
    }

    /// Check if nothing is kept.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn keep(&mut self, sample: &Sample) -> Result<(), FilterError> {
        let handle = self
            .store
            .store(Arc::new(sample.clone()), SampleGroup::Filter)?;
        self.kept.entry(sample.len()).or_default().push(Kept {
            handle,
            fingerprint: shape_fingerprint(sample),
        });
        self.pending.push((sample.len(), handle));
        Ok(())
    }
}

impl std::fmt::Debug for IsomorphismFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IsomorphismFilter")
            .field("kept", &self.len())
            .field("comparisons", &self.comparisons)
            .field("hits", &self.hits)
            .finish()
    }
}

impl NodeFilter for IsomorphismFilter {
    fn kind(&self) -> FilterKind {
        FilterKind::Isomorphism
    }

    fn init(&mut self, root: SampleRef) -> Result<(), FilterError> {
        let sample = self.store.load_required(&root)?;
        self.keep(&sample)?;
        self.commit();
        self.initialized = true;
        Ok(())
    }

    fn is_new_node(&mut self, node: NodeId, sample: &Sample) -> Result<bool, FilterError> {
        if !self.initialized {
            return Err(FilterError::NotInitialized);
        }
        let Some(bucket) = self.kept.get(&sample.len()) else {
            return Ok(true);
        };
        let fingerprint = shape_fingerprint(sample);
        for kept in bucket.iter().filter(|k| k.fingerprint == fingerprint) {
            self.comparisons += 1;
            let other = self.store.load_required(&kept.handle)?;
            if is_isomorphic(sample, &other) {
                self.hits += 1;
                tracing::trace!(node = %node, kept = %kept.handle, "Sample matches kept sample");
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn add_node(&mut self, _node: NodeId, sample: &Sample) -> Result<(), FilterError> {
        if !self.initialized {
            return Err(FilterError::NotInitialized);
        }
        self.keep(sample)
    }

    fn commit(&mut self) {
        self.pending.clear();
    }

    fn roll_back(&mut self) -> Result<(), FilterError> {
        let mut first_error = None;
        for (statements, handle) in std::mem::take(&mut self.pending) {
            if let Some(bucket) = self.kept.get_mut(&statements) {
                bucket.retain(|k| k.handle != handle);
                if bucket.is_empty() {
                    self.kept.remove(&statements);
                }
            }
            if let Err(e) = self.store.remove(&handle) {
                tracing::warn!(handle = %handle, error = %e, "Failed to roll back kept sample");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), |e| Err(e.into()))
    }

    fn log_after_level_finished(&self) {
        tracing::debug!(
            kept = self.len(),
            buckets = self.kept.len(),
            comparisons = self.comparisons,
            hits = self.hits,
            "Isomorphism filter level summary"
        );
    }

    fn save(&self, names: &SampleNames) -> Result<serde_json::Value, FilterError> {
        let mut state = SavedState {
            comparisons: self.comparisons,
            hits: self.hits,
            ..SavedState::default()
        };
        for (statements, bucket) in &self.kept {
            for kept in bucket {
                state.kept.push(KeptRecord {
                    sample: name_of(names, kept.handle)?,
                    statements: *statements,
                    fingerprint: kept.fingerprint,
                });
            }
        }
        Ok(serde_json::to_value(state)?)
    }

    fn load(
        &mut self,
        state: serde_json::Value,
        handles: &SampleHandles,
    ) -> Result<(), FilterError> {
        let state: SavedState = serde_json::from_value(state)?;
        self.kept.clear();
        self.pending.clear();
        for record in state.kept {
            let handle = handle_of(handles, &record.sample)?;
            self.kept.entry(record.statements).or_default().push(Kept {
                handle,
                fingerprint: record.fingerprint,
            });
        }
        self.comparisons = state.comparisons;
        self.hits = state.hits;
        self.initialized = true;
        Ok(())
    }

    fn clean_up(&mut self) -> Result<(), FilterError> {
        for kept in self.kept.values().flatten() {
            self.store.remove(&kept.handle)?;
        }
        self.kept.clear();
        self.pending.clear();
        self.initialized = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemorySampleStore;
    use crate::types::{Statement, Term};

    fn st(s: Term, o: Term) -> Statement {
        Statement::new(s, Term::iri("p"), o)
    }

    fn setup() -> (IsomorphismFilter, Arc<MemorySampleStore>) {
        let store = Arc::new(MemorySampleStore::new());
        let root: Sample = [st(Term::iri("r"), Term::literal("0"))].into_iter().collect();
        let root = store.store(Arc::new(root), SampleGroup::Root).unwrap();
        let mut filter = IsomorphismFilter::new(store.clone());
        filter.init(root).unwrap();
        (filter, store)
    }

    #[test]
    fn test_requires_init() {
        let mut filter = IsomorphismFilter::new(Arc::new(MemorySampleStore::new()));
        assert!(matches!(
            filter.is_new_node(NodeId::from_name("node-1").unwrap(), &Sample::new()),
            Err(FilterError::NotInitialized)
        ));
    }

    #[test]
    fn test_root_copy_is_redundant() {
        let (mut filter, _) = setup();
        let node = NodeId::from_name("node-1").unwrap();
        let copy: Sample = [st(Term::iri("r"), Term::literal("0"))].into_iter().collect();
        assert!(!filter.is_new_node(node, &copy).unwrap());
    }

    #[test]
    fn test_renamed_blank_is_redundant() {
        let (mut filter, store) = setup();
        let node = NodeId::from_name("node-1").unwrap();
        let a: Sample = [st(Term::blank("x"), Term::literal("1"))].into_iter().collect();
        let b: Sample = [st(Term::blank("y"), Term::literal("1"))].into_iter().collect();

        assert!(filter.is_new_node(node, &a).unwrap());
        filter.add_node(node, &a).unwrap();
        assert!(!filter.is_new_node(node, &b).unwrap());
        assert_eq!(filter.len(), 2);
        assert_eq!(
            store
                .handles()
                .iter()
                .filter(|h| h.group() == SampleGroup::Filter)
                .count(),
            2
        );
    }

    #[test]
    fn test_roll_back_forgets_uncommitted_samples() {
        let (mut filter, store) = setup();
        let node = NodeId::from_name("node-1").unwrap();
        let a: Sample = [st(Term::iri("a"), Term::literal("1"))].into_iter().collect();
        let b: Sample = [st(Term::iri("b"), Term::literal("2"))].into_iter().collect();
        filter.add_node(node, &a).unwrap();
        filter.commit();

        filter.add_node(node, &b).unwrap();
        assert!(!filter.is_new_node(node, &b).unwrap());
        filter.roll_back().unwrap();

        assert!(filter.is_new_node(node, &b).unwrap());
        assert!(!filter.is_new_node(node, &a).unwrap());
        assert_eq!(filter.len(), 2);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_save_load_keeps_index() {
        let (mut filter, store) = setup();
        let node = NodeId::from_name("node-1").unwrap();
        let a: Sample = [st(Term::iri("a"), Term::literal("1"))].into_iter().collect();
        filter.add_node(node, &a).unwrap();

        let names: SampleNames = store
            .handles()
            .into_iter()
            .map(|h| (h, format!("{}-{}.jsonl", h.group(), h.id())))
            .collect();
        let state = filter.save(&names).unwrap();
        let handles: SampleHandles = names.into_iter().map(|(h, n)| (n, h)).collect();

        let mut restored = IsomorphismFilter::new(store.clone());
        restored.load(state, &handles).unwrap();
        assert_eq!(restored.len(), 2);
        assert!(!restored.is_new_node(node, &a).unwrap());
    }

    #[test]
    fn test_clean_up_removes_kept_samples() {
        let (mut filter, store) = setup();
        filter.clean_up().unwrap();
        assert!(filter.is_empty());
        assert!(store
            .handles()
            .iter()
            .all(|h| h.group() != SampleGroup::Filter));
    }
}
