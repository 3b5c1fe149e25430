//! Delta-based isomorphism filter.
//!
//! Pipelines mostly add or drop a handful of statements, so comparing whole
//! samples wastes time on the part every node shares with the root. This
//! filter keeps only the delta of each accepted sample against the root:
//!
//! - `added`: statements in the sample but not in the root
//! - `removed`: statements in the root but not in the sample
//! - `size = |added| + |removed|`
//!
//! Deltas are bucketed by size. A candidate is compared only against kept
//! deltas of the same size, and two deltas match when their `added` sets
//! have equal size and are isomorphic and their `removed` sets are
//! isomorphic.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::isomorphism::is_isomorphic;
use super::{handle_of, name_of, FilterError, FilterKind, NodeFilter, SampleHandles, SampleNames};
use crate::canonical::shape_fingerprint;
use crate::store::{SampleGroup, SampleRef, SampleStore};
use crate::tree::NodeId;
use crate::types::Sample;

/// Difference between a sample and the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta {
    /// Statements present only in the sample.
    pub added: Sample,
    /// Statements present only in the root.
    pub removed: Sample,
}

impl Delta {
    /// Compute the delta of `sample` against `root`.
    pub fn between(root: &Sample, sample: &Sample) -> Self {
        Self {
            added: sample.difference(root),
            removed: root.difference(sample),
        }
    }

    /// Bucket key.
    pub fn size(&self) -> usize {
        self.added.len() + self.removed.len()
    }

    /// Whether two deltas describe equivalent samples.
    pub fn matches(&self, other: &Delta) -> bool {
        self.added.len() == other.added.len()
            && is_isomorphic(&self.added, &other.added)
            && is_isomorphic(&self.removed, &other.removed)
    }
}

#[derive(Debug, Clone, Copy)]
struct StoredDelta {
    added: SampleRef,
    removed: SampleRef,
    added_len: usize,
    fingerprint: (u64, u64),
}

/// Per-size bucket of kept deltas with comparison counters.
#[derive(Debug, Default)]
struct Bucket {
    deltas: Vec<StoredDelta>,
    /// Candidates compared against this bucket.
    usage: u64,
    /// Matches found.
    hits: u64,
    /// Cumulative comparison time.
    elapsed: Duration,
}

/// Counters of one delta bucket, as reported after each level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketStats {
    /// Delta size shared by the bucket's entries.
    pub size: usize,
    /// Kept deltas.
    pub entries: usize,
    /// Candidates compared.
    pub usage: u64,
    /// Matches found.
    pub hits: u64,
    /// Cumulative comparison time in microseconds.
    pub elapsed_us: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct DeltaRecord {
    added: String,
    removed: String,
    added_len: usize,
    fingerprint: (u64, u64),
}

#[derive(Debug, Serialize, Deserialize)]
struct BucketRecord {
    size: usize,
    usage: u64,
    hits: u64,
    elapsed_us: u64,
    deltas: Vec<DeltaRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SavedState {
    root: String,
    buckets: Vec<BucketRecord>,
}

/// Filter comparing deltas against the root sample.
///
/// Holds one reference on the root handle from `init` until `clean_up`.
pub struct DiffFilter {
    store: Arc<dyn SampleStore>,
    root: Option<(SampleRef, Arc<Sample>)>,
    buckets: BTreeMap<usize, Bucket>,
    /// Deltas kept since the last commit, with their bucket size.
    pending: Vec<(usize, StoredDelta)>,
}

impl DiffFilter {
    /// Create a filter keeping its deltas in `store`.
    pub fn new(store: Arc<dyn SampleStore>) -> Self {
        Self {
            store,
            root: None,
            buckets: BTreeMap::new(),
            pending: Vec::new(),
        }
    }

    /// Number of kept deltas.
    pub fn len(&self) -> usize {
        self.buckets.values().map(|b| b.deltas.len()).sum()
    }

    /// Check if nothing is kept.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Per-bucket counters in size order.
    pub fn bucket_stats(&self) -> Vec<BucketStats> {
        self.buckets
            .iter()
            .map(|(size, bucket)| BucketStats {
                size: *size,
                entries: bucket.deltas.len(),
                usage: bucket.usage,
                hits: bucket.hits,
                elapsed_us: bucket.elapsed.as_micros() as u64,
            })
            .collect()
    }

    fn delta(&self, sample: &Sample) -> Result<Delta, FilterError> {
        let (_, root) = self.root.as_ref().ok_or(FilterError::NotInitialized)?;
        Ok(Delta::between(root, sample))
    }

    fn load_delta(&self, stored: &StoredDelta) -> Result<Delta, FilterError> {
        Ok(Delta {
            added: self.store.load_required(&stored.added)?.as_ref().clone(),
            removed: self.store.load_required(&stored.removed)?.as_ref().clone(),
        })
    }

    fn keep(&mut self, delta: Delta) -> Result<(), FilterError> {
        let size = delta.size();
        let added_len = delta.added.len();
        let fingerprint = (
            shape_fingerprint(&delta.added),
            shape_fingerprint(&delta.removed),
        );
        let added = self.store.store(Arc::new(delta.added), SampleGroup::Filter)?;
        let removed = match self.store.store(Arc::new(delta.removed), SampleGroup::Filter) {
            Ok(handle) => handle,
            Err(e) => {
                if let Err(cleanup) = self.store.remove(&added) {
                    tracing::warn!(handle = %added, error = %cleanup, "Failed to drop half-kept delta");
                }
                return Err(e.into());
            }
        };
        let stored = StoredDelta {
            added,
            removed,
            added_len,
            fingerprint,
        };
        self.buckets.entry(size).or_default().deltas.push(stored);
        self.pending.push((size, stored));
        Ok(())
    }

    fn forget(&mut self, size: usize, stored: &StoredDelta) -> Result<(), FilterError> {
        if let Some(bucket) = self.buckets.get_mut(&size) {
            bucket.deltas.retain(|d| d.added != stored.added);
            if bucket.deltas.is_empty() {
                self.buckets.remove(&size);
            }
        }
        let added = self.store.remove(&stored.added);
        let removed = self.store.remove(&stored.removed);
        added.and(removed)?;
        Ok(())
    }
}

impl std::fmt::Debug for DiffFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiffFilter")
            .field("initialized", &self.root.is_some())
            .field("deltas", &self.len())
            .field("buckets", &self.buckets.len())
            .finish()
    }
}

impl NodeFilter for DiffFilter {
    fn kind(&self) -> FilterKind {
        FilterKind::Diff
    }

    fn init(&mut self, root: SampleRef) -> Result<(), FilterError> {
        let sample = self.store.load_required(&root)?;
        self.store.add_reference_user(&root)?;
        self.root = Some((root, sample));
        self.keep(Delta {
            added: Sample::new(),
            removed: Sample::new(),
        })?;
        self.commit();
        Ok(())
    }

    fn is_new_node(&mut self, node: NodeId, sample: &Sample) -> Result<bool, FilterError> {
        let delta = self.delta(sample)?;
        let size = delta.size();
        let candidates = match self.buckets.get(&size) {
            Some(bucket) => bucket.deltas.clone(),
            None => return Ok(true),
        };
        let fingerprint = (
            shape_fingerprint(&delta.added),
            shape_fingerprint(&delta.removed),
        );

        let started = Instant::now();
        let mut found = false;
        for stored in candidates
            .iter()
            .filter(|s| s.added_len == delta.added.len() && s.fingerprint == fingerprint)
        {
            if delta.matches(&self.load_delta(stored)?) {
                tracing::trace!(node = %node, size, "Delta matches kept delta");
                found = true;
                break;
            }
        }

        if let Some(bucket) = self.buckets.get_mut(&size) {
            bucket.usage += 1;
            bucket.elapsed += started.elapsed();
            if found {
                bucket.hits += 1;
            }
        }
        Ok(!found)
    }

    fn add_node(&mut self, _node: NodeId, sample: &Sample) -> Result<(), FilterError> {
        let delta = self.delta(sample)?;
        self.keep(delta)
    }

    fn commit(&mut self) {
        self.pending.clear();
    }

    fn roll_back(&mut self) -> Result<(), FilterError> {
        let mut first_error = None;
        for (size, stored) in std::mem::take(&mut self.pending).into_iter().rev() {
            if let Err(e) = self.forget(size, &stored) {
                tracing::warn!(size, error = %e, "Failed to roll back kept delta");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn log_after_level_finished(&self) {
        for stats in self.bucket_stats() {
            tracing::debug!(
                size = stats.size,
                entries = stats.entries,
                usage = stats.usage,
                hits = stats.hits,
                elapsed_us = stats.elapsed_us,
                "Diff filter bucket"
            );
        }
        tracing::debug!(deltas = self.len(), buckets = self.buckets.len(), "Diff filter level summary");
    }

    fn save(&self, names: &SampleNames) -> Result<serde_json::Value, FilterError> {
        let (root, _) = self.root.as_ref().ok_or(FilterError::NotInitialized)?;
        let mut buckets = Vec::with_capacity(self.buckets.len());
        for (size, bucket) in &self.buckets {
            let mut deltas = Vec::with_capacity(bucket.deltas.len());
            for stored in &bucket.deltas {
                deltas.push(DeltaRecord {
                    added: name_of(names, stored.added)?,
                    removed: name_of(names, stored.removed)?,
                    added_len: stored.added_len,
                    fingerprint: stored.fingerprint,
                });
            }
            buckets.push(BucketRecord {
                size: *size,
                usage: bucket.usage,
                hits: bucket.hits,
                elapsed_us: bucket.elapsed.as_micros() as u64,
                deltas,
            });
        }
        let state = SavedState {
            root: name_of(names, *root)?,
            buckets,
        };
        Ok(serde_json::to_value(state)?)
    }

    fn load(
        &mut self,
        state: serde_json::Value,
        handles: &SampleHandles,
    ) -> Result<(), FilterError> {
        let state: SavedState = serde_json::from_value(state)?;
        let root = handle_of(handles, &state.root)?;
        let sample = self.store.load_required(&root)?;
        self.store.add_reference_user(&root)?;
        self.root = Some((root, sample));
        self.buckets.clear();
        self.pending.clear();
        for record in state.buckets {
            let mut bucket = Bucket {
                usage: record.usage,
                hits: record.hits,
                elapsed: Duration::from_micros(record.elapsed_us),
                ..Bucket::default()
            };
            for delta in record.deltas {
                bucket.deltas.push(StoredDelta {
                    added: handle_of(handles, &delta.added)?,
                    removed: handle_of(handles, &delta.removed)?,
                    added_len: delta.added_len,
                    fingerprint: delta.fingerprint,
                });
            }
            self.buckets.insert(record.size, bucket);
        }
        Ok(())
    }

    fn clean_up(&mut self) -> Result<(), FilterError> {
        for stored in self.buckets.values().flat_map(|b| b.deltas.iter()) {
            self.store.remove(&stored.added)?;
            self.store.remove(&stored.removed)?;
        }
        self.buckets.clear();
        self.pending.clear();
        if let Some((root, _)) = self.root.take() {
            if self.store.contains(&root) {
                self.store.release_from_memory(&root)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemorySampleStore;
    use crate::types::{Statement, Term};

    fn st(s: Term, p: &str, o: Term) -> Statement {
        Statement::new(s, Term::iri(p), o)
    }

    fn root_sample() -> Sample {
        [
            st(Term::iri("ds"), "title", Term::literal("data")),
            st(Term::iri("ds"), "rows", Term::literal("3")),
        ]
        .into_iter()
        .collect()
    }

    fn with(extra: Vec<Statement>) -> Sample {
        let mut s = root_sample();
        s.extend(extra);
        s
    }

    fn node() -> NodeId {
        NodeId::from_name("node-1").unwrap()
    }

    fn setup() -> (DiffFilter, Arc<MemorySampleStore>) {
        let store = Arc::new(MemorySampleStore::new());
        let root = store
            .store(Arc::new(root_sample()), SampleGroup::Root)
            .unwrap();
        let mut filter = DiffFilter::new(store.clone());
        filter.init(root).unwrap();
        (filter, store)
    }

    #[test]
    fn test_delta_between() {
        let mut sample = with(vec![st(Term::iri("ds"), "format", Term::literal("csv"))]);
        sample.remove(&st(Term::iri("ds"), "rows", Term::literal("3")));

        let delta = Delta::between(&root_sample(), &sample);
        assert_eq!(delta.added.len(), 1);
        assert_eq!(delta.removed.len(), 1);
        assert_eq!(delta.size(), 2);
    }

    #[test]
    fn test_root_is_redundant() {
        let (mut filter, _) = setup();
        assert!(!filter.is_new_node(node(), &root_sample()).unwrap());
    }

    #[test]
    fn test_reflexive_and_symmetric() {
        let a = with(vec![st(Term::blank("x"), "label", Term::literal("l"))]);
        let b = with(vec![st(Term::blank("y"), "label", Term::literal("l"))]);

        let (mut fa, _) = setup();
        assert!(fa.is_new_node(node(), &a).unwrap());
        fa.add_node(node(), &a).unwrap();
        assert!(!fa.is_new_node(node(), &a).unwrap());
        assert!(!fa.is_new_node(node(), &b).unwrap());

        let (mut fb, _) = setup();
        fb.add_node(node(), &b).unwrap();
        assert!(!fb.is_new_node(node(), &a).unwrap());
    }

    #[test]
    fn test_different_additions_are_new() {
        let (mut filter, _) = setup();
        let a = with(vec![st(Term::iri("ds"), "format", Term::literal("csv"))]);
        let b = with(vec![st(Term::iri("ds"), "format", Term::literal("tsv"))]);

        filter.add_node(node(), &a).unwrap();
        assert!(filter.is_new_node(node(), &b).unwrap());
    }

    #[test]
    fn test_bucket_counters() {
        let (mut filter, _) = setup();
        let a = with(vec![st(Term::iri("ds"), "format", Term::literal("csv"))]);
        filter.add_node(node(), &a).unwrap();
        filter.is_new_node(node(), &a).unwrap();
        filter.is_new_node(node(), &with(vec![st(Term::iri("x"), "y", Term::iri("z"))]))
            .unwrap();

        let stats = filter.bucket_stats();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].size, 0);
        assert_eq!(stats[1].size, 1);
        assert_eq!(stats[1].entries, 1);
        assert_eq!(stats[1].usage, 2);
        assert_eq!(stats[1].hits, 1);
        filter.log_after_level_finished();
    }

    #[test]
    fn test_save_load_round_trip() {
        let (mut filter, store) = setup();
        let a = with(vec![st(Term::iri("ds"), "format", Term::literal("csv"))]);
        filter.add_node(node(), &a).unwrap();

        let names: SampleNames = store
            .handles()
            .into_iter()
            .map(|h| (h, format!("{}-{}.jsonl", h.group(), h.id())))
            .collect();
        let state = filter.save(&names).unwrap();
        let handles: SampleHandles = names.into_iter().map(|(h, n)| (n, h)).collect();

        let mut restored = DiffFilter::new(store.clone());
        restored.load(state, &handles).unwrap();
        assert_eq!(restored.len(), filter.len());
        assert!(!restored.is_new_node(node(), &a).unwrap());
    }

    #[test]
    fn test_roll_back_forgets_uncommitted_deltas() {
        let (mut filter, store) = setup();
        let a = with(vec![st(Term::iri("ds"), "format", Term::literal("csv"))]);
        let b = with(vec![st(Term::iri("ds"), "format", Term::literal("tsv"))]);
        filter.add_node(node(), &a).unwrap();
        filter.commit();
        let before = store.handles();

        filter.add_node(node(), &b).unwrap();
        assert!(!filter.is_new_node(node(), &b).unwrap());
        filter.roll_back().unwrap();

        assert!(filter.is_new_node(node(), &b).unwrap());
        assert!(!filter.is_new_node(node(), &a).unwrap());
        assert_eq!(store.handles(), before);
        assert_eq!(filter.len(), 2);

        // Nothing pending after a roll back.
        filter.roll_back().unwrap();
        assert_eq!(filter.len(), 2);
    }

    #[test]
    fn test_roll_back_drops_emptied_bucket() {
        let (mut filter, store) = setup();
        let a = with(vec![st(Term::iri("ds"), "format", Term::literal("csv"))]);
        filter.add_node(node(), &a).unwrap();
        assert_eq!(filter.bucket_stats().len(), 2);

        filter.roll_back().unwrap();
        assert_eq!(filter.bucket_stats().len(), 1);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_failed_keep_releases_added_half() {
        let mut sample = with(vec![st(Term::iri("ds"), "format", Term::literal("csv"))]);
        sample.remove(&st(Term::iri("ds"), "rows", Term::literal("3")));
        let delta = Delta::between(&root_sample(), &sample);

        // Room for the root and the added half only.
        let capacity = root_sample().estimated_bytes() + delta.added.estimated_bytes();
        let store = Arc::new(MemorySampleStore::with_capacity(capacity));
        let root = store.store(Arc::new(root_sample()), SampleGroup::Root).unwrap();
        let mut filter = DiffFilter::new(store.clone());
        filter.init(root).unwrap();
        let handles = store.handles();

        let err = filter.add_node(node(), &sample).unwrap_err();
        assert!(matches!(&err, FilterError::Store(e) if e.is_resource_exhaustion()));
        assert_eq!(store.handles(), handles);
        assert_eq!(store.stored_bytes(), root_sample().estimated_bytes());
        assert_eq!(filter.len(), 1);
        assert!(filter.is_new_node(node(), &sample).unwrap());
    }

    #[test]
    fn test_load_rejects_unknown_sample() {
        let (filter, store) = setup();
        let names: SampleNames = store
            .handles()
            .into_iter()
            .map(|h| (h, h.to_string()))
            .collect();
        let state = filter.save(&names).unwrap();

        let mut restored = DiffFilter::new(store.clone());
        assert!(matches!(
            restored.load(state, &SampleHandles::new()),
            Err(FilterError::UnknownSample(_))
        ));
    }
}
