//! Hierarchical sample store: a fast primary tier over a slower secondary.
//!
//! ## Rules
//!
//! - While `use_primary` is set, new samples go to the primary; a primary
//!   that reports [`StoreError::CapacityExceeded`] overflows into the
//!   secondary.
//! - `load` prefers the primary and falls back to the secondary.
//! - Entries only ever move primary → secondary: on [`optimize`] passes, and
//!   when a handle's reference count drops to zero. Nothing is promoted back.
//!
//! [`optimize`]: HierarchicalSampleStore::optimize

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::types::Sample;
use super::{ReferenceCounts, SampleGroup, SampleRef, SampleStore, StoreError};

/// Two-tier sample store.
pub struct HierarchicalSampleStore {
    primary: Arc<dyn SampleStore>,
    secondary: Arc<dyn SampleStore>,
    use_primary: AtomicBool,
    next_id: AtomicU64,
    refs: ReferenceCounts,
}

impl HierarchicalSampleStore {
    /// Create a store over `primary` (fast) and `secondary` (fallback).
    pub fn new(primary: Arc<dyn SampleStore>, secondary: Arc<dyn SampleStore>) -> Self {
        Self {
            primary,
            secondary,
            use_primary: AtomicBool::new(true),
            next_id: AtomicU64::new(0),
            refs: ReferenceCounts::new(),
        }
    }

    /// The primary tier.
    pub fn primary(&self) -> &Arc<dyn SampleStore> {
        &self.primary
    }

    /// The secondary tier.
    pub fn secondary(&self) -> &Arc<dyn SampleStore> {
        &self.secondary
    }

    /// Whether new samples are stored in the primary tier.
    pub fn uses_primary(&self) -> bool {
        self.use_primary.load(Ordering::Relaxed)
    }

    /// Route new samples to the primary (`true`) or straight to the secondary.
    pub fn set_use_primary(&self, value: bool) {
        self.use_primary.store(value, Ordering::Relaxed);
    }

    /// Move every primary entry rejected by `keep` into the secondary tier.
    ///
    /// Returns the number of entries moved.
    pub fn optimize(&self, keep: &dyn Fn(SampleGroup, &Sample) -> bool) -> Result<usize, StoreError> {
        let mut moved = 0usize;
        let mut moved_bytes = 0usize;
        for (handle, sample) in self.primary.entries()? {
            if keep(handle.group(), &sample) {
                continue;
            }
            moved_bytes += sample.estimated_bytes();
            self.secondary.store_at(sample, handle)?;
            self.primary.remove(&handle)?;
            moved += 1;
        }
        tracing::info!(
            moved,
            moved_bytes,
            primary_entries = self.primary.len(),
            primary_bytes = self.primary.stored_bytes(),
            "Optimized hierarchical sample store"
        );
        Ok(moved)
    }

    fn demote(&self, handle: &SampleRef) -> Result<(), StoreError> {
        if let Some(sample) = self.primary.load(handle)? {
            self.secondary.store_at(sample, *handle)?;
            self.primary.remove(handle)?;
            tracing::trace!(handle = %handle, "Demoted sample to secondary tier");
        }
        Ok(())
    }

    fn place(&self, sample: Arc<Sample>, handle: SampleRef) -> Result<(), StoreError> {
        if self.uses_primary() {
            match self.primary.store_at(Arc::clone(&sample), handle) {
                Ok(()) => return Ok(()),
                Err(e) if e.is_resource_exhaustion() => {
                    tracing::debug!(handle = %handle, error = %e, "Primary tier full, overflowing");
                }
                Err(e) => return Err(e),
            }
        }
        self.secondary.store_at(sample, handle)
    }
}

impl std::fmt::Debug for HierarchicalSampleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HierarchicalSampleStore")
            .field("primary_entries", &self.primary.len())
            .field("secondary_entries", &self.secondary.len())
            .field("use_primary", &self.uses_primary())
            .finish()
    }
}

impl SampleStore for HierarchicalSampleStore {
    fn store(&self, sample: Arc<Sample>, group: SampleGroup) -> Result<SampleRef, StoreError> {
        let handle = SampleRef::new(self.next_id.fetch_add(1, Ordering::Relaxed), group);
        self.place(sample, handle)?;
        self.refs.register(handle);
        Ok(handle)
    }

    fn store_at(&self, sample: Arc<Sample>, handle: SampleRef) -> Result<(), StoreError> {
        self.place(sample, handle)?;
        self.next_id.fetch_max(handle.id() + 1, Ordering::Relaxed);
        Ok(())
    }

    fn load(&self, handle: &SampleRef) -> Result<Option<Arc<Sample>>, StoreError> {
        match self.primary.load(handle)? {
            Some(sample) => Ok(Some(sample)),
            None => self.secondary.load(handle),
        }
    }

    fn contains(&self, handle: &SampleRef) -> bool {
        self.primary.contains(handle) || self.secondary.contains(handle)
    }

    fn remove(&self, handle: &SampleRef) -> Result<(), StoreError> {
        self.refs.forget(handle);
        self.primary.remove(handle)?;
        self.secondary.remove(handle)
    }

    fn remove_all(&self) -> Result<(), StoreError> {
        self.refs.clear();
        self.primary.remove_all()?;
        self.secondary.remove_all()
    }

    fn handles(&self) -> Vec<SampleRef> {
        let mut handles: BTreeSet<SampleRef> = self.primary.handles().into_iter().collect();
        handles.extend(self.secondary.handles());
        handles.into_iter().collect()
    }

    fn add_reference_user(&self, handle: &SampleRef) -> Result<usize, StoreError> {
        if !self.contains(handle) {
            return Err(StoreError::NotFound(*handle));
        }
        Ok(self.refs.acquire(*handle))
    }

    fn release_from_memory(&self, handle: &SampleRef) -> Result<usize, StoreError> {
        let remaining = self.refs.release(*handle)?;
        if remaining == 0 && self.primary.contains(handle) {
            self.demote(handle)?;
        }
        Ok(remaining)
    }

    fn reference_count(&self, handle: &SampleRef) -> usize {
        self.refs.get(handle)
    }

    fn stored_bytes(&self) -> usize {
        self.primary.stored_bytes() + self.secondary.stored_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FileSampleStore, MemorySampleStore};
    use crate::types::{Statement, Term};
    use tempfile::TempDir;

    fn make_sample(tag: &str, n: usize) -> Arc<Sample> {
        Arc::new(
            (0..n)
                .map(|i| {
                    Statement::new(Term::iri(tag), Term::iri("p"), Term::literal(i.to_string()))
                })
                .collect(),
        )
    }

    fn make_store(dir: &TempDir) -> (HierarchicalSampleStore, Arc<MemorySampleStore>) {
        let primary = Arc::new(MemorySampleStore::new());
        let secondary = Arc::new(FileSampleStore::with_cache_entries(dir.path(), 0).unwrap());
        (
            HierarchicalSampleStore::new(Arc::clone(&primary) as Arc<dyn SampleStore>, secondary),
            primary,
        )
    }

    #[test]
    fn test_optimize_moves_rejected_group() {
        let dir = TempDir::new().unwrap();
        let (store, primary) = make_store(&dir);

        let root = store.store(make_sample("root", 3), SampleGroup::Root).unwrap();
        let filter = store.store(make_sample("filter", 1), SampleGroup::Filter).unwrap();
        let nodes: Vec<_> = (0..3)
            .map(|i| store.store(make_sample(&format!("n{i}"), 2), SampleGroup::Node).unwrap())
            .collect();

        let moved = store.optimize(&|group, _| group != SampleGroup::Node).unwrap();
        assert_eq!(moved, 3);

        for node in &nodes {
            assert!(primary.load(node).unwrap().is_none());
            assert!(store.load(node).unwrap().is_some());
        }
        assert!(primary.contains(&root));
        assert!(primary.contains(&filter));
        assert_eq!(store.len(), 5);
    }

    #[test]
    fn test_capacity_overflow_goes_to_secondary() {
        let dir = TempDir::new().unwrap();
        let small = make_sample("a", 2);
        let primary = Arc::new(MemorySampleStore::with_capacity(small.estimated_bytes()));
        let secondary = Arc::new(FileSampleStore::new(dir.path()).unwrap());
        let store = HierarchicalSampleStore::new(primary.clone(), secondary.clone());

        let a = store.store(small, SampleGroup::Root).unwrap();
        let b = store.store(make_sample("b", 5), SampleGroup::Node).unwrap();

        assert!(primary.contains(&a));
        assert!(secondary.contains(&b));
        assert!(store.load(&b).unwrap().is_some());
    }

    #[test]
    fn test_release_to_zero_demotes() {
        let dir = TempDir::new().unwrap();
        let (store, primary) = make_store(&dir);
        let h = store.store(make_sample("x", 2), SampleGroup::Node).unwrap();

        assert_eq!(store.add_reference_user(&h).unwrap(), 2);
        store.release_from_memory(&h).unwrap();
        assert!(primary.contains(&h));

        assert_eq!(store.release_from_memory(&h).unwrap(), 0);
        assert!(!primary.contains(&h));
        assert!(store.load(&h).unwrap().is_some());
        assert!(store.release_from_memory(&h).is_err());
        assert_eq!(store.reference_count(&h), 0);
    }

    #[test]
    fn test_demoted_sample_not_cached_in_secondary() {
        let dir = TempDir::new().unwrap();
        let primary = Arc::new(MemorySampleStore::new());
        let secondary = Arc::new(FileSampleStore::with_cache_entries(dir.path(), 4).unwrap());
        let store = HierarchicalSampleStore::new(primary.clone(), secondary.clone());

        let h = store.store(make_sample("x", 3), SampleGroup::Node).unwrap();
        assert_eq!(store.release_from_memory(&h).unwrap(), 0);

        assert!(secondary.contains(&h));
        assert_eq!(secondary.stored_bytes(), 0);
        assert_eq!(store.stored_bytes(), 0);

        store.store(make_sample("y", 2), SampleGroup::Node).unwrap();
        store.optimize(&|_, _| false).unwrap();
        assert_eq!(secondary.stored_bytes(), 0);
    }

    #[test]
    fn test_secondary_only_after_switch() {
        let dir = TempDir::new().unwrap();
        let (store, primary) = make_store(&dir);

        store.set_use_primary(false);
        let h = store.store(make_sample("late", 1), SampleGroup::Node).unwrap();

        assert!(!primary.contains(&h));
        assert!(store.secondary().contains(&h));
        assert!(store.load(&h).unwrap().is_some());
    }

    #[test]
    fn test_remove_all_clears_both_tiers() {
        let dir = TempDir::new().unwrap();
        let (store, _primary) = make_store(&dir);
        store.store(make_sample("a", 1), SampleGroup::Node).unwrap();
        store.store(make_sample("b", 1), SampleGroup::Node).unwrap();
        store.optimize(&|_, _| false).unwrap();
        store.store(make_sample("c", 1), SampleGroup::Root).unwrap();

        store.remove_all().unwrap();
        assert!(store.is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
