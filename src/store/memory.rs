//! In-memory sample store.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::types::Sample;
use super::{ReferenceCounts, SampleGroup, SampleRef, SampleStore, StoreError};

/// In-memory sample store.
///
/// Uses a BTreeMap for deterministic iteration order. Tracks the aggregate
/// size of stored samples; with a capacity set, a store that would exceed
/// it fails with [`StoreError::CapacityExceeded`].
#[derive(Debug, Default)]
pub struct MemorySampleStore {
    /// Samples by handle.
    entries: RwLock<BTreeMap<SampleRef, Arc<Sample>>>,
    /// Next handle id.
    next_id: AtomicU64,
    /// Aggregate estimated bytes of stored samples.
    stored_bytes: AtomicUsize,
    /// Optional byte capacity.
    capacity: Option<usize>,
    /// Reference users per handle.
    refs: ReferenceCounts,
}

impl MemorySampleStore {
    /// Create a new unbounded store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that refuses samples beyond `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::default()
        }
    }

    /// Configured capacity in bytes.
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    fn check_capacity(&self, requested: usize) -> Result<(), StoreError> {
        if let Some(capacity) = self.capacity {
            let stored = self.stored_bytes.load(Ordering::Relaxed);
            if stored + requested > capacity {
                return Err(StoreError::CapacityExceeded {
                    requested,
                    stored,
                    capacity,
                });
            }
        }
        Ok(())
    }

    fn insert(&self, handle: SampleRef, sample: Arc<Sample>) -> Result<(), StoreError> {
        let bytes = sample.estimated_bytes();
        let mut entries = self.entries.write();
        let replaced = entries.get(&handle).map_or(0, |s| s.estimated_bytes());
        self.check_capacity(bytes.saturating_sub(replaced))?;
        entries.insert(handle, sample);
        self.stored_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.stored_bytes.fetch_sub(replaced, Ordering::Relaxed);
        Ok(())
    }
}

impl SampleStore for MemorySampleStore {
    fn store(&self, sample: Arc<Sample>, group: SampleGroup) -> Result<SampleRef, StoreError> {
        let handle = SampleRef::new(self.next_id.fetch_add(1, Ordering::Relaxed), group);
        self.insert(handle, sample)?;
        self.refs.register(handle);
        Ok(handle)
    }

    fn store_at(&self, sample: Arc<Sample>, handle: SampleRef) -> Result<(), StoreError> {
        self.insert(handle, sample)?;
        self.next_id.fetch_max(handle.id() + 1, Ordering::Relaxed);
        Ok(())
    }

    fn load(&self, handle: &SampleRef) -> Result<Option<Arc<Sample>>, StoreError> {
        Ok(self.entries.read().get(handle).cloned())
    }

    fn contains(&self, handle: &SampleRef) -> bool {
        self.entries.read().contains_key(handle)
    }

    fn remove(&self, handle: &SampleRef) -> Result<(), StoreError> {
        if let Some(sample) = self.entries.write().remove(handle) {
            self.stored_bytes
                .fetch_sub(sample.estimated_bytes(), Ordering::Relaxed);
        }
        self.refs.forget(handle);
        Ok(())
    }

    fn remove_all(&self) -> Result<(), StoreError> {
        self.entries.write().clear();
        self.stored_bytes.store(0, Ordering::Relaxed);
        self.refs.clear();
        Ok(())
    }

    fn handles(&self) -> Vec<SampleRef> {
        self.entries.read().keys().copied().collect()
    }

    fn entries(&self) -> Result<Vec<(SampleRef, Arc<Sample>)>, StoreError> {
        Ok(self
            .entries
            .read()
            .iter()
            .map(|(h, s)| (*h, Arc::clone(s)))
            .collect())
    }

    fn add_reference_user(&self, handle: &SampleRef) -> Result<usize, StoreError> {
        if !self.contains(handle) {
            return Err(StoreError::NotFound(*handle));
        }
        Ok(self.refs.acquire(*handle))
    }

    fn release_from_memory(&self, handle: &SampleRef) -> Result<usize, StoreError> {
        // Nothing slower to fall back on: zero only marks the entry eligible.
        self.refs.release(*handle)
    }

    fn reference_count(&self, handle: &SampleRef) -> usize {
        self.refs.get(handle)
    }

    fn stored_bytes(&self) -> usize {
        self.stored_bytes.load(Ordering::Relaxed)
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }
}
