//! Sample storage backends.
//!
//! Samples are addressed by opaque [`SampleRef`] handles. Every handle
//! belongs to a [`SampleGroup`] that tells tiered stores what to keep in
//! memory under pressure: `Root` longest, then `Filter`, `Node` first out.
//!
//! Stores use interior mutability so that one instance can be shared
//! (`Arc`) between the runner, the node filter and the resource strategy.
//! The kernel is single-threaded; the locks only make sharing sound.

pub mod memory;
pub mod file;
pub mod hierarchical;
pub mod refcount;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::types::Sample;

/// Storage priority class of a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleGroup {
    /// The original dataset sample. Kept resident longest.
    Root,
    /// Filter-internal index payloads. Small and hot.
    Filter,
    /// Per-node data samples. Evicted first.
    Node,
}

impl SampleGroup {
    /// Parse a group from its lowercase name.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "root" => Some(Self::Root),
            "filter" => Some(Self::Filter),
            "node" => Some(Self::Node),
            _ => None,
        }
    }

    /// Lowercase name, used in checkpoint file names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::Filter => "filter",
            Self::Node => "node",
        }
    }
}

impl fmt::Display for SampleGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque handle to a stored sample.
///
/// Ordering is by allocation id, so iteration over handles follows
/// allocation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SampleRef {
    id: u64,
    group: SampleGroup,
}

impl SampleRef {
    /// Create a handle. Stores allocate ids; callers only need this when
    /// transferring entries between tiers.
    pub fn new(id: u64, group: SampleGroup) -> Self {
        Self { id, group }
    }

    /// Allocation id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Storage group.
    pub fn group(&self) -> SampleGroup {
        self.group
    }
}

impl fmt::Display for SampleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.group, self.id)
    }
}

/// Error type for sample store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The handle is unknown to this store.
    #[error("Sample not found: {0}")]
    NotFound(SampleRef),
    /// Storing the sample would exceed the tier's byte capacity.
    #[error("Capacity exceeded: storing {requested} bytes with {stored} of {capacity} in use")]
    CapacityExceeded {
        /// Bytes the new sample needs.
        requested: usize,
        /// Bytes already stored.
        stored: usize,
        /// Configured capacity.
        capacity: usize,
    },
    /// A release was attempted on a handle with no live users.
    #[error("Reference count underflow for {0}")]
    ReferenceUnderflow(SampleRef),
    /// I/O error in a file-backed tier.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether this error signals memory exhaustion.
    pub fn is_resource_exhaustion(&self) -> bool {
        matches!(self, Self::CapacityExceeded { .. })
    }
}

/// Trait for sample storage tiers.
///
/// Implementations must iterate entries in handle order.
pub trait SampleStore: Send + Sync {
    /// Store a sample under a freshly allocated handle with one reference user.
    fn store(&self, sample: Arc<Sample>, group: SampleGroup) -> Result<SampleRef, StoreError>;

    /// Store a sample under an existing handle (tier transfers, resume).
    fn store_at(&self, sample: Arc<Sample>, handle: SampleRef) -> Result<(), StoreError>;

    /// Load a sample. `Ok(None)` if this store does not hold the handle.
    fn load(&self, handle: &SampleRef) -> Result<Option<Arc<Sample>>, StoreError>;

    /// Whether this store holds the handle.
    fn contains(&self, handle: &SampleRef) -> bool;

    /// Remove one entry. Removing an unknown handle is a no-op.
    fn remove(&self, handle: &SampleRef) -> Result<(), StoreError>;

    /// Remove every entry this store holds.
    fn remove_all(&self) -> Result<(), StoreError>;

    /// Handles held, in handle order.
    fn handles(&self) -> Vec<SampleRef>;

    /// All entries in handle order.
    fn entries(&self) -> Result<Vec<(SampleRef, Arc<Sample>)>, StoreError> {
        let handles = self.handles();
        let mut entries = Vec::with_capacity(handles.len());
        for handle in handles {
            let sample = self.load_required(&handle)?;
            entries.push((handle, sample));
        }
        Ok(entries)
    }

    /// Register one more consumer that needs the sample resident.
    fn add_reference_user(&self, handle: &SampleRef) -> Result<usize, StoreError>;

    /// Drop one consumer. At zero the entry becomes eligible for eviction.
    fn release_from_memory(&self, handle: &SampleRef) -> Result<usize, StoreError>;

    /// Current number of reference users.
    fn reference_count(&self, handle: &SampleRef) -> usize;

    /// Approximate bytes held in memory by this store.
    fn stored_bytes(&self) -> usize;

    /// Number of entries held.
    fn len(&self) -> usize {
        self.handles().len()
    }

    /// Check if the store holds nothing.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load a sample, failing with `NotFound` when it is missing.
    fn load_required(&self, handle: &SampleRef) -> Result<Arc<Sample>, StoreError> {
        self.load(handle)?.ok_or(StoreError::NotFound(*handle))
    }
}

pub use memory::MemorySampleStore;
pub use file::FileSampleStore;
pub use hierarchical::HierarchicalSampleStore;
pub use refcount::ReferenceCounts;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_names_round_trip() {
        for group in [SampleGroup::Root, SampleGroup::Filter, SampleGroup::Node] {
            assert_eq!(SampleGroup::from_str(group.as_str()), Some(group));
        }
        assert_eq!(SampleGroup::from_str("other"), None);
    }

    #[test]
    fn test_handle_ordering_follows_allocation() {
        let a = SampleRef::new(1, SampleGroup::Node);
        let b = SampleRef::new(2, SampleGroup::Root);
        assert!(a < b);
        assert_eq!(b.to_string(), "root#2");
    }
}
