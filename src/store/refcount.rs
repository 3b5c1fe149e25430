//! Explicit reference counts for sample handles.
//!
//! ## Invariants
//!
//! - A count never goes below zero: releasing at zero is an error and the
//!   count stays at zero.
//! - Reaching zero only makes an entry eligible for eviction; the store
//!   decides what eviction means (demotion to a slower tier, or nothing).

use parking_lot::Mutex;
use std::collections::BTreeMap;

use super::{SampleRef, StoreError};

/// Reference counts keyed by handle.
#[derive(Debug, Default)]
pub struct ReferenceCounts {
    counts: Mutex<BTreeMap<SampleRef, usize>>,
}

impl ReferenceCounts {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a freshly stored handle with one user.
    pub fn register(&self, handle: SampleRef) {
        self.counts.lock().insert(handle, 1);
    }

    /// Add a user. Unknown handles start at zero.
    pub fn acquire(&self, handle: SampleRef) -> usize {
        let mut counts = self.counts.lock();
        let count = counts.entry(handle).or_insert(0);
        *count += 1;
        *count
    }

    /// Remove a user, returning the remaining count.
    pub fn release(&self, handle: SampleRef) -> Result<usize, StoreError> {
        let mut counts = self.counts.lock();
        match counts.get_mut(&handle) {
            Some(count) if *count > 0 => {
                *count -= 1;
                Ok(*count)
            }
            _ => {
                tracing::warn!(handle = %handle, "release on handle with no reference users");
                Err(StoreError::ReferenceUnderflow(handle))
            }
        }
    }

    /// Current count (zero for unknown handles).
    pub fn get(&self, handle: &SampleRef) -> usize {
        self.counts.lock().get(handle).copied().unwrap_or(0)
    }

    /// Stop tracking a handle.
    pub fn forget(&self, handle: &SampleRef) {
        self.counts.lock().remove(handle);
    }

    /// Stop tracking every handle.
    pub fn clear(&self) {
        self.counts.lock().clear();
    }
}
