//! Node filters: detection of redundant exploration states.
//!
//! A filter decides whether a freshly rewritten sample is new, that is not
//! equivalent to any sample the filter has already accepted. Equivalence is
//! isomorphism up to blank renaming (see [`isomorphism`]); the strategies
//! differ in what they keep and what they compare.
//!
//! | Strategy | Keeps | Compares against |
//! |----------|-------|------------------|
//! | [`NoOpFilter`] | nothing | nothing (everything is new) |
//! | [`IsomorphismFilter`] | every accepted sample | kept samples of equal size |
//! | [`DiffFilter`] | deltas against the root | kept deltas of equal size |
//!
//! Kept payloads live in the sample store under [`SampleGroup::Filter`].
//! The root sample is registered by [`NodeFilter::init`], so a rewrite that
//! gives back the root is redundant.
//!
//! [`SampleGroup::Filter`]: crate::store::SampleGroup::Filter

pub mod diff;
pub mod full;
pub mod isomorphism;
pub mod noop;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::store::{SampleRef, SampleStore, StoreError};
use crate::tree::NodeId;
use crate::types::Sample;

pub use diff::DiffFilter;
pub use full::IsomorphismFilter;
pub use isomorphism::is_isomorphic;
pub use noop::NoOpFilter;

/// Filter strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    /// Accept every node.
    None,
    /// Full-sample isomorphism.
    Isomorphism,
    /// Delta-against-root isomorphism.
    #[default]
    Diff,
}

impl FilterKind {
    /// Lowercase name stored in checkpoints.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Isomorphism => "isomorphism",
            Self::Diff => "diff",
        }
    }
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for filter operations.
#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    /// The filter was used before `init`.
    #[error("Filter not initialized")]
    NotInitialized,
    /// Storing or loading a kept payload failed.
    #[error("Filter store error: {0}")]
    Store(#[from] StoreError),
    /// Saved state refers to a sample file that was not restored.
    #[error("Unknown sample file in filter state: {0}")]
    UnknownSample(String),
    /// A kept handle has no file name in the save map.
    #[error("No file name for kept sample {0}")]
    UnnamedSample(SampleRef),
    /// Saved state could not be decoded.
    #[error("Invalid filter state: {0}")]
    InvalidState(#[from] serde_json::Error),
}

/// Handle → checkpoint file name, built when saving.
pub type SampleNames = BTreeMap<SampleRef, String>;

/// Checkpoint file name → restored handle, built when loading.
pub type SampleHandles = BTreeMap<String, SampleRef>;

/// Trait for redundancy filters.
///
/// Callers must invoke `init` once before anything else. For each
/// candidate child, `is_new_node` is asked first and `add_node` is called
/// only for children found new, before the next sibling is asked.
///
/// Nodes added since the last `commit` are provisional: `roll_back`
/// forgets them and drops their kept payloads, so an expansion that fails
/// midway leaves the filter as it was before.
pub trait NodeFilter: Send {
    /// Strategy implemented by this filter.
    fn kind(&self) -> FilterKind;

    /// Register the root sample.
    fn init(&mut self, root: SampleRef) -> Result<(), FilterError>;

    /// Whether `sample` is not equivalent to anything accepted so far.
    fn is_new_node(&mut self, node: NodeId, sample: &Sample) -> Result<bool, FilterError>;

    /// Accept `sample` as the representative of `node`.
    fn add_node(&mut self, node: NodeId, sample: &Sample) -> Result<(), FilterError>;

    /// Make every node added since the last commit permanent.
    fn commit(&mut self) {}

    /// Forget every node added since the last commit.
    fn roll_back(&mut self) -> Result<(), FilterError> {
        Ok(())
    }

    /// Emit per-level diagnostics.
    fn log_after_level_finished(&self) {}

    /// Serialize the filter's indices, referring to kept samples by name.
    fn save(&self, names: &SampleNames) -> Result<serde_json::Value, FilterError>;

    /// Rebuild indices from a saved state.
    fn load(&mut self, state: serde_json::Value, handles: &SampleHandles)
        -> Result<(), FilterError>;

    /// Remove kept payloads from the store.
    fn clean_up(&mut self) -> Result<(), FilterError> {
        Ok(())
    }
}

/// Create a filter of the given kind over `store`.
pub fn build_filter(kind: FilterKind, store: Arc<dyn SampleStore>) -> Box<dyn NodeFilter> {
    match kind {
        FilterKind::None => Box::new(NoOpFilter::new()),
        FilterKind::Isomorphism => Box::new(IsomorphismFilter::new(store)),
        FilterKind::Diff => Box::new(DiffFilter::new(store)),
    }
}

pub(crate) fn name_of(names: &SampleNames, handle: SampleRef) -> Result<String, FilterError> {
    names
        .get(&handle)
        .cloned()
        .ok_or(FilterError::UnnamedSample(handle))
}

pub(crate) fn handle_of(handles: &SampleHandles, name: &str) -> Result<SampleRef, FilterError> {
    handles
        .get(name)
        .copied()
        .ok_or_else(|| FilterError::UnknownSample(name.to_string()))
}
