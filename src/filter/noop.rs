//! Filter that accepts every node.

use super::{FilterError, FilterKind, NodeFilter, SampleHandles, SampleNames};
use crate::store::SampleRef;
use crate::tree::NodeId;
use crate::types::Sample;

/// Filter that never prunes. Useful as a baseline and for exhaustive runs.
#[derive(Debug, Default)]
pub struct NoOpFilter {
    accepted: u64,
    uncommitted: u64,
}

impl NoOpFilter {
    /// Create a new filter.
    pub fn new() -> Self {
        Self::default()
    }
}

impl NodeFilter for NoOpFilter {
    fn kind(&self) -> FilterKind {
        FilterKind::None
    }

    fn init(&mut self, _root: SampleRef) -> Result<(), FilterError> {
        Ok(())
    }

    fn is_new_node(&mut self, _node: NodeId, _sample: &Sample) -> Result<bool, FilterError> {
        Ok(true)
    }

    fn add_node(&mut self, _node: NodeId, _sample: &Sample) -> Result<(), FilterError> {
        self.accepted += 1;
        self.uncommitted += 1;
        Ok(())
    }

    fn commit(&mut self) {
        self.uncommitted = 0;
    }

    fn roll_back(&mut self) -> Result<(), FilterError> {
        self.accepted -= std::mem::take(&mut self.uncommitted);
        Ok(())
    }

    fn log_after_level_finished(&self) {
        tracing::debug!(accepted = self.accepted, "No-op filter level summary");
    }

    fn save(&self, _names: &SampleNames) -> Result<serde_json::Value, FilterError> {
        Ok(serde_json::json!({ "accepted": self.accepted }))
    }

    fn load(
        &mut self,
        state: serde_json::Value,
        _handles: &SampleHandles,
    ) -> Result<(), FilterError> {
        self.accepted = state.get("accepted").and_then(|v| v.as_u64()).unwrap_or(0);
        self.uncommitted = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roll_back_restores_count() {
        let mut filter = NoOpFilter::new();
        let node = NodeId::from_name("node-1").unwrap();
        filter.add_node(node, &Sample::new()).unwrap();
        filter.commit();
        filter.add_node(node, &Sample::new()).unwrap();
        filter.add_node(node, &Sample::new()).unwrap();

        filter.roll_back().unwrap();
        let state = filter.save(&SampleNames::new()).unwrap();
        assert_eq!(state["accepted"].as_u64(), Some(1));
        assert!(filter.is_new_node(node, &Sample::new()).unwrap());
    }
}
