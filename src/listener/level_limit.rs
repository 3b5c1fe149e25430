//! Depth limit.

use super::{DiscoveryListener, ListenerContext};
use crate::tree::NodeId;

/// Stops the run before any node deeper than `max_level` is expanded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelLimit {
    max_level: usize,
}

impl LevelLimit {
    /// Create a limit. Level 0 is the root.
    pub fn new(max_level: usize) -> Self {
        Self { max_level }
    }

    /// Deepest level that may be expanded.
    pub fn max_level(&self) -> usize {
        self.max_level
    }
}

impl DiscoveryListener for LevelLimit {
    fn name(&self) -> &'static str {
        "level_limit"
    }

    fn level_did_end(&mut self, level: usize, _ctx: &mut ListenerContext<'_>) -> bool {
        // Next level is level + 1.
        level < self.max_level
    }

    fn node_will_expand(&mut self, node: NodeId, ctx: &mut ListenerContext<'_>) -> bool {
        ctx.tree
            .node(node)
            .map_or(true, |n| n.level() <= self.max_level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::tests::Harness;
    use crate::store::{SampleGroup, SampleRef};

    #[test]
    fn test_level_end_vetoes_past_limit() {
        let mut harness = Harness::new();
        let mut limit = LevelLimit::new(1);

        assert!(limit.level_did_end(0, &mut harness.ctx()));
        assert!(!limit.level_did_end(1, &mut harness.ctx()));
    }

    #[test]
    fn test_deep_node_vetoed() {
        let mut harness = Harness::new();
        let root = harness.tree.root();
        let child = harness
            .tree
            .add_child(root, 0, Some(SampleRef::new(1, SampleGroup::Node)), false)
            .unwrap();
        let mut limit = LevelLimit::new(0);

        assert!(limit.node_will_expand(root, &mut harness.ctx()));
        assert!(!limit.node_will_expand(child, &mut harness.ctx()));
    }
}
