//! Wall-clock limits.
//!
//! Both limits measure from the current process: a resumed run starts a
//! fresh clock.

use std::time::{Duration, Instant};

use super::{DiscoveryListener, ListenerContext};
use crate::tree::NodeId;

/// Stops the run once it has been going for `limit` or longer.
#[derive(Debug, Clone)]
pub struct TimeLimit {
    limit: Duration,
    started: Option<Instant>,
}

impl TimeLimit {
    /// Create a limit.
    pub fn new(limit: Duration) -> Self {
        Self {
            limit,
            started: None,
        }
    }

    /// Configured limit.
    pub fn limit(&self) -> Duration {
        self.limit
    }
}

impl DiscoveryListener for TimeLimit {
    fn name(&self) -> &'static str {
        "time_limit"
    }

    fn discovery_will_run(&mut self, _ctx: &mut ListenerContext<'_>) {
        self.started = Some(Instant::now());
    }

    fn node_will_expand(&mut self, node: NodeId, _ctx: &mut ListenerContext<'_>) -> bool {
        let started = *self.started.get_or_insert_with(Instant::now);
        let elapsed = started.elapsed();
        if elapsed >= self.limit {
            tracing::warn!(
                node = %node,
                elapsed_ms = elapsed.as_millis() as u64,
                limit_ms = self.limit.as_millis() as u64,
                "Time limit reached"
            );
            return false;
        }
        true
    }
}

/// Stops the run after a node whose expansion took `limit` or longer.
#[derive(Debug, Clone)]
pub struct NodeTimeLimit {
    limit: Duration,
    current: Option<(NodeId, Instant)>,
}

impl NodeTimeLimit {
    /// Create a limit.
    pub fn new(limit: Duration) -> Self {
        Self {
            limit,
            current: None,
        }
    }

    /// Configured limit.
    pub fn limit(&self) -> Duration {
        self.limit
    }
}

impl DiscoveryListener for NodeTimeLimit {
    fn name(&self) -> &'static str {
        "node_time_limit"
    }

    fn node_will_expand(&mut self, node: NodeId, _ctx: &mut ListenerContext<'_>) -> bool {
        self.current = Some((node, Instant::now()));
        true
    }

    fn node_did_expand(&mut self, node: NodeId, _ctx: &mut ListenerContext<'_>) -> bool {
        let Some((started_node, started)) = self.current.take() else {
            return true;
        };
        if started_node != node {
            return true;
        }
        let elapsed = started.elapsed();
        if elapsed >= self.limit {
            tracing::warn!(
                node = %node,
                elapsed_ms = elapsed.as_millis() as u64,
                limit_ms = self.limit.as_millis() as u64,
                "Node expansion exceeded time limit"
            );
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::tests::Harness;

    #[test]
    fn test_time_limit() {
        let mut harness = Harness::new();
        let root = harness.tree.root();

        let mut generous = TimeLimit::new(Duration::from_secs(3600));
        generous.discovery_will_run(&mut harness.ctx());
        assert!(generous.node_will_expand(root, &mut harness.ctx()));

        let mut zero = TimeLimit::new(Duration::ZERO);
        zero.discovery_will_run(&mut harness.ctx());
        assert!(!zero.node_will_expand(root, &mut harness.ctx()));
    }

    #[test]
    fn test_node_time_limit() {
        let mut harness = Harness::new();
        let root = harness.tree.root();

        let mut generous = NodeTimeLimit::new(Duration::from_secs(3600));
        assert!(generous.node_will_expand(root, &mut harness.ctx()));
        assert!(generous.node_did_expand(root, &mut harness.ctx()));

        let mut zero = NodeTimeLimit::new(Duration::ZERO);
        assert!(zero.node_will_expand(root, &mut harness.ctx()));
        assert!(!zero.node_did_expand(root, &mut harness.ctx()));
    }
}
