//! Listener and policy framework.
//!
//! Listeners observe the run and steer it. Every hook that returns `bool`
//! is a vote: `false` halts the run once the hook has been delivered to all
//! listeners.
//!
//! | Hook | Effect of `false` |
//! |------|-------------------|
//! | `node_will_expand` | node stays at the head of the frontier, unexpanded |
//! | `node_did_expand` | run stops after this node; its children are queued |
//! | `level_did_end` | run stops before the next level |
//!
//! The built-in policies are listeners too: [`LevelLimit`], [`TimeLimit`],
//! [`NodeTimeLimit`], [`StrongGroupPruning`] and [`ResourceStrategy`].

pub mod level_limit;
pub mod resource;
pub mod strong_group;
pub mod time_limit;

use std::collections::VecDeque;

use crate::store::SampleStore;
use crate::tree::{NodeId, Tree};
use crate::types::Catalog;

pub use level_limit::LevelLimit;
pub use resource::{
    FixedResourceMonitor, ResourceMonitor, ResourceStage, ResourceStrategy, ResourceUsage,
    StoreResourceMonitor,
};
pub use strong_group::StrongGroupPruning;
pub use time_limit::{NodeTimeLimit, TimeLimit};

/// Run state visible to listeners.
pub struct ListenerContext<'a> {
    /// Exploration tree. Listeners may mark nodes redundant.
    pub tree: &'a mut Tree,
    /// Nodes waiting for expansion, head first.
    pub frontier: &'a VecDeque<NodeId>,
    /// Immutable catalog.
    pub catalog: &'a Catalog,
    /// Sample store.
    pub store: &'a dyn SampleStore,
    /// Run identifier.
    pub iri: &'a str,
}

/// Observer of a discovery run.
///
/// All hooks have no-op defaults.
pub trait DiscoveryListener: Send {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// The run is about to start (or resume).
    fn discovery_will_run(&mut self, _ctx: &mut ListenerContext<'_>) {}

    /// The run finished, whatever the outcome.
    fn discovery_did_run(&mut self, _ctx: &mut ListenerContext<'_>) {}

    /// Every node of `level` has been expanded.
    fn level_did_end(&mut self, _level: usize, _ctx: &mut ListenerContext<'_>) -> bool {
        true
    }

    /// `node` is about to be expanded.
    fn node_will_expand(&mut self, _node: NodeId, _ctx: &mut ListenerContext<'_>) -> bool {
        true
    }

    /// `node` has been expanded; its children are not queued yet.
    fn node_did_expand(&mut self, _node: NodeId, _ctx: &mut ListenerContext<'_>) -> bool {
        true
    }

    /// Release resources held by the listener.
    fn clean_up(&mut self) {}

    /// Key under which the listener's state is checkpointed, if any.
    fn checkpoint_key(&self) -> Option<&'static str> {
        None
    }

    /// State to checkpoint.
    fn save_state(&self) -> Option<serde_json::Value> {
        None
    }

    /// Restore checkpointed state.
    fn restore_state(&mut self, _state: serde_json::Value) -> Result<(), serde_json::Error> {
        Ok(())
    }
}

/// Ordered listener list.
///
/// Hooks are delivered to every listener in registration order, even after
/// one has voted `false`, and the votes are combined with AND.
#[derive(Default)]
pub struct ListenerSet {
    listeners: Vec<Box<dyn DiscoveryListener>>,
}

impl ListenerSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a listener.
    pub fn push(&mut self, listener: Box<dyn DiscoveryListener>) {
        self.listeners.push(listener);
    }

    /// Number of listeners.
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Check if no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Listeners in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &dyn DiscoveryListener> {
        self.listeners.iter().map(|l| l.as_ref())
    }

    /// Mutable listeners in registration order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn DiscoveryListener>> {
        self.listeners.iter_mut()
    }

    /// Deliver `discovery_will_run`.
    pub fn discovery_will_run(&mut self, ctx: &mut ListenerContext<'_>) {
        for listener in &mut self.listeners {
            listener.discovery_will_run(ctx);
        }
    }

    /// Deliver `discovery_did_run`.
    pub fn discovery_did_run(&mut self, ctx: &mut ListenerContext<'_>) {
        for listener in &mut self.listeners {
            listener.discovery_did_run(ctx);
        }
    }

    /// Deliver `level_did_end` and combine the votes.
    pub fn level_did_end(&mut self, level: usize, ctx: &mut ListenerContext<'_>) -> bool {
        self.vote("level_did_end", |l| l.level_did_end(level, ctx))
    }

    /// Deliver `node_will_expand` and combine the votes.
    pub fn node_will_expand(&mut self, node: NodeId, ctx: &mut ListenerContext<'_>) -> bool {
        self.vote("node_will_expand", |l| l.node_will_expand(node, ctx))
    }

    /// Deliver `node_did_expand` and combine the votes.
    pub fn node_did_expand(&mut self, node: NodeId, ctx: &mut ListenerContext<'_>) -> bool {
        self.vote("node_did_expand", |l| l.node_did_expand(node, ctx))
    }

    /// Deliver `clean_up`.
    pub fn clean_up(&mut self) {
        for listener in &mut self.listeners {
            listener.clean_up();
        }
    }

    fn vote(
        &mut self,
        hook: &'static str,
        mut f: impl FnMut(&mut dyn DiscoveryListener) -> bool,
    ) -> bool {
        let mut proceed = true;
        for listener in &mut self.listeners {
            if !f(listener.as_mut()) {
                tracing::warn!(listener = listener.name(), hook, "Listener vetoed");
                proceed = false;
            }
        }
        proceed
    }
}

impl std::fmt::Debug for ListenerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.listeners.iter().map(|l| l.name()))
            .finish()
    }
}
