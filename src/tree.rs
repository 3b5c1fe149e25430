//! Exploration tree.
//!
//! Nodes live in an arena and are addressed by [`NodeId`]. A node owns the
//! list of its children's ids; the parent link is a plain id used for
//! lookups only. The structure is acyclic by construction: children are
//! always allocated after their parent, so arena order is also a valid
//! parent-before-child order.
//!
//! ## Invariants
//!
//! - `level(child) == level(parent) + 1`, the root has level 0 and no parent
//! - a node's sample handle is set at most once
//! - `next` stays empty until [`Tree::finish_expansion`] is called

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Index;

use crate::store::SampleRef;
use crate::types::{ApplicationIndex, Catalog, TransformerIndex};

/// Index of a node in the tree arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(usize);

impl NodeId {
    /// Arena index.
    pub fn index(&self) -> usize {
        self.0
    }

    /// Stable name used in checkpoints.
    pub fn name(&self) -> String {
        format!("node-{}", self.0)
    }

    /// Parse a name produced by [`NodeId::name`].
    pub fn from_name(name: &str) -> Option<Self> {
        name.strip_prefix("node-")?.parse().ok().map(Self)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

/// Error type for tree mutations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    /// Id does not belong to this tree.
    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),
    /// The node already has a sample handle.
    #[error("Sample already set for {0}")]
    SampleAlreadySet(NodeId),
    /// The node was already expanded.
    #[error("Node already expanded: {0}")]
    AlreadyExpanded(NodeId),
    /// A child does not belong to the node being expanded.
    #[error("{child} is not a child of {parent}")]
    NotAChild {
        /// Node being expanded.
        parent: NodeId,
        /// Offending child.
        child: NodeId,
    },
}

/// One point in the exploration tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    id: NodeId,
    level: usize,
    transformer: Option<TransformerIndex>,
    applications: Vec<ApplicationIndex>,
    redundant: bool,
    expanded: bool,
    sample: Option<SampleRef>,
    parent: Option<NodeId>,
    next: Vec<NodeId>,
}

impl Node {
    /// Node id.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Distance from the root.
    pub fn level(&self) -> usize {
        self.level
    }

    /// Transformer applied to reach this node. `None` only at the root.
    pub fn transformer(&self) -> Option<TransformerIndex> {
        self.transformer
    }

    /// Applications whose features are satisfied here, in catalog order.
    pub fn applications(&self) -> &[ApplicationIndex] {
        &self.applications
    }

    /// Whether the node was pruned.
    pub fn is_redundant(&self) -> bool {
        self.redundant
    }

    /// Whether the node's children have been computed.
    pub fn is_expanded(&self) -> bool {
        self.expanded
    }

    /// Sample handle, once set.
    pub fn sample(&self) -> Option<SampleRef> {
        self.sample
    }

    /// Parent id. `None` only at the root.
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Child ids in creation order.
    pub fn next(&self) -> &[NodeId] {
        &self.next
    }

    /// Whether this node is the root.
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Prune this node. Its subtree is never expanded.
    pub fn mark_redundant(&mut self) {
        self.redundant = true;
    }
}

/// Callback for [`Tree::accept`].
pub trait NodeVisitor {
    /// Called once per reachable node, parents before children.
    fn visit(&mut self, node: &Node);
}

impl<F: FnMut(&Node)> NodeVisitor for F {
    fn visit(&mut self, node: &Node) {
        self(node)
    }
}

/// Comparable description of a node, independent of arena ids.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeSummary {
    /// Distance from the root.
    pub level: usize,
    /// Transformer IRI (absent at the root).
    pub transformer: Option<String>,
    /// Matched application IRIs in catalog order.
    pub applications: Vec<String>,
}

/// Arena-backed exploration tree.
#[derive(Debug, Clone)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    /// Create a tree holding only a root bound to `sample`.
    pub fn with_root(sample: SampleRef) -> Self {
        let root = Node {
            id: NodeId(0),
            level: 0,
            transformer: None,
            applications: Vec::new(),
            redundant: false,
            expanded: false,
            sample: Some(sample),
            parent: None,
            next: Vec::new(),
        };
        Self { nodes: vec![root] }
    }

    /// Root id.
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Look up a node.
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    /// Mutable access to a node. Only the redundant flag can be changed
    /// through it; structure is edited through the tree.
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0)
    }

    /// Parent of `id`.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id)?.parent
    }

    /// Children of `id` (empty until expanded).
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id).map_or(&[], |n| &n.next)
    }

    /// Number of nodes ever created (reachable or not).
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// A tree always has a root.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All nodes in creation order. Parents precede their children.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    fn node_checked(&mut self, id: NodeId) -> Result<&mut Node, TreeError> {
        self.nodes.get_mut(id.0).ok_or(TreeError::UnknownNode(id))
    }

    /// Allocate a child of `parent`. The child is not linked into
    /// `parent.next` until [`Tree::finish_expansion`].
    pub fn add_child(
        &mut self,
        parent: NodeId,
        transformer: TransformerIndex,
        sample: Option<SampleRef>,
        redundant: bool,
    ) -> Result<NodeId, TreeError> {
        let level = self
            .node(parent)
            .ok_or(TreeError::UnknownNode(parent))?
            .level
            + 1;
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            id,
            level,
            transformer: Some(transformer),
            applications: Vec::new(),
            redundant,
            expanded: false,
            sample,
            parent: Some(parent),
            next: Vec::new(),
        });
        Ok(id)
    }

    /// Bind a sample handle to a node that has none yet.
    pub fn set_sample(&mut self, id: NodeId, sample: SampleRef) -> Result<(), TreeError> {
        let node = self.node_checked(id)?;
        if node.sample.is_some() {
            return Err(TreeError::SampleAlreadySet(id));
        }
        node.sample = Some(sample);
        Ok(())
    }

    /// Record the result of expanding `id` and mark it expanded.
    pub fn finish_expansion(
        &mut self,
        id: NodeId,
        applications: Vec<ApplicationIndex>,
        children: Vec<NodeId>,
    ) -> Result<(), TreeError> {
        for child in &children {
            if self.node(*child).and_then(Node::parent) != Some(id) {
                return Err(TreeError::NotAChild { parent: id, child: *child });
            }
        }
        let node = self.node_checked(id)?;
        if node.expanded {
            return Err(TreeError::AlreadyExpanded(id));
        }
        node.applications = applications;
        node.next = children;
        node.expanded = true;
        Ok(())
    }

    /// Drop nodes allocated after the first `len` ones. Only valid for
    /// nodes not yet linked into any `next` list.
    pub(crate) fn truncate(&mut self, len: usize) {
        self.nodes.truncate(len.max(1));
    }

    /// Mark a node redundant. Its subtree will never be expanded.
    pub fn mark_redundant(&mut self, id: NodeId) -> Result<(), TreeError> {
        self.node_checked(id)?.mark_redundant();
        Ok(())
    }

    /// Pre-order visit of every node reachable from the root.
    pub fn accept<V: NodeVisitor + ?Sized>(&self, visitor: &mut V) {
        self.accept_from(self.root(), visitor);
    }

    /// Pre-order visit of the subtree rooted at `start`.
    pub fn accept_from<V: NodeVisitor + ?Sized>(&self, start: NodeId, visitor: &mut V) {
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            let Some(node) = self.node(id) else { continue };
            visitor.visit(node);
            stack.extend(node.next.iter().rev().copied());
        }
    }

    /// Drop from every reachable node's `next` the children that were never
    /// expanded or are redundant. Returns the number of links removed.
    pub fn shake(&mut self) -> usize {
        let mut reachable = Vec::new();
        self.accept(&mut |node: &Node| reachable.push(node.id));

        let mut removed = 0;
        for id in reachable {
            let kept: Vec<NodeId> = self.nodes[id.0]
                .next
                .iter()
                .copied()
                .filter(|c| {
                    let child = &self.nodes[c.0];
                    child.expanded && !child.redundant
                })
                .collect();
            removed += self.nodes[id.0].next.len() - kept.len();
            self.nodes[id.0].next = kept;
        }
        tracing::debug!(removed, "Shook exploration tree");
        removed
    }

    /// Number of reachable nodes.
    pub fn count_nodes(&self) -> usize {
        self.count(|_| true)
    }

    /// Number of reachable expanded nodes.
    pub fn count_expanded(&self) -> usize {
        self.count(Node::is_expanded)
    }

    /// Number of reachable redundant nodes.
    pub fn count_redundant(&self) -> usize {
        self.count(Node::is_redundant)
    }

    fn count(&self, predicate: impl Fn(&Node) -> bool) -> usize {
        let mut n = 0;
        self.accept(&mut |node: &Node| {
            if predicate(node) {
                n += 1;
            }
        });
        n
    }

    /// Sorted `(level, transformer, applications)` tuples of reachable nodes.
    pub fn summary(&self, catalog: &Catalog) -> Vec<NodeSummary> {
        let mut out = Vec::new();
        self.accept(&mut |node: &Node| {
            out.push(NodeSummary {
                level: node.level,
                transformer: node
                    .transformer
                    .and_then(|t| catalog.transformer(t))
                    .map(|t| t.iri.clone()),
                applications: node
                    .applications
                    .iter()
                    .filter_map(|a| catalog.application(*a))
                    .map(|a| a.iri.clone())
                    .collect(),
            });
        });
        out.sort();
        out
    }

    /// Assemble a tree from restored nodes in arena order. Fails unless the
    /// first node is a root, every other node's parent precedes it, and
    /// every child listed in a `next` list names that node as its parent.
    pub(crate) fn from_nodes(nodes: Vec<Node>) -> Option<Self> {
        let root = nodes.first()?;
        if root.id.0 != 0 || root.parent.is_some() || root.level != 0 {
            return None;
        }
        for (index, node) in nodes.iter().enumerate().skip(1) {
            let parent = node.parent?;
            if node.id.0 != index || parent.0 >= index || nodes[parent.0].level + 1 != node.level {
                return None;
            }
        }
        let mut listed = vec![false; nodes.len()];
        for node in &nodes {
            for child in &node.next {
                let linked = nodes.get(child.0).is_some_and(|c| c.parent == Some(node.id));
                if !linked || std::mem::replace(&mut listed[child.0], true) {
                    return None;
                }
            }
        }
        Some(Self { nodes })
    }
}

/// Checkpointed fields of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Node name (`node-<index>`).
    pub name: String,
    /// Distance from the root.
    pub level: usize,
    /// Transformer index.
    pub transformer: Option<TransformerIndex>,
    /// Matched application indices.
    pub applications: Vec<ApplicationIndex>,
    /// Pruned flag.
    pub redundant: bool,
    /// Expanded flag.
    pub expanded: bool,
    /// Sample handle.
    pub sample: Option<SampleRef>,
    /// Parent name.
    pub parent: Option<String>,
    /// Child names.
    pub next: Vec<String>,
}

impl From<&Node> for NodeRecord {
    fn from(node: &Node) -> Self {
        Self {
            name: node.id.name(),
            level: node.level,
            transformer: node.transformer,
            applications: node.applications.clone(),
            redundant: node.redundant,
            expanded: node.expanded,
            sample: node.sample,
            parent: node.parent.map(|p| p.name()),
            next: node.next.iter().map(NodeId::name).collect(),
        }
    }
}

impl NodeRecord {
    /// Rebuild the node, resolving names back to ids.
    pub(crate) fn into_node(self) -> Option<Node> {
        let parent = match self.parent {
            Some(name) => Some(NodeId::from_name(&name)?),
            None => None,
        };
        let next = self
            .next
            .iter()
            .map(|n| NodeId::from_name(n))
            .collect::<Option<Vec<_>>>()?;
        Some(Node {
            id: NodeId::from_name(&self.name)?,
            level: self.level,
            transformer: self.transformer,
            applications: self.applications,
            redundant: self.redundant,
            expanded: self.expanded,
            sample: self.sample,
            parent,
            next,
        })
    }
}

impl Index<NodeId> for Tree {
    type Output = Node;

    fn index(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SampleGroup;

    fn handle(id: u64) -> SampleRef {
        SampleRef::new(id, SampleGroup::Node)
    }

    //        root
    //       /  |  \
    //      a   b   c(redundant)
    //     / \
    //    d   e(unexpanded)
    fn build_tree() -> (Tree, [NodeId; 5]) {
        let mut tree = Tree::with_root(SampleRef::new(0, SampleGroup::Root));
        let root = tree.root();
        let a = tree.add_child(root, 0, Some(handle(1)), false).unwrap();
        let b = tree.add_child(root, 1, Some(handle(2)), false).unwrap();
        let c = tree.add_child(root, 2, None, true).unwrap();
        tree.finish_expansion(root, vec![], vec![a, b, c]).unwrap();

        let d = tree.add_child(a, 1, Some(handle(3)), false).unwrap();
        let e = tree.add_child(a, 2, Some(handle(4)), false).unwrap();
        tree.finish_expansion(a, vec![0], vec![d, e]).unwrap();
        tree.finish_expansion(b, vec![], vec![]).unwrap();
        tree.finish_expansion(d, vec![], vec![]).unwrap();
        (tree, [a, b, c, d, e])
    }

    #[test]
    fn test_levels_follow_parents() {
        let (tree, [a, _, _, d, _]) = build_tree();
        assert_eq!(tree[tree.root()].level(), 0);
        assert_eq!(tree[a].level(), 1);
        assert_eq!(tree[d].level(), 2);
        assert_eq!(tree[d].parent(), Some(a));
        assert!(tree[tree.root()].is_root());
    }

    #[test]
    fn test_children_hidden_until_expansion_finishes() {
        let mut tree = Tree::with_root(handle(0));
        let root = tree.root();
        let child = tree.add_child(root, 0, None, false).unwrap();

        assert!(tree[root].next().is_empty());
        assert_eq!(tree.count_nodes(), 1);

        tree.finish_expansion(root, vec![], vec![child]).unwrap();
        assert_eq!(tree.count_nodes(), 2);
        assert_eq!(
            tree.finish_expansion(root, vec![], vec![]),
            Err(TreeError::AlreadyExpanded(root))
        );
    }

    #[test]
    fn test_foreign_child_rejected() {
        let (mut tree, [a, _, _, d, _]) = build_tree();
        let extra = tree.add_child(d, 0, None, false).unwrap();
        assert!(matches!(
            tree.finish_expansion(a, vec![], vec![extra]),
            Err(TreeError::NotAChild { .. }) | Err(TreeError::AlreadyExpanded(_))
        ));
    }

    #[test]
    fn test_sample_set_once() {
        let mut tree = Tree::with_root(handle(0));
        let child = tree.add_child(tree.root(), 0, None, false).unwrap();

        tree.set_sample(child, handle(9)).unwrap();
        assert_eq!(tree.set_sample(child, handle(10)), Err(TreeError::SampleAlreadySet(child)));
        assert_eq!(tree[child].sample(), Some(handle(9)));
    }

    #[test]
    fn test_preorder_visits_parent_first() {
        let (tree, [a, b, c, d, e]) = build_tree();
        let mut order = Vec::new();
        tree.accept(&mut |n: &Node| order.push(n.id()));

        assert_eq!(order, vec![tree.root(), a, d, e, b, c]);
    }

    #[test]
    fn test_visit_is_restartable() {
        let (tree, _) = build_tree();
        assert_eq!(tree.count_nodes(), 6);
        assert_eq!(tree.count_nodes(), 6);
        assert_eq!(tree.count_redundant(), 1);
        assert_eq!(tree.count_expanded(), 4);
    }

    #[test]
    fn test_shake_removes_unexpanded_and_redundant() {
        let (mut tree, [a, b, _, d, _]) = build_tree();

        assert_eq!(tree.shake(), 2);
        assert_eq!(tree[tree.root()].next(), &[a, b]);
        assert_eq!(tree[a].next(), &[d]);
        assert_eq!(tree.count_nodes(), 4);
    }

    #[test]
    fn test_shake_is_idempotent() {
        let (mut once, _) = build_tree();
        once.shake();
        let mut twice = once.clone();
        assert_eq!(twice.shake(), 0);

        let mut a = Vec::new();
        let mut b = Vec::new();
        once.accept(&mut |n: &Node| a.push(n.clone()));
        twice.accept(&mut |n: &Node| b.push(n.clone()));
        assert_eq!(a, b);
    }

    #[test]
    fn test_records_rebuild_same_tree() {
        let (tree, _) = build_tree();
        let nodes: Vec<Node> = tree
            .nodes()
            .map(NodeRecord::from)
            .map(|r| r.into_node().unwrap())
            .collect();
        let rebuilt = Tree::from_nodes(nodes).unwrap();

        assert_eq!(rebuilt.len(), tree.len());
        assert_eq!(rebuilt.nodes().collect::<Vec<_>>(), tree.nodes().collect::<Vec<_>>());
    }

    #[test]
    fn test_from_nodes_rejects_orphans() {
        let (tree, [a, ..]) = build_tree();
        let mut records: Vec<NodeRecord> = tree.nodes().map(NodeRecord::from).collect();
        records[a.index()].parent = Some("node-99".into());
        let nodes = records.into_iter().map(|r| r.into_node().unwrap()).collect();
        assert!(Tree::from_nodes(nodes).is_none());
    }

    #[test]
    fn test_from_nodes_rejects_misdirected_children() {
        let (tree, [a, b, _, d, _]) = build_tree();

        // d listed under b while its parent is a.
        let mut records: Vec<NodeRecord> = tree.nodes().map(NodeRecord::from).collect();
        records[b.index()].next = vec![d.name()];
        let nodes = records.into_iter().map(|r| r.into_node().unwrap()).collect();
        assert!(Tree::from_nodes(nodes).is_none());

        // A child listed twice.
        let mut records: Vec<NodeRecord> = tree.nodes().map(NodeRecord::from).collect();
        records[a.index()].next.push(d.name());
        let nodes = records.into_iter().map(|r| r.into_node().unwrap()).collect();
        assert!(Tree::from_nodes(nodes).is_none());
    }

    #[test]
    fn test_node_names() {
        let id = NodeId(42);
        assert_eq!(id.name(), "node-42");
        assert_eq!(NodeId::from_name("node-42"), Some(id));
        assert_eq!(NodeId::from_name("n-42"), None);
    }
}
