//! Pruning of mutually exclusive transformers.
//!
//! A strong group lists transformers that lead to interchangeable
//! pipelines, in order of preference. When several members of a group
//! produce children of the same node, only the child of the most preferred
//! member is kept.

use std::collections::BTreeMap;

use super::{DiscoveryListener, ListenerContext};
use crate::tree::NodeId;
use crate::types::TransformerIndex;

/// Keeps one child per strong group.
#[derive(Debug, Clone)]
pub struct StrongGroupPruning {
    groups: Vec<Vec<String>>,
    /// Transformer index → (group, rank), resolved against the catalog.
    ranks: BTreeMap<TransformerIndex, (usize, usize)>,
    pruned: u64,
}

impl StrongGroupPruning {
    /// Create a pruner over groups of transformer IRIs, each in preference order.
    pub fn new(groups: Vec<Vec<String>>) -> Self {
        Self {
            groups,
            ranks: BTreeMap::new(),
            pruned: 0,
        }
    }

    /// Children pruned so far.
    pub fn pruned(&self) -> u64 {
        self.pruned
    }

    fn resolve(&mut self, ctx: &ListenerContext<'_>) {
        self.ranks.clear();
        for (group, members) in self.groups.iter().enumerate() {
            for (rank, iri) in members.iter().enumerate() {
                match ctx.catalog.transformer_index(iri) {
                    Some(index) => {
                        self.ranks.entry(index).or_insert((group, rank));
                    }
                    None => tracing::warn!(iri = %iri, group, "Unknown transformer in strong group"),
                }
            }
        }
    }
}

impl DiscoveryListener for StrongGroupPruning {
    fn name(&self) -> &'static str {
        "strong_group_pruning"
    }

    fn discovery_will_run(&mut self, ctx: &mut ListenerContext<'_>) {
        self.resolve(ctx);
    }

    fn node_did_expand(&mut self, node: NodeId, ctx: &mut ListenerContext<'_>) -> bool {
        // Best child per group: (rank, child).
        let mut best: BTreeMap<usize, (usize, NodeId)> = BTreeMap::new();
        let mut members = Vec::new();
        for &child in ctx.tree.children(node) {
            let Some(n) = ctx.tree.node(child) else { continue };
            if n.is_redundant() {
                continue;
            }
            let Some(&(group, rank)) = n.transformer().and_then(|t| self.ranks.get(&t)) else {
                continue;
            };
            members.push((group, child));
            let entry = best.entry(group).or_insert((rank, child));
            if rank < entry.0 {
                *entry = (rank, child);
            }
        }

        for (group, child) in members {
            if best.get(&group).map(|(_, keep)| *keep) == Some(child) {
                continue;
            }
            if let Some(n) = ctx.tree.node_mut(child) {
                n.mark_redundant();
            }
            if let Some(handle) = ctx.tree.node(child).and_then(|n| n.sample()) {
                if let Err(e) = ctx.store.release_from_memory(&handle) {
                    tracing::warn!(node = %child, error = %e, "Failed to release pruned sample");
                }
            }
            self.pruned += 1;
            tracing::debug!(node = %child, parent = %node, group, "Pruned strong group member");
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::tests::Harness;
    use crate::store::{SampleGroup, SampleRef, SampleStore};
    use crate::types::{Catalog, Transformer};
    use std::sync::Arc;

    fn catalog() -> Catalog {
        let t = |iri: &str| Transformer::new(iri, iri, vec![], "Q");
        Catalog::new(vec![], vec![t("tr:a"), t("tr:b"), t("tr:c"), t("tr:d")])
    }

    #[test]
    fn test_keeps_most_preferred_member() {
        let mut harness = Harness::new();
        harness.catalog = catalog();
        let root = harness.tree.root();
        let mut children = Vec::new();
        for t in 0..4 {
            let h = harness
                .store
                .store(Arc::new(Default::default()), SampleGroup::Node)
                .unwrap();
            children.push(harness.tree.add_child(root, t, Some(h), false).unwrap());
        }
        harness.tree.finish_expansion(root, vec![], children.clone()).unwrap();

        // Group prefers c over a; b is unconstrained; d is alone in its group.
        let mut pruning = StrongGroupPruning::new(vec![
            vec!["tr:c".into(), "tr:a".into()],
            vec!["tr:d".into(), "tr:unknown".into()],
        ]);
        pruning.discovery_will_run(&mut harness.ctx());
        assert!(pruning.node_did_expand(root, &mut harness.ctx()));

        let redundant: Vec<bool> = children.iter().map(|c| harness.tree[*c].is_redundant()).collect();
        assert_eq!(redundant, vec![true, false, false, false]);
        assert_eq!(pruning.pruned(), 1);

        let pruned_sample: SampleRef = harness.tree[children[0]].sample().unwrap();
        assert_eq!(harness.store.reference_count(&pruned_sample), 0);
    }

    #[test]
    fn test_already_redundant_children_ignored() {
        let mut harness = Harness::new();
        harness.catalog = catalog();
        let root = harness.tree.root();
        let a = harness.tree.add_child(root, 0, None, true).unwrap();
        let h = harness
            .store
            .store(Arc::new(Default::default()), SampleGroup::Node)
            .unwrap();
        let b = harness.tree.add_child(root, 1, Some(h), false).unwrap();
        harness.tree.finish_expansion(root, vec![], vec![a, b]).unwrap();

        let mut pruning = StrongGroupPruning::new(vec![vec!["tr:a".into(), "tr:b".into()]]);
        pruning.discovery_will_run(&mut harness.ctx());
        pruning.node_did_expand(root, &mut harness.ctx());

        assert!(!harness.tree[b].is_redundant());
        assert_eq!(pruning.pruned(), 0);
    }
}
