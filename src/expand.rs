//! Expansion of a single node.
//!
//! ## Steps
//!
//! 1. Load the node's sample and build a fresh query store from it
//! 2. Match applications, then transformers, in catalog order
//! 3. Rewrite a fresh copy of the sample for each applicable transformer
//! 4. Ask the filter about each rewritten sample, in transformer order
//! 5. Store novel children under [`SampleGroup::Node`]; record redundant
//!    children without a sample
//! 6. Link the children, mark the node expanded, release its sample
//!
//! If the store runs out of capacity midway, the children created so far
//! are rolled back, together with their samples and the filter entries
//! accepted for them, and the node is left exactly as it was.

use std::sync::Arc;
use std::time::Instant;

use crate::filter::{FilterError, NodeFilter};
use crate::query::{QueryEngine, QueryError};
use crate::store::{SampleGroup, SampleRef, SampleStore, StoreError};
use crate::tree::{NodeId, Tree, TreeError};
use crate::types::{ApplicationIndex, Catalog, Feature, Sample, TransformerIndex};

/// Error type for node expansion.
#[derive(Debug, thiserror::Error)]
pub enum ExpandError {
    /// A query failed to evaluate.
    #[error("Query failed for {subject}: {source}")]
    Query {
        /// Application or transformer IRI, or the node for sample loads.
        subject: String,
        /// Engine error.
        #[source]
        source: QueryError,
    },
    /// The node has no sample handle.
    #[error("Node has no sample: {0}")]
    MissingSample(NodeId),
    /// Sample store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    /// Filter error.
    #[error("Filter error: {0}")]
    Filter(#[from] FilterError),
    /// Tree structure error.
    #[error("Tree error: {0}")]
    Tree(#[from] TreeError),
}

impl ExpandError {
    /// Whether this error signals memory exhaustion rather than a fault.
    pub fn is_resource_exhaustion(&self) -> bool {
        match self {
            Self::Store(e) | Self::Filter(FilterError::Store(e)) => e.is_resource_exhaustion(),
            _ => false,
        }
    }
}

/// Collaborators needed to expand nodes.
pub struct Expander<'a, Q: QueryEngine> {
    /// Immutable catalog.
    pub catalog: &'a Catalog,
    /// Query capability.
    pub engine: &'a Q,
    /// Redundancy filter.
    pub filter: &'a mut dyn NodeFilter,
    /// Sample store.
    pub store: &'a dyn SampleStore,
}

/// Result of expanding one node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expansion {
    /// Matched applications in catalog order.
    pub applications: Vec<ApplicationIndex>,
    /// Applicable transformers in catalog order.
    pub transformers: Vec<TransformerIndex>,
    /// Children in transformer order.
    pub children: Vec<NodeId>,
    /// Children found novel.
    pub kept: usize,
    /// Children found redundant.
    pub filtered: usize,
}

impl Expansion {
    /// Novel children, in order. These are the ones worth queueing.
    pub fn novel<'t>(&'t self, tree: &'t Tree) -> impl Iterator<Item = NodeId> + 't {
        self.children
            .iter()
            .copied()
            .filter(move |c| tree.node(*c).is_some_and(|n| !n.is_redundant()))
    }
}

impl<'a, Q: QueryEngine> Expander<'a, Q> {
    /// Expand `id` in place.
    pub fn expand(&mut self, tree: &mut Tree, id: NodeId) -> Result<Expansion, ExpandError> {
        let started = Instant::now();
        let node = tree.node(id).ok_or(TreeError::UnknownNode(id))?;
        if node.is_expanded() {
            return Err(TreeError::AlreadyExpanded(id).into());
        }
        let handle = node.sample().ok_or(ExpandError::MissingSample(id))?;
        let sample = self.store.load_required(&handle)?;

        let query_store = self.engine.load(&sample).map_err(|source| ExpandError::Query {
            subject: id.to_string(),
            source,
        })?;
        let applications = self.matching_applications(&query_store)?;
        let transformers = self.applicable_transformers(&query_store)?;
        drop(query_store);

        let mark = tree.len();
        let mut stored = Vec::new();
        let mut expansion = Expansion {
            applications,
            transformers,
            ..Expansion::default()
        };
        if let Err(e) = self.rewrite_children(tree, id, &sample, &mut expansion, &mut stored) {
            self.roll_back(tree, mark, &stored);
            if e.is_resource_exhaustion() {
                tracing::warn!(node = %id, error = %e, "Expansion rolled back on resource exhaustion");
            }
            return Err(e);
        }
        self.filter.commit();

        tree.finish_expansion(id, expansion.applications.clone(), expansion.children.clone())?;
        self.store.release_from_memory(&handle)?;

        tracing::debug!(
            node = %id,
            applications = expansion.applications.len(),
            transformers = expansion.transformers.len(),
            kept = expansion.kept,
            filtered = expansion.filtered,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Expanded node"
        );
        Ok(expansion)
    }

    /// Undo a partial expansion. Failures are logged so the caller still
    /// sees the error that stopped the expansion.
    fn roll_back(&mut self, tree: &mut Tree, mark: usize, stored: &[SampleRef]) {
        tree.truncate(mark);
        if let Err(e) = self.filter.roll_back() {
            tracing::warn!(error = %e, "Failed to roll back filter entries");
        }
        for handle in stored {
            if let Err(e) = self.store.remove(handle) {
                tracing::warn!(handle = %handle, error = %e, "Failed to remove rolled back sample");
            }
        }
    }

    fn rewrite_children(
        &mut self,
        tree: &mut Tree,
        id: NodeId,
        sample: &Sample,
        expansion: &mut Expansion,
        stored: &mut Vec<SampleRef>,
    ) -> Result<(), ExpandError> {
        for index in expansion.transformers.clone() {
            let Some(transformer) = self.catalog.transformer(index) else {
                continue;
            };
            let query_error = |source| ExpandError::Query {
                subject: transformer.iri.clone(),
                source,
            };
            let fresh = self.engine.load(sample).map_err(query_error)?;
            let rewritten = self
                .engine
                .rewrite(&fresh, transformer.query())
                .map_err(query_error)?;

            let child = tree.add_child(id, index, None, false)?;
            if self.filter.is_new_node(child, &rewritten)? {
                let rewritten = Arc::new(rewritten);
                let handle = self.store.store(Arc::clone(&rewritten), SampleGroup::Node)?;
                stored.push(handle);
                tree.set_sample(child, handle)?;
                self.filter.add_node(child, &rewritten)?;
                expansion.kept += 1;
            } else {
                tree.mark_redundant(child)?;
                expansion.filtered += 1;
            }
            expansion.children.push(child);
        }
        Ok(())
    }

    fn matching_applications(&self, store: &Q::Store) -> Result<Vec<ApplicationIndex>, ExpandError> {
        let mut matched = Vec::new();
        for (index, application) in self.catalog.applications.iter().enumerate() {
            if self.satisfies(store, &application.features, &application.iri)? {
                matched.push(index);
            }
        }
        Ok(matched)
    }

    fn applicable_transformers(&self, store: &Q::Store) -> Result<Vec<TransformerIndex>, ExpandError> {
        let mut applicable = Vec::new();
        for (index, transformer) in self.catalog.transformers.iter().enumerate() {
            if self.satisfies(store, &transformer.features, &transformer.iri)? {
                applicable.push(index);
            }
        }
        Ok(applicable)
    }

    /// All features hold, each feature holding when all its descriptors ask true.
    fn satisfies(&self, store: &Q::Store, features: &[Feature], subject: &str) -> Result<bool, ExpandError> {
        for feature in features {
            for descriptor in &feature.descriptors {
                let holds = self
                    .engine
                    .ask(store, &descriptor.query)
                    .map_err(|source| ExpandError::Query {
                        subject: subject.to_string(),
                        source,
                    })?;
                if !holds {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}
