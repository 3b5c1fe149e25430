//! The discovery runner.
//!
//! A [`Discovery`] owns one exploration: the tree, the frontier, the
//! catalog, the query engine, the filter, the sample store and the
//! listeners. [`Discovery::run`] expands the frontier level by level until
//! it is empty, a listener vetoes, or the store runs out of capacity.
//!
//! ```text
//! DiscoveryBuilder ──build──▶ Discovery ──run──▶ RunOutcome
//!        │                        │
//!        └──resume(dir)◀──────────┴──save_checkpoint(dir)
//! ```
//!
//! ## Frontier
//!
//! The frontier is a FIFO queue. Children are appended after their parent
//! has been expanded, so the queue always holds at most two consecutive
//! levels and a level is complete when the head moves to a deeper node.

use std::collections::VecDeque;
use std::ops::ControlFlow;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

use crate::checkpoint::{self, CheckpointError, CheckpointManifest, CheckpointParts};
use crate::config::{ConfigError, DiscoveryConfig, StorageConfig, StorageKind};
use crate::expand::{ExpandError, Expander, Expansion};
use crate::filter::{build_filter, FilterError, FilterKind, NodeFilter};
use crate::listener::{
    DiscoveryListener, LevelLimit, ListenerContext, ListenerSet, NodeTimeLimit, ResourceStrategy,
    StoreResourceMonitor, StrongGroupPruning, TimeLimit,
};
use crate::query::QueryEngine;
use crate::statistics::{StatisticsCollector, StatisticsHandle};
use crate::store::{
    FileSampleStore, HierarchicalSampleStore, MemorySampleStore, SampleGroup, SampleStore, StoreError,
};
use crate::tree::{Node, NodeId, Tree};
use crate::types::{Catalog, Dataset};

/// Error type for discovery runs.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// The builder is missing a collaborator or the configuration is invalid.
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// Expanding a node failed. The run is aborted.
    #[error("Expansion of {node} failed: {source}")]
    Expansion {
        /// Node being expanded.
        node: NodeId,
        /// Cause.
        #[source]
        source: ExpandError,
    },
    /// The store ran out of capacity while expanding a node. The node was
    /// rolled back.
    #[error("Resource exhausted while expanding {0}")]
    ResourceExhausted(NodeId),
    /// Saving or loading a checkpoint failed.
    #[error("Persistence error: {0}")]
    Persistence(#[from] CheckpointError),
    /// Sample store error outside of an expansion.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    /// Filter error outside of an expansion.
    #[error("Filter error: {0}")]
    Filter(#[from] FilterError),
}

impl From<ConfigError> for DiscoveryError {
    fn from(e: ConfigError) -> Self {
        Self::Configuration(e.to_string())
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The frontier is empty.
    Exhausted,
    /// A listener halted the run.
    Vetoed,
    /// The store ran out of capacity. The unexpanded node is at the head of
    /// the frontier.
    ResourceExhausted,
}

/// Collaborators shared by `build` and `resume`.
struct Assembled<Q> {
    iri: String,
    catalog: Catalog,
    engine: Q,
    store: Arc<dyn SampleStore>,
    filter: Box<dyn NodeFilter>,
    listeners: ListenerSet,
    statistics: Option<StatisticsHandle>,
    config_hash: Option<String>,
    scratch: Option<TempDir>,
}

/// Builder for [`Discovery`].
pub struct DiscoveryBuilder<Q: QueryEngine> {
    dataset: Option<Dataset>,
    catalog: Option<Catalog>,
    engine: Option<Q>,
    filter_kind: Option<FilterKind>,
    filter: Option<Box<dyn NodeFilter>>,
    store: Option<Arc<dyn SampleStore>>,
    listeners: Vec<Box<dyn DiscoveryListener>>,
    iri: Option<String>,
    config: Option<DiscoveryConfig>,
    statistics: bool,
}

impl<Q: QueryEngine> Default for DiscoveryBuilder<Q> {
    fn default() -> Self {
        Self {
            dataset: None,
            catalog: None,
            engine: None,
            filter_kind: None,
            filter: None,
            store: None,
            listeners: Vec::new(),
            iri: None,
            config: None,
            statistics: false,
        }
    }
}

impl<Q: QueryEngine> DiscoveryBuilder<Q> {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Dataset whose sample becomes the root. Not needed for `resume`.
    pub fn dataset(mut self, dataset: Dataset) -> Self {
        self.dataset = Some(dataset);
        self
    }

    /// Applications and transformers.
    pub fn catalog(mut self, catalog: Catalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Query capability.
    pub fn query_engine(mut self, engine: Q) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Use a built-in filter over the run's store.
    pub fn filter(mut self, kind: FilterKind) -> Self {
        self.filter_kind = Some(kind);
        self
    }

    /// Use a custom filter instance.
    pub fn node_filter(mut self, filter: Box<dyn NodeFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Sample store.
    pub fn store(mut self, store: Arc<dyn SampleStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Register a listener. Listeners run in registration order, after the
    /// policies derived from the configuration.
    pub fn listener(mut self, listener: Box<dyn DiscoveryListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Run identifier. Defaults to a fresh `urn:uuid:` IRI.
    pub fn iri(mut self, iri: impl Into<String>) -> Self {
        self.iri = Some(iri.into());
        self
    }

    /// Collect per-level statistics.
    pub fn statistics(mut self, enabled: bool) -> Self {
        self.statistics = enabled;
        self
    }

    /// Derive filter, store and policies from `config`. Explicitly set
    /// filters and stores take precedence.
    pub fn with_config(mut self, config: DiscoveryConfig) -> Self {
        self.statistics = config.statistics;
        self.config = Some(config);
        self
    }

    /// Create a fresh discovery rooted at the dataset sample.
    pub fn build(mut self) -> Result<Discovery<Q>, DiscoveryError> {
        let dataset = self
            .dataset
            .take()
            .ok_or_else(|| DiscoveryError::Configuration("missing dataset".into()))?;
        let mut parts = self.assemble()?;

        let root = parts.store.store(Arc::new(dataset.sample), SampleGroup::Root)?;
        parts.filter.init(root)?;
        let tree = Tree::with_root(root);
        let frontier = VecDeque::from([tree.root()]);

        tracing::info!(
            iri = %parts.iri,
            dataset = %dataset.iri,
            applications = parts.catalog.applications.len(),
            transformers = parts.catalog.transformers.len(),
            filter = %parts.filter.kind(),
            listeners = parts.listeners.len(),
            "Created discovery"
        );
        Ok(Discovery::from_parts(parts, tree, frontier))
    }

    /// Rebuild a discovery from the checkpoint in `dir`. The run identifier
    /// of the checkpoint replaces any configured one.
    pub fn resume(self, dir: &Path) -> Result<Discovery<Q>, DiscoveryError> {
        let mut parts = self.assemble()?;
        let restored = checkpoint::load(
            dir,
            &parts.catalog,
            parts.store.as_ref(),
            parts.filter.as_mut(),
            &mut parts.listeners,
        )?;
        parts.iri = restored.iri;
        if let (Some(saved), Some(current)) = (&restored.manifest.config_hash, &parts.config_hash) {
            if saved != current {
                tracing::warn!(
                    saved = %saved,
                    current = %current,
                    "Resuming with a different configuration"
                );
            }
        }
        Ok(Discovery::from_parts(parts, restored.tree, restored.frontier))
    }

    fn assemble(self) -> Result<Assembled<Q>, DiscoveryError> {
        let catalog = self
            .catalog
            .ok_or_else(|| DiscoveryError::Configuration("missing catalog".into()))?;
        let engine = self
            .engine
            .ok_or_else(|| DiscoveryError::Configuration("missing query engine".into()))?;
        if let Some(config) = &self.config {
            config.validate()?;
        }

        let mut listeners = ListenerSet::new();
        let mut hierarchical = None;
        let mut scratch = None;
        let store = match (self.store, &self.config) {
            (Some(store), _) => store,
            (None, Some(config)) => {
                let built = build_store(&config.storage)?;
                hierarchical = built.tiers;
                scratch = built.scratch;
                built.store
            }
            (None, None) => return Err(DiscoveryError::Configuration("missing sample store".into())),
        };
        let filter = match (self.filter, self.filter_kind, &self.config) {
            (Some(filter), _, _) => filter,
            (None, Some(kind), _) => build_filter(kind, Arc::clone(&store)),
            (None, None, Some(config)) => build_filter(config.filter, Arc::clone(&store)),
            (None, None, None) => return Err(DiscoveryError::Configuration("missing filter".into())),
        };

        if let Some(config) = &self.config {
            if let Some(max) = config.level_limit {
                listeners.push(Box::new(LevelLimit::new(max)));
            }
            if let Some(secs) = config.time_limit_secs {
                listeners.push(Box::new(TimeLimit::new(Duration::from_secs(secs))));
            }
            if let Some(ms) = config.node_time_limit_ms {
                listeners.push(Box::new(NodeTimeLimit::new(Duration::from_millis(ms))));
            }
            if !config.strong_groups.is_empty() {
                listeners.push(Box::new(StrongGroupPruning::new(config.strong_groups.clone())));
            }
            if let (Some((tiers, primary)), Some(budget)) = (hierarchical, config.storage.memory_budget_bytes) {
                let monitor = StoreResourceMonitor::new(primary, budget);
                let strategy =
                    ResourceStrategy::with_thresholds(tiers, Box::new(monitor), config.resources.stage_thresholds)
                        .with_large_sample_statements(config.resources.large_sample_statements);
                listeners.push(Box::new(strategy));
            }
        }
        for listener in self.listeners {
            listeners.push(listener);
        }

        // Last, so it sees what earlier listeners did to each expansion.
        let statistics = if self.statistics {
            let collector = StatisticsCollector::new();
            let handle = collector.handle();
            listeners.push(Box::new(collector));
            Some(handle)
        } else {
            None
        };

        let config_hash = self.config.as_ref().map(DiscoveryConfig::params_hash);
        Ok(Assembled {
            iri: self
                .iri
                .unwrap_or_else(|| format!("urn:uuid:{}", uuid::Uuid::new_v4())),
            catalog,
            engine,
            store,
            filter,
            listeners,
            statistics,
            config_hash,
            scratch,
        })
    }
}

type Tiers = (Arc<HierarchicalSampleStore>, Arc<dyn SampleStore>);

struct BuiltStore {
    store: Arc<dyn SampleStore>,
    /// Typed hierarchical store and its primary tier, for the resource strategy.
    tiers: Option<Tiers>,
    /// Directory created for file-backed tiers, removed on drop.
    scratch: Option<TempDir>,
}

/// Build the configured store.
fn build_store(storage: &StorageConfig) -> Result<BuiltStore, DiscoveryError> {
    let memory = || match storage.memory_budget_bytes {
        Some(budget) => MemorySampleStore::with_capacity(budget),
        None => MemorySampleStore::new(),
    };
    let file = || -> Result<(FileSampleStore, Option<TempDir>), DiscoveryError> {
        let (directory, scratch) = match &storage.directory {
            Some(directory) => (directory.clone(), None),
            None => {
                let scratch = tempfile::Builder::new()
                    .prefix("discovery-")
                    .tempdir()
                    .map_err(StoreError::from)?;
                (scratch.path().to_path_buf(), Some(scratch))
            }
        };
        let store = FileSampleStore::with_cache_entries(directory, storage.file_cache_entries)?;
        Ok((store, scratch))
    };
    match storage.kind {
        StorageKind::Memory => Ok(BuiltStore {
            store: Arc::new(memory()),
            tiers: None,
            scratch: None,
        }),
        StorageKind::File => {
            let (store, scratch) = file()?;
            Ok(BuiltStore {
                store: Arc::new(store),
                tiers: None,
                scratch,
            })
        }
        StorageKind::Hierarchical => {
            let primary: Arc<dyn SampleStore> = Arc::new(memory());
            let (secondary, scratch) = file()?;
            let tiers = Arc::new(HierarchicalSampleStore::new(Arc::clone(&primary), Arc::new(secondary)));
            let store: Arc<dyn SampleStore> = tiers.clone();
            Ok(BuiltStore {
                store,
                tiers: Some((tiers, primary)),
                scratch,
            })
        }
    }
}

/// One exploration of a dataset.
pub struct Discovery<Q: QueryEngine> {
    iri: String,
    catalog: Catalog,
    engine: Q,
    store: Arc<dyn SampleStore>,
    filter: Box<dyn NodeFilter>,
    listeners: ListenerSet,
    tree: Tree,
    frontier: VecDeque<NodeId>,
    statistics: Option<StatisticsHandle>,
    config_hash: Option<String>,
    cleaned: bool,
    scratch: Option<TempDir>,
}

impl<Q: QueryEngine> Discovery<Q> {
    fn from_parts(parts: Assembled<Q>, tree: Tree, frontier: VecDeque<NodeId>) -> Self {
        Self {
            iri: parts.iri,
            catalog: parts.catalog,
            engine: parts.engine,
            store: parts.store,
            filter: parts.filter,
            listeners: parts.listeners,
            tree,
            frontier,
            statistics: parts.statistics,
            config_hash: parts.config_hash,
            cleaned: false,
            scratch: parts.scratch,
        }
    }

    /// Run identifier.
    pub fn iri(&self) -> &str {
        &self.iri
    }

    /// Exploration tree.
    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    /// Nodes waiting for expansion, head first.
    pub fn frontier(&self) -> &VecDeque<NodeId> {
        &self.frontier
    }

    /// Catalog of the run.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Sample store of the run.
    pub fn store(&self) -> &Arc<dyn SampleStore> {
        &self.store
    }

    /// Redundancy filter of the run.
    pub fn filter(&self) -> &dyn NodeFilter {
        self.filter.as_ref()
    }

    /// Registered listeners.
    pub fn listeners(&self) -> &ListenerSet {
        &self.listeners
    }

    /// Statistics, if collected.
    pub fn statistics(&self) -> Option<StatisticsHandle> {
        self.statistics.clone()
    }

    /// Directory created for file-backed storage when none was configured.
    pub fn scratch_directory(&self) -> Option<&Path> {
        self.scratch.as_ref().map(TempDir::path)
    }

    /// Drop unexpanded and redundant children from the tree. Returns the
    /// number of links removed.
    pub fn shake(&mut self) -> usize {
        self.tree.shake()
    }

    /// Expand the frontier until it is empty or the run is halted.
    pub fn run(&mut self) -> Result<RunOutcome, DiscoveryError> {
        let started = Instant::now();
        tracing::info!(
            iri = %self.iri,
            nodes = self.tree.len(),
            frontier = self.frontier.len(),
            "Discovery started"
        );
        {
            let (listeners, mut ctx) = self.split();
            listeners.discovery_will_run(&mut ctx);
        }

        let result = self.run_levels();

        {
            let (listeners, mut ctx) = self.split();
            listeners.discovery_did_run(&mut ctx);
        }
        match &result {
            Ok(outcome) => tracing::info!(
                iri = %self.iri,
                outcome = ?outcome,
                nodes = self.tree.len(),
                expanded = self.tree.count_expanded(),
                redundant = self.tree.count_redundant(),
                frontier = self.frontier.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Discovery finished"
            ),
            Err(e) => tracing::error!(iri = %self.iri, error = %e, "Discovery failed"),
        }
        result
    }

    fn run_levels(&mut self) -> Result<RunOutcome, DiscoveryError> {
        loop {
            if let ControlFlow::Break(outcome) = self.expand_level()? {
                return Ok(outcome);
            }
        }
    }

    /// Expand every queued node of the level at the head of the frontier.
    ///
    /// Breaks with the outcome when the run must stop, including
    /// [`RunOutcome::Exhausted`] when the frontier is empty.
    pub fn expand_level(&mut self) -> Result<ControlFlow<RunOutcome>, DiscoveryError> {
        let Some(level) = self.head_level() else {
            return Ok(ControlFlow::Break(RunOutcome::Exhausted));
        };
        tracing::debug!(level, queued = self.frontier.len(), "Expanding level");

        while let Some(id) = self.frontier.front().copied() {
            let Some(node) = self.tree.node(id) else {
                self.frontier.pop_front();
                continue;
            };
            if node.level() != level {
                break;
            }
            if node.is_redundant() || node.is_expanded() {
                self.frontier.pop_front();
                continue;
            }

            let proceed = {
                let (listeners, mut ctx) = self.split();
                listeners.node_will_expand(id, &mut ctx)
            };
            if !proceed {
                return Ok(ControlFlow::Break(RunOutcome::Vetoed));
            }

            if let Err(e) = self.expand_node(id) {
                return match e {
                    DiscoveryError::ResourceExhausted(node) => {
                        tracing::warn!(node = %node, level, "Frontier exhausted by resource limits");
                        Ok(ControlFlow::Break(RunOutcome::ResourceExhausted))
                    }
                    other => Err(other),
                };
            }
            self.frontier.pop_front();

            let proceed = {
                let (listeners, mut ctx) = self.split();
                listeners.node_did_expand(id, &mut ctx)
            };
            let queued: Vec<NodeId> = self
                .tree
                .children(id)
                .iter()
                .copied()
                .filter(|c| self.tree.node(*c).is_some_and(|n| !n.is_redundant() && n.sample().is_some()))
                .collect();
            self.frontier.extend(queued);
            if !proceed {
                return Ok(ControlFlow::Break(RunOutcome::Vetoed));
            }
        }

        self.filter.log_after_level_finished();
        let proceed = {
            let (listeners, mut ctx) = self.split();
            listeners.level_did_end(level, &mut ctx)
        };
        if !proceed {
            return Ok(ControlFlow::Break(RunOutcome::Vetoed));
        }
        Ok(ControlFlow::Continue(()))
    }

    /// Expand one node without consulting listeners or touching the
    /// frontier.
    pub fn expand_node(&mut self, id: NodeId) -> Result<Expansion, DiscoveryError> {
        let mut expander = Expander {
            catalog: &self.catalog,
            engine: &self.engine,
            filter: self.filter.as_mut(),
            store: self.store.as_ref(),
        };
        expander.expand(&mut self.tree, id).map_err(|source| {
            if source.is_resource_exhaustion() {
                DiscoveryError::ResourceExhausted(id)
            } else {
                DiscoveryError::Expansion { node: id, source }
            }
        })
    }

    /// Write a checkpoint of the current state into `dir`.
    pub fn save_checkpoint(&self, dir: &Path) -> Result<CheckpointManifest, DiscoveryError> {
        let parts = CheckpointParts {
            tree: &self.tree,
            frontier: &self.frontier,
            catalog: &self.catalog,
            store: self.store.as_ref(),
            filter: self.filter.as_ref(),
            listeners: &self.listeners,
            iri: &self.iri,
            config_hash: self.config_hash.as_deref(),
        };
        Ok(checkpoint::save(dir, &parts)?)
    }

    /// Release listener resources, the filter's kept samples and every
    /// stored sample, then remove the scratch directory if one was created.
    /// Safe to call more than once.
    pub fn clean_up(&mut self) -> Result<(), DiscoveryError> {
        if self.cleaned {
            return Ok(());
        }
        self.listeners.clean_up();
        self.filter.clean_up()?;
        self.store.remove_all()?;
        if let Some(scratch) = self.scratch.take() {
            scratch.close().map_err(StoreError::from)?;
        }
        self.cleaned = true;
        tracing::info!(iri = %self.iri, "Discovery cleaned up");
        Ok(())
    }

    fn head_level(&self) -> Option<usize> {
        self.frontier
            .front()
            .and_then(|id| self.tree.node(*id))
            .map(Node::level)
    }

    fn split(&mut self) -> (&mut ListenerSet, ListenerContext<'_>) {
        (
            &mut self.listeners,
            ListenerContext {
                tree: &mut self.tree,
                frontier: &self.frontier,
                catalog: &self.catalog,
                store: self.store.as_ref(),
                iri: &self.iri,
            },
        )
    }
}

impl<Q: QueryEngine> std::fmt::Debug for Discovery<Q> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Discovery")
            .field("iri", &self.iri)
            .field("nodes", &self.tree.len())
            .field("frontier", &self.frontier.len())
            .field("filter", &self.filter.kind())
            .field("listeners", &self.listeners)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::RegisteredQueryEngine;
    use crate::types::{Application, Feature, Sample, Statement, Term, Transformer};

    fn marker(name: &str) -> Statement {
        Statement::new(Term::iri("ds"), Term::iri("has"), Term::literal(name))
    }

    fn dataset() -> Dataset {
        let sample: Sample = [Statement::new(Term::iri("ds"), Term::iri("title"), Term::literal("t"))]
            .into_iter()
            .collect();
        Dataset::new("ds:1", "Dataset", sample)
    }

    fn catalog() -> Catalog {
        Catalog::new(
            vec![Application::new("app:both", "Both", vec![
                Feature::single("f:m1", "ASK m1"),
                Feature::single("f:m2", "ASK m2"),
            ])],
            vec![
                Transformer::new("tr:m1", "Add m1", vec![Feature::single("f:no-m1", "ASK no m1")], "ADD m1"),
                Transformer::new("tr:m2", "Add m2", vec![Feature::single("f:no-m2", "ASK no m2")], "ADD m2"),
            ],
        )
    }

    fn engine() -> RegisteredQueryEngine {
        let mut engine = RegisteredQueryEngine::new();
        for name in ["m1", "m2"] {
            engine = engine
                .with_ask(format!("ASK {name}"), move |s| s.contains(&marker(name)))
                .with_ask(format!("ASK no {name}"), move |s| !s.contains(&marker(name)))
                .with_rewrite(format!("ADD {name}"), move |s| {
                    let mut out = s.clone();
                    out.insert(marker(name));
                    out
                });
        }
        engine
    }

    fn builder() -> DiscoveryBuilder<RegisteredQueryEngine> {
        DiscoveryBuilder::new()
            .dataset(dataset())
            .catalog(catalog())
            .query_engine(engine())
    }

    #[test]
    fn test_missing_collaborators() {
        let err = DiscoveryBuilder::<RegisteredQueryEngine>::new()
            .catalog(catalog())
            .build()
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::Configuration(m) if m.contains("dataset")));

        let err = builder().filter(FilterKind::Diff).build().unwrap_err();
        assert!(matches!(err, DiscoveryError::Configuration(m) if m.contains("store")));
    }

    #[test]
    fn test_run_to_exhaustion() {
        let mut discovery = builder()
            .store(Arc::new(MemorySampleStore::new()))
            .filter(FilterKind::Diff)
            .statistics(true)
            .build()
            .unwrap();
        assert!(discovery.iri().starts_with("urn:uuid:"));

        assert_eq!(discovery.run().unwrap(), RunOutcome::Exhausted);
        let tree = discovery.tree();
        assert_eq!(tree.len(), 5);
        assert_eq!(tree.count_redundant(), 1);
        assert_eq!(tree.count_expanded(), 4);
        assert!(discovery.frontier().is_empty());

        let stats = discovery.statistics().unwrap().snapshot();
        assert_eq!(stats.levels.len(), 3);
        assert_eq!(stats.total_filtered(), 1);
        assert!(stats.applications().contains("app:both"));
    }

    #[test]
    fn test_config_level_limit() {
        let config = DiscoveryConfig {
            level_limit: Some(1),
            ..DiscoveryConfig::default()
        };
        let mut discovery = builder().with_config(config).build().unwrap();

        assert_eq!(discovery.run().unwrap(), RunOutcome::Vetoed);
        assert_eq!(discovery.tree().count_expanded(), 3);
        assert_eq!(discovery.frontier().len(), 1);
        assert!(discovery.tree().nodes().filter(|n| n.is_expanded()).all(|n| n.level() <= 1));
        assert_eq!(discovery.statistics().unwrap().snapshot().levels.len(), 2);
    }

    #[test]
    fn test_vetoed_rerun_opens_no_statistics_level() {
        let config = DiscoveryConfig {
            level_limit: Some(1),
            ..DiscoveryConfig::default()
        };
        let mut discovery = builder().with_config(config).build().unwrap();
        assert_eq!(discovery.run().unwrap(), RunOutcome::Vetoed);

        // The level limit now vetoes the head node in node_will_expand.
        assert_eq!(discovery.run().unwrap(), RunOutcome::Vetoed);
        let stats = discovery.statistics().unwrap().snapshot();
        assert_eq!(stats.levels.len(), 2);
        assert!(stats.levels.iter().all(|l| l.finished));
        assert_eq!(stats.levels[1].nodes_at_start, 2);
    }

    #[test]
    fn test_scratch_directory_removed_on_clean_up() {
        let mut config = DiscoveryConfig::default();
        config.storage.kind = StorageKind::File;
        let mut discovery = builder().with_config(config).build().unwrap();
        let scratch = discovery.scratch_directory().unwrap().to_path_buf();
        discovery.run().unwrap();
        assert!(std::fs::read_dir(&scratch).unwrap().count() > 0);

        discovery.clean_up().unwrap();
        assert!(!scratch.exists());
        assert!(discovery.scratch_directory().is_none());

        let mut config = DiscoveryConfig::default();
        config.storage.kind = StorageKind::Hierarchical;
        let discovery = builder().with_config(config).build().unwrap();
        let scratch = discovery.scratch_directory().unwrap().to_path_buf();
        assert!(scratch.exists());
        drop(discovery);
        assert!(!scratch.exists());
    }

    #[test]
    fn test_checkpoint_records_config_hash() {
        let config = DiscoveryConfig {
            level_limit: Some(1),
            ..DiscoveryConfig::default()
        };
        let hash = config.params_hash();
        let mut discovery = builder().with_config(config).build().unwrap();
        discovery.run().unwrap();

        let dir = tempfile::TempDir::new().unwrap();
        let manifest = discovery.save_checkpoint(dir.path()).unwrap();
        assert_eq!(manifest.config_hash, Some(hash));

        let manual = builder()
            .store(Arc::new(MemorySampleStore::new()))
            .filter(FilterKind::Diff)
            .build()
            .unwrap();
        let other = tempfile::TempDir::new().unwrap();
        assert_eq!(manual.save_checkpoint(other.path()).unwrap().config_hash, None);
    }

    #[test]
    fn test_resource_exhaustion_keeps_results() {
        let root_bytes = dataset().sample.estimated_bytes();
        let mut discovery = builder()
            .store(Arc::new(MemorySampleStore::with_capacity(root_bytes + 1)))
            .filter(FilterKind::None)
            .build()
            .unwrap();

        assert_eq!(discovery.run().unwrap(), RunOutcome::ResourceExhausted);
        let root = discovery.tree().root();
        assert_eq!(discovery.frontier().front(), Some(&root));
        assert_eq!(discovery.tree().len(), 1);
        assert!(!discovery.tree()[root].is_expanded());

        let err = discovery.expand_node(root).unwrap_err();
        assert!(matches!(err, DiscoveryError::ResourceExhausted(n) if n == root));
    }

    #[test]
    fn test_clean_up_empties_store() {
        let store: Arc<dyn SampleStore> = Arc::new(MemorySampleStore::new());
        let mut discovery = builder()
            .store(Arc::clone(&store))
            .filter(FilterKind::Isomorphism)
            .build()
            .unwrap();
        discovery.run().unwrap();
        assert!(!store.is_empty());

        discovery.clean_up().unwrap();
        discovery.clean_up().unwrap();
        assert!(store.is_empty());
    }
}
