//! # discovery-kernel
//!
//! Level-by-level discovery of data-processing pipelines.
//!
//! Starting from a dataset sample, the kernel repeatedly applies every
//! applicable transformer from a catalog, producing a tree whose paths are
//! candidate pipelines and whose nodes record which applications the
//! transformed data satisfies.
//!
//! ## Core Contract
//!
//! 1. Nodes are expanded breadth-first, one level at a time
//! 2. A child equivalent to anything already explored (isomorphic up to
//!    blank renaming) is kept in the tree but marked redundant and never
//!    expanded
//! 3. A run can be halted by listeners, checkpointed and resumed in a fresh
//!    process with the same result as an uninterrupted run
//!
//! ## Architecture
//!
//! ```text
//! Dataset → DiscoveryBuilder → Discovery ─run─▶ Tree + Statistics
//!                                  │
//!        Expander ◀── frontier ────┤
//!           │                      ├── ListenerSet (limits, pruning, resources)
//!           ├── QueryEngine        └── checkpoint (save / resume)
//!           ├── NodeFilter
//!           └── SampleStore (memory, file, hierarchical)
//! ```
//!
//! ## Determinism Guarantees
//!
//! - Same dataset + same catalog + same configuration → same tree summary
//! - Applications and transformers are evaluated in catalog order
//! - Store iteration and checkpoint artifacts follow handle order

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod canonical;
pub mod checkpoint;
pub mod config;
pub mod discovery;
pub mod expand;
pub mod filter;
pub mod listener;
pub mod query;
pub mod statistics;
pub mod store;
pub mod tree;
pub mod types;

// Re-exports
pub use types::{
    Application, ApplicationIndex, Catalog, ConfigurationTemplate, Dataset, Descriptor, Feature,
    Sample, Statement, Term, Transformer, TransformerIndex,
};
pub use tree::{Node, NodeId, NodeRecord, NodeSummary, NodeVisitor, Tree, TreeError};
pub use query::{QueryEngine, QueryError, RegisteredQueryEngine};
pub use filter::{
    build_filter, is_isomorphic, DiffFilter, FilterError, FilterKind, IsomorphismFilter, NoOpFilter,
    NodeFilter,
};
pub use store::{
    FileSampleStore, HierarchicalSampleStore, MemorySampleStore, SampleGroup, SampleRef, SampleStore,
    StoreError,
};
pub use expand::{ExpandError, Expander, Expansion};
pub use listener::{
    DiscoveryListener, FixedResourceMonitor, LevelLimit, ListenerContext, ListenerSet, NodeTimeLimit,
    ResourceMonitor, ResourceStage, ResourceStrategy, ResourceUsage, StoreResourceMonitor,
    StrongGroupPruning, TimeLimit,
};
pub use statistics::{LevelStatistics, Statistics, StatisticsCollector, StatisticsHandle};
pub use checkpoint::{CheckpointError, CheckpointManifest, CHECKPOINT_SCHEMA_VERSION};
pub use config::{ConfigError, DiscoveryConfig, StorageKind, CONFIG_VERSION};
pub use discovery::{Discovery, DiscoveryBuilder, DiscoveryError, RunOutcome};
pub use canonical::{canonical_hash, canonical_hash_hex, to_canonical_bytes};
