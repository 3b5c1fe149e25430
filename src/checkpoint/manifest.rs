//! On-disk records of a checkpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::filter::FilterKind;
use crate::store::SampleGroup;

/// File names inside a checkpoint directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointPaths {
    /// Directory of statement files, one per stored sample.
    pub statements_dir: String,
    /// Node records, one JSON object per line.
    pub nodes: String,
    /// Frontier node names.
    pub queue: String,
    /// Filter kind and state.
    pub filter: String,
    /// Listener states by key.
    pub listeners: String,
    /// This manifest.
    pub manifest: String,
}

impl Default for CheckpointPaths {
    fn default() -> Self {
        Self {
            statements_dir: "statements".to_string(),
            nodes: "nodes.jsonl".to_string(),
            queue: "queue.json".to_string(),
            filter: "filter.json".to_string(),
            listeners: "listeners.json".to_string(),
            manifest: "manifest.json".to_string(),
        }
    }
}

/// Description of a saved checkpoint. Written last, so a directory without
/// a manifest holds no complete checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointManifest {
    /// Schema version.
    pub schema_version: String,
    /// Run identifier.
    pub iri: String,
    /// When the checkpoint was written.
    pub saved_at: DateTime<Utc>,
    /// Number of node records.
    pub node_count: usize,
    /// Number of redundant nodes.
    pub redundant_count: usize,
    /// Statement file names in handle order.
    pub sample_files: Vec<String>,
    /// Frontier length.
    pub frontier_len: usize,
    /// Filter strategy of the saved run.
    pub filter: FilterKind,
    /// Canonical hash of the node records.
    pub nodes_hash: String,
    /// Parameter hash of the configuration the run was built from.
    #[serde(default)]
    pub config_hash: Option<String>,
    /// Artifact file names.
    pub paths: CheckpointPaths,
}

/// One node as written to `nodes.jsonl`. Catalog entries are referred to by
/// IRI so a checkpoint survives catalog reordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeLine {
    /// Node name.
    pub name: String,
    /// Distance from the root.
    pub level: usize,
    /// IRI of the transformer that produced the node.
    pub transformer: Option<String>,
    /// IRIs of matched applications.
    pub applications: Vec<String>,
    /// Parent name.
    pub parent: Option<String>,
    /// Child names.
    pub next: Vec<String>,
    /// Statement file of the node's sample.
    pub sample: Option<String>,
    /// Pruned flag.
    pub redundant: bool,
    /// Expanded flag.
    pub expanded: bool,
}

/// Contents of `filter.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterRecord {
    /// Strategy.
    pub kind: FilterKind,
    /// Strategy-specific state.
    pub state: serde_json::Value,
}

/// Statement file name for the `ordinal`-th stored sample.
pub fn sample_file_name(group: SampleGroup, ordinal: usize) -> String {
    format!("{}-{:06}.jsonl", group.as_str(), ordinal)
}

/// Group encoded in a statement file name.
pub fn group_of_file(name: &str) -> Option<SampleGroup> {
    let (group, rest) = name.split_once('-')?;
    if !rest.ends_with(".jsonl") {
        return None;
    }
    SampleGroup::from_str(group)
}
