//! Checkpoint and resume.
//!
//! A checkpoint is a directory holding everything needed to continue a run
//! in a fresh process:
//!
//! ```text
//! statements/<group>-<ordinal>.jsonl   one file per stored sample
//! nodes.jsonl                          node records, parents first
//! queue.json                           frontier node names
//! filter.json                          { kind, state }
//! listeners.json                       listener states by key
//! manifest.json                        counts, hashes, file list
//! ```
//!
//! Stores hand out opaque handles, so samples are written under file names
//! and every other artifact refers to them by name. Loading re-stores the
//! files under new handles and translates names back.
//!
//! ## Reference counts after loading
//!
//! Every restored sample starts with one user. Samples of expanded or
//! redundant nodes are then released, and the filter acquires whatever it
//! holds while loading, which reproduces the counts of the saved run.

pub mod manifest;

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use crate::canonical::canonical_hash_hex;
use crate::filter::{FilterError, FilterKind, NodeFilter, SampleHandles, SampleNames};
use crate::listener::ListenerSet;
use crate::store::{SampleRef, SampleStore, StoreError};
use crate::tree::{Node, NodeId, NodeRecord, Tree};
use crate::types::{Catalog, Sample};

pub use manifest::{CheckpointManifest, CheckpointPaths, FilterRecord, NodeLine};

/// Checkpoint schema version. Increment on breaking changes.
pub const CHECKPOINT_SCHEMA_VERSION: &str = "discovery_checkpoint_v1";

/// Error type for checkpoint save and load.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// File system error.
    #[error("Checkpoint IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Malformed JSON artifact.
    #[error("Checkpoint JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// Sample store error.
    #[error("Checkpoint store error: {0}")]
    Store(#[from] StoreError),
    /// Filter state could not be saved or restored.
    #[error("Checkpoint filter error: {0}")]
    Filter(#[from] FilterError),
    /// A node refers to a transformer missing from the catalog.
    #[error("Unknown transformer: {0}")]
    UnknownTransformer(String),
    /// A node refers to an application missing from the catalog.
    #[error("Unknown application: {0}")]
    UnknownApplication(String),
    /// A node refers to a sample that is not part of the checkpoint.
    #[error("Unknown sample: {0}")]
    UnknownSample(String),
    /// A record refers to a node that does not precede it.
    #[error("Unknown node: {0}")]
    UnknownNode(String),
    /// The saved filter differs from the one configured for the resumed run.
    #[error("Filter mismatch: configured {expected}, saved {found}")]
    FilterMismatch {
        /// Configured strategy.
        expected: FilterKind,
        /// Saved strategy.
        found: FilterKind,
    },
    /// Unsupported schema version.
    #[error("Schema version mismatch: expected {expected}, found {found}")]
    SchemaVersion {
        /// Supported version.
        expected: String,
        /// Version in the manifest.
        found: String,
    },
    /// Artifacts disagree with each other.
    #[error("Inconsistent checkpoint: {0}")]
    Inconsistent(String),
}

/// Run state to save.
pub struct CheckpointParts<'a> {
    /// Exploration tree.
    pub tree: &'a Tree,
    /// Frontier, head first.
    pub frontier: &'a VecDeque<NodeId>,
    /// Catalog the tree's indices refer to.
    pub catalog: &'a Catalog,
    /// Sample store.
    pub store: &'a dyn SampleStore,
    /// Redundancy filter.
    pub filter: &'a dyn NodeFilter,
    /// Listeners whose state is saved.
    pub listeners: &'a ListenerSet,
    /// Run identifier.
    pub iri: &'a str,
    /// Parameter hash of the run's configuration, if it has one.
    pub config_hash: Option<&'a str>,
}

/// Run state rebuilt from a checkpoint.
#[derive(Debug)]
pub struct Restored {
    /// Exploration tree.
    pub tree: Tree,
    /// Frontier, head first.
    pub frontier: VecDeque<NodeId>,
    /// Run identifier.
    pub iri: String,
    /// Manifest of the loaded checkpoint.
    pub manifest: CheckpointManifest,
}

/// Write a checkpoint of `parts` into `dir`, replacing any previous one.
pub fn save(dir: &Path, parts: &CheckpointParts<'_>) -> Result<CheckpointManifest, CheckpointError> {
    let paths = CheckpointPaths::default();
    let statements = dir.join(&paths.statements_dir);
    fs::create_dir_all(&statements)?;
    remove_statement_files(&statements)?;
    match fs::remove_file(dir.join(&paths.manifest)) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
        _ => {}
    }

    let mut names = SampleNames::new();
    let mut sample_files = Vec::new();
    for (ordinal, handle) in parts.store.handles().into_iter().enumerate() {
        let name = manifest::sample_file_name(handle.group(), ordinal);
        parts.store.add_reference_user(&handle)?;
        let written = write_sample(parts.store, &handle, &statements.join(&name));
        parts.store.release_from_memory(&handle)?;
        written?;
        names.insert(handle, name.clone());
        sample_files.push(name);
    }

    let filter = FilterRecord {
        kind: parts.filter.kind(),
        state: parts.filter.save(&names)?,
    };
    write_json(&dir.join(&paths.filter), &filter)?;

    let lines = node_lines(parts.tree, parts.catalog, &names)?;
    let mut writer = BufWriter::new(File::create(dir.join(&paths.nodes))?);
    for line in &lines {
        serde_json::to_writer(&mut writer, line)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;

    let queue: Vec<String> = parts.frontier.iter().map(NodeId::name).collect();
    write_json(&dir.join(&paths.queue), &queue)?;

    let mut listeners = BTreeMap::new();
    for listener in parts.listeners.iter() {
        if let (Some(key), Some(state)) = (listener.checkpoint_key(), listener.save_state()) {
            listeners.insert(key.to_string(), state);
        }
    }
    write_json(&dir.join(&paths.listeners), &listeners)?;

    let manifest = CheckpointManifest {
        schema_version: CHECKPOINT_SCHEMA_VERSION.to_string(),
        iri: parts.iri.to_string(),
        saved_at: chrono::Utc::now(),
        node_count: lines.len(),
        redundant_count: lines.iter().filter(|l| l.redundant).count(),
        sample_files,
        frontier_len: queue.len(),
        filter: filter.kind,
        nodes_hash: canonical_hash_hex(&lines),
        config_hash: parts.config_hash.map(str::to_string),
        paths,
    };
    write_json(&dir.join(&manifest.paths.manifest), &manifest)?;

    tracing::info!(
        dir = %dir.display(),
        nodes = manifest.node_count,
        samples = manifest.sample_files.len(),
        frontier = manifest.frontier_len,
        "Saved checkpoint"
    );
    Ok(manifest)
}

/// Read a checkpoint from `dir`.
///
/// Samples are stored into `store`, `filter` is loaded from its saved state
/// and listeners with a checkpoint key get their state back. On failure,
/// samples already restored are removed from `store` again.
pub fn load(
    dir: &Path,
    catalog: &Catalog,
    store: &dyn SampleStore,
    filter: &mut dyn NodeFilter,
    listeners: &mut ListenerSet,
) -> Result<Restored, CheckpointError> {
    let manifest: CheckpointManifest =
        read_json(&dir.join(CheckpointPaths::default().manifest))?;
    if manifest.schema_version != CHECKPOINT_SCHEMA_VERSION {
        return Err(CheckpointError::SchemaVersion {
            expected: CHECKPOINT_SCHEMA_VERSION.to_string(),
            found: manifest.schema_version,
        });
    }

    let mut handles = SampleHandles::new();
    match restore(dir, &manifest, catalog, store, filter, listeners, &mut handles) {
        Ok((tree, frontier)) => {
            tracing::info!(
                dir = %dir.display(),
                iri = %manifest.iri,
                nodes = tree.len(),
                frontier = frontier.len(),
                "Loaded checkpoint"
            );
            Ok(Restored {
                tree,
                frontier,
                iri: manifest.iri.clone(),
                manifest,
            })
        }
        Err(e) => {
            for handle in handles.values() {
                if let Err(remove) = store.remove(handle) {
                    tracing::warn!(handle = %handle, error = %remove, "Failed to discard restored sample");
                }
            }
            Err(e)
        }
    }
}

fn restore(
    dir: &Path,
    manifest: &CheckpointManifest,
    catalog: &Catalog,
    store: &dyn SampleStore,
    filter: &mut dyn NodeFilter,
    listeners: &mut ListenerSet,
    handles: &mut SampleHandles,
) -> Result<(Tree, VecDeque<NodeId>), CheckpointError> {
    let paths = &manifest.paths;

    let statements = dir.join(&paths.statements_dir);
    for name in &manifest.sample_files {
        let group = manifest::group_of_file(name)
            .ok_or_else(|| CheckpointError::Inconsistent(format!("bad statement file name {name}")))?;
        let sample = Sample::read_jsonl(BufReader::new(File::open(statements.join(name))?))?;
        let handle = store.store(Arc::new(sample), group)?;
        handles.insert(name.clone(), handle);
    }

    let reader = BufReader::new(File::open(dir.join(&paths.nodes))?);
    let mut lines = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if !line.trim().is_empty() {
            lines.push(serde_json::from_str::<NodeLine>(&line)?);
        }
    }
    if canonical_hash_hex(&lines) != manifest.nodes_hash {
        return Err(CheckpointError::Inconsistent(
            "node records do not match the manifest hash".into(),
        ));
    }
    let tree = rebuild_tree(lines, catalog, handles)?;

    let record: FilterRecord = read_json(&dir.join(&paths.filter))?;
    if record.kind != filter.kind() {
        return Err(CheckpointError::FilterMismatch {
            expected: filter.kind(),
            found: record.kind,
        });
    }
    filter.load(record.state, handles)?;

    // Consumers of these samples are done with them.
    for node in tree.nodes() {
        if let Some(handle) = node.sample().filter(|_| node.is_expanded() || node.is_redundant()) {
            store.release_from_memory(&handle)?;
        }
    }

    let queue: Vec<String> = read_json(&dir.join(&paths.queue))?;
    let mut frontier = VecDeque::with_capacity(queue.len());
    for name in queue {
        match NodeId::from_name(&name).filter(|id| id.index() < tree.len()) {
            Some(id) => frontier.push_back(id),
            None => return Err(CheckpointError::UnknownNode(name)),
        }
    }

    let mut states: BTreeMap<String, serde_json::Value> = read_json(&dir.join(&paths.listeners))?;
    for listener in listeners.iter_mut() {
        if let Some(state) = listener.checkpoint_key().and_then(|key| states.remove(key)) {
            listener.restore_state(state)?;
        }
    }
    for key in states.keys() {
        tracing::warn!(key = %key, "No listener for checkpointed state");
    }

    Ok((tree, frontier))
}

fn node_lines(tree: &Tree, catalog: &Catalog, names: &SampleNames) -> Result<Vec<NodeLine>, CheckpointError> {
    let mut lines = Vec::with_capacity(tree.len());
    for node in tree.nodes() {
        let transformer = match node.transformer() {
            Some(index) => Some(
                catalog
                    .transformer(index)
                    .ok_or_else(|| CheckpointError::UnknownTransformer(format!("#{index}")))?
                    .iri
                    .clone(),
            ),
            None => None,
        };
        let applications = node
            .applications()
            .iter()
            .map(|&index| {
                catalog
                    .application(index)
                    .map(|a| a.iri.clone())
                    .ok_or_else(|| CheckpointError::UnknownApplication(format!("#{index}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let sample = match node.sample() {
            Some(handle) => Some(
                names
                    .get(&handle)
                    .cloned()
                    .ok_or_else(|| CheckpointError::UnknownSample(handle.to_string()))?,
            ),
            None => None,
        };
        lines.push(NodeLine {
            name: node.id().name(),
            level: node.level(),
            transformer,
            applications,
            parent: node.parent().map(|p| p.name()),
            next: node.next().iter().map(NodeId::name).collect(),
            sample,
            redundant: node.is_redundant(),
            expanded: node.is_expanded(),
        });
    }
    Ok(lines)
}

fn rebuild_tree(lines: Vec<NodeLine>, catalog: &Catalog, handles: &SampleHandles) -> Result<Tree, CheckpointError> {
    let mut seen = BTreeSet::new();
    let mut nodes: Vec<Node> = Vec::with_capacity(lines.len());
    for line in lines {
        if let Some(parent) = line.parent.as_ref().filter(|p| !seen.contains(*p)) {
            return Err(CheckpointError::UnknownNode(parent.clone()));
        }
        let transformer = match &line.transformer {
            Some(iri) => Some(
                catalog
                    .transformer_index(iri)
                    .ok_or_else(|| CheckpointError::UnknownTransformer(iri.clone()))?,
            ),
            None => None,
        };
        let applications = line
            .applications
            .iter()
            .map(|iri| {
                catalog
                    .application_index(iri)
                    .ok_or_else(|| CheckpointError::UnknownApplication(iri.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let sample: Option<SampleRef> = match &line.sample {
            Some(name) => Some(
                handles
                    .get(name)
                    .copied()
                    .ok_or_else(|| CheckpointError::UnknownSample(name.clone()))?,
            ),
            None => None,
        };
        seen.insert(line.name.clone());
        let name = line.name.clone();
        let record = NodeRecord {
            name: line.name,
            level: line.level,
            transformer,
            applications,
            redundant: line.redundant,
            expanded: line.expanded,
            sample,
            parent: line.parent,
            next: line.next,
        };
        let node = record
            .into_node()
            .ok_or_else(|| CheckpointError::Inconsistent(format!("malformed node record {name}")))?;
        nodes.push(node);
    }
    Tree::from_nodes(nodes)
        .ok_or_else(|| CheckpointError::Inconsistent("node records do not form a tree".into()))
}

fn remove_statement_files(dir: &Path) -> Result<(), CheckpointError> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "jsonl") {
            fs::remove_file(path)?;
        }
    }
    Ok(())
}

fn write_sample(store: &dyn SampleStore, handle: &SampleRef, path: &Path) -> Result<(), CheckpointError> {
    let sample = store.load_required(handle)?;
    sample.write_jsonl(BufWriter::new(File::create(path)?))?;
    Ok(())
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), CheckpointError> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()?;
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, CheckpointError> {
    Ok(serde_json::from_reader(BufReader::new(File::open(path)?))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{DiffFilter, IsomorphismFilter};
    use crate::statistics::StatisticsCollector;
    use crate::store::{MemorySampleStore, SampleGroup};
    use crate::types::{Application, Statement, Term, Transformer};
    use tempfile::TempDir;

    struct Saved {
        catalog: Catalog,
        store: Arc<MemorySampleStore>,
        filter: DiffFilter,
        tree: Tree,
        frontier: VecDeque<NodeId>,
        child_sample: Sample,
    }

    fn st(o: &str) -> Statement {
        Statement::new(Term::iri("ds"), Term::iri("p"), Term::literal(o))
    }

    fn fixture() -> Saved {
        let catalog = Catalog::new(
            vec![Application::new("app:a", "A", vec![])],
            vec![
                Transformer::new("tr:x", "X", vec![], "X"),
                Transformer::new("tr:y", "Y", vec![], "Y"),
            ],
        );
        let store = Arc::new(MemorySampleStore::new());
        let root_sample: Sample = [st("root")].into_iter().collect();
        let root = store.store(Arc::new(root_sample.clone()), SampleGroup::Root).unwrap();
        let mut filter = DiffFilter::new(store.clone());
        filter.init(root).unwrap();

        let mut tree = Tree::with_root(root);
        let root_id = tree.root();
        let mut child_sample = root_sample;
        child_sample.insert(st("x"));
        let child = tree.add_child(root_id, 0, None, false).unwrap();
        assert!(filter.is_new_node(child, &child_sample).unwrap());
        let handle = store.store(Arc::new(child_sample.clone()), SampleGroup::Node).unwrap();
        tree.set_sample(child, handle).unwrap();
        filter.add_node(child, &child_sample).unwrap();
        let redundant = tree.add_child(root_id, 1, None, true).unwrap();
        tree.finish_expansion(root_id, vec![0], vec![child, redundant]).unwrap();
        store.release_from_memory(&root).unwrap();

        Saved {
            catalog,
            store,
            filter,
            tree,
            frontier: VecDeque::from([child]),
            child_sample,
        }
    }

    fn save_fixture(saved: &Saved, dir: &Path, listeners: &ListenerSet) -> CheckpointManifest {
        save(
            dir,
            &CheckpointParts {
                tree: &saved.tree,
                frontier: &saved.frontier,
                catalog: &saved.catalog,
                store: saved.store.as_ref(),
                filter: &saved.filter,
                listeners,
                iri: "urn:run:1",
                config_hash: Some("0123456789abcdef"),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let saved = fixture();
        let manifest = save_fixture(&saved, dir.path(), &ListenerSet::new());
        assert_eq!(manifest.node_count, 3);
        assert_eq!(manifest.redundant_count, 1);
        assert_eq!(manifest.config_hash.as_deref(), Some("0123456789abcdef"));
        assert!(dir.path().join("statements/root-000000.jsonl").exists());

        let store = Arc::new(MemorySampleStore::new());
        let mut filter = DiffFilter::new(store.clone());
        let restored = load(
            dir.path(),
            &saved.catalog,
            store.as_ref(),
            &mut filter,
            &mut ListenerSet::new(),
        )
        .unwrap();

        assert_eq!(restored.iri, "urn:run:1");
        assert_eq!(restored.tree.summary(&saved.catalog), saved.tree.summary(&saved.catalog));
        assert_eq!(restored.tree.count_redundant(), 1);
        assert_eq!(restored.frontier, saved.frontier);

        // Root: one filter user left after its node released it.
        let root = restored.tree[restored.tree.root()].sample().unwrap();
        assert_eq!(store.reference_count(&root), 1);
        let child = restored.frontier[0];
        let handle = restored.tree[child].sample().unwrap();
        assert_eq!(store.reference_count(&handle), 1);
        assert_eq!(*store.load_required(&handle).unwrap(), saved.child_sample);

        let duplicate = NodeId::from_name("node-9").unwrap();
        assert!(!filter.is_new_node(duplicate, &saved.child_sample).unwrap());
    }

    #[test]
    fn test_listener_state_round_trip() {
        let dir = TempDir::new().unwrap();
        let saved = fixture();
        let mut listeners = ListenerSet::new();
        let collector = StatisticsCollector::new();
        let stats = collector.handle();
        listeners.push(Box::new(collector));
        {
            let mut tree = saved.tree.clone();
            let mut ctx = crate::listener::ListenerContext {
                tree: &mut tree,
                frontier: &saved.frontier,
                catalog: &saved.catalog,
                store: saved.store.as_ref(),
                iri: "urn:run:1",
            };
            let root = ctx.tree.root();
            listeners.node_will_expand(root, &mut ctx);
            listeners.node_did_expand(root, &mut ctx);
        }
        save_fixture(&saved, dir.path(), &listeners);

        let store = Arc::new(MemorySampleStore::new());
        let mut filter = DiffFilter::new(store.clone());
        let mut resumed = ListenerSet::new();
        let collector = StatisticsCollector::new();
        let restored_stats = collector.handle();
        resumed.push(Box::new(collector));
        load(dir.path(), &saved.catalog, store.as_ref(), &mut filter, &mut resumed).unwrap();

        assert_eq!(restored_stats.snapshot(), stats.snapshot());
    }

    #[test]
    fn test_filter_mismatch() {
        let dir = TempDir::new().unwrap();
        let saved = fixture();
        save_fixture(&saved, dir.path(), &ListenerSet::new());

        let store = Arc::new(MemorySampleStore::new());
        let mut filter = IsomorphismFilter::new(store.clone());
        let err = load(dir.path(), &saved.catalog, store.as_ref(), &mut filter, &mut ListenerSet::new())
            .unwrap_err();
        assert!(matches!(
            err,
            CheckpointError::FilterMismatch {
                expected: FilterKind::Isomorphism,
                found: FilterKind::Diff
            }
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_unknown_transformer() {
        let dir = TempDir::new().unwrap();
        let saved = fixture();
        save_fixture(&saved, dir.path(), &ListenerSet::new());

        let catalog = Catalog::new(
            saved.catalog.applications.clone(),
            vec![Transformer::new("tr:x", "X", vec![], "X")],
        );
        let store = Arc::new(MemorySampleStore::new());
        let mut filter = DiffFilter::new(store.clone());
        let err = load(dir.path(), &catalog, store.as_ref(), &mut filter, &mut ListenerSet::new())
            .unwrap_err();
        assert!(matches!(err, CheckpointError::UnknownTransformer(iri) if iri == "tr:y"));
    }

    #[test]
    fn test_schema_version_checked() {
        let dir = TempDir::new().unwrap();
        let saved = fixture();
        let mut manifest = save_fixture(&saved, dir.path(), &ListenerSet::new());
        manifest.schema_version = "discovery_checkpoint_v0".into();
        write_json(&dir.path().join("manifest.json"), &manifest).unwrap();

        let store = Arc::new(MemorySampleStore::new());
        let mut filter = DiffFilter::new(store.clone());
        let err = load(dir.path(), &saved.catalog, store.as_ref(), &mut filter, &mut ListenerSet::new())
            .unwrap_err();
        assert!(matches!(err, CheckpointError::SchemaVersion { .. }));
    }

    #[test]
    fn test_tampered_nodes_rejected() {
        let dir = TempDir::new().unwrap();
        let saved = fixture();
        save_fixture(&saved, dir.path(), &ListenerSet::new());
        let nodes = dir.path().join("nodes.jsonl");
        let text = fs::read_to_string(&nodes).unwrap();
        fs::write(&nodes, text.replacen("\"redundant\":true", "\"redundant\":false", 1)).unwrap();

        let store = Arc::new(MemorySampleStore::new());
        let mut filter = DiffFilter::new(store.clone());
        let err = load(dir.path(), &saved.catalog, store.as_ref(), &mut filter, &mut ListenerSet::new())
            .unwrap_err();
        assert!(matches!(err, CheckpointError::Inconsistent(_)));
    }

    #[test]
    fn test_rehashed_misdirected_child_rejected() {
        let dir = TempDir::new().unwrap();
        let saved = fixture();
        let mut manifest = save_fixture(&saved, dir.path(), &ListenerSet::new());

        // The redundant child also listed under its sibling, with a matching hash.
        let nodes = dir.path().join("nodes.jsonl");
        let mut lines: Vec<NodeLine> = fs::read_to_string(&nodes)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        lines[1].next = vec![lines[2].name.clone()];
        let text: String = lines
            .iter()
            .map(|l| format!("{}\n", serde_json::to_string(l).unwrap()))
            .collect();
        fs::write(&nodes, text).unwrap();
        manifest.nodes_hash = canonical_hash_hex(&lines);
        write_json(&dir.path().join("manifest.json"), &manifest).unwrap();

        let store = Arc::new(MemorySampleStore::new());
        let mut filter = DiffFilter::new(store.clone());
        let err = load(dir.path(), &saved.catalog, store.as_ref(), &mut filter, &mut ListenerSet::new())
            .unwrap_err();
        assert!(matches!(err, CheckpointError::Inconsistent(_)));
        assert!(store.is_empty());
    }

    #[test]
    fn test_save_reports_manifest_removal_failure() {
        let dir = TempDir::new().unwrap();
        let saved = fixture();
        fs::create_dir_all(dir.path().join("manifest.json")).unwrap();

        let err = save(
            dir.path(),
            &CheckpointParts {
                tree: &saved.tree,
                frontier: &saved.frontier,
                catalog: &saved.catalog,
                store: saved.store.as_ref(),
                filter: &saved.filter,
                listeners: &ListenerSet::new(),
                iri: "urn:run:1",
                config_hash: None,
            },
        )
        .unwrap_err();
        assert!(matches!(err, CheckpointError::Io(_)));
    }
}
