//! Per-level run statistics.
//!
//! The [`StatisticsCollector`] is a listener. It opens a level record when
//! the first expansion of each level completes, accumulates counts per expanded node and
//! closes the record at level end. Callers read results through a
//! [`StatisticsHandle`], which stays valid after the discovery is dropped.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use crate::listener::{DiscoveryListener, ListenerContext};
use crate::tree::NodeId;

/// Checkpoint key of the collector's state.
pub const STATISTICS_KEY: &str = "statistics";

/// Aggregate of one level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelStatistics {
    /// Level number.
    pub level: usize,
    /// When the first node of the level was expanded.
    pub started_at: DateTime<Utc>,
    /// Time spent in the level so far.
    pub duration_ms: u64,
    /// Frontier size when the level started.
    pub nodes_at_start: usize,
    /// Nodes expanded.
    pub expanded: usize,
    /// Children found redundant.
    pub filtered: usize,
    /// Children kept.
    pub kept: usize,
    /// Children queued for the next level, set at level end.
    pub next_level: usize,
    /// Matched application IRIs.
    pub applications: BTreeSet<String>,
    /// Applied transformer IRIs.
    pub transformers: BTreeSet<String>,
    /// Whether the level ended.
    pub finished: bool,
}

impl LevelStatistics {
    fn start(level: usize, nodes_at_start: usize) -> Self {
        Self {
            level,
            started_at: Utc::now(),
            duration_ms: 0,
            nodes_at_start,
            expanded: 0,
            filtered: 0,
            kept: 0,
            next_level: 0,
            applications: BTreeSet::new(),
            transformers: BTreeSet::new(),
            finished: false,
        }
    }

    /// Counts only, without timing, for comparing runs.
    pub fn counts(&self) -> (usize, usize, usize, usize, usize) {
        (self.level, self.expanded, self.filtered, self.kept, self.next_level)
    }
}

/// Ordered per-level statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    /// Levels in order.
    pub levels: Vec<LevelStatistics>,
}

impl Statistics {
    /// Total nodes expanded.
    pub fn total_expanded(&self) -> usize {
        self.levels.iter().map(|l| l.expanded).sum()
    }

    /// Total children found redundant.
    pub fn total_filtered(&self) -> usize {
        self.levels.iter().map(|l| l.filtered).sum()
    }

    /// Total children kept.
    pub fn total_kept(&self) -> usize {
        self.levels.iter().map(|l| l.kept).sum()
    }

    /// Every application matched anywhere.
    pub fn applications(&self) -> BTreeSet<String> {
        self.levels
            .iter()
            .flat_map(|l| l.applications.iter().cloned())
            .collect()
    }
}

/// Shared read access to collected statistics.
#[derive(Debug, Clone, Default)]
pub struct StatisticsHandle {
    inner: Arc<Mutex<Statistics>>,
}

impl StatisticsHandle {
    /// Copy of the current statistics.
    pub fn snapshot(&self) -> Statistics {
        self.inner.lock().clone()
    }
}

/// Listener collecting [`Statistics`].
#[derive(Debug, Default)]
pub struct StatisticsCollector {
    stats: StatisticsHandle,
    /// Clock of the open level, with the duration it had when the clock started.
    clock: Option<(Instant, u64)>,
    /// When the first expansion of a level was announced.
    started: Option<Instant>,
}

impl StatisticsCollector {
    /// Create a collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for reading the statistics.
    pub fn handle(&self) -> StatisticsHandle {
        self.stats.clone()
    }

    fn tick(&self, level: &mut LevelStatistics) {
        if let Some((started, base)) = self.clock {
            level.duration_ms = base + started.elapsed().as_millis() as u64;
        }
    }
}

impl DiscoveryListener for StatisticsCollector {
    fn name(&self) -> &'static str {
        "statistics"
    }

    fn node_will_expand(&mut self, _node: NodeId, _ctx: &mut ListenerContext<'_>) -> bool {
        // The level record itself opens in node_did_expand.
        if self.clock.is_none() {
            self.started = Some(Instant::now());
        }
        true
    }

    fn node_did_expand(&mut self, node: NodeId, ctx: &mut ListenerContext<'_>) -> bool {
        let tree = &*ctx.tree;
        let Some(expanded) = tree.node(node) else {
            return true;
        };
        let mut stats = self.stats.inner.lock();
        let open = stats
            .levels
            .last()
            .filter(|l| !l.finished && l.level == expanded.level())
            .map(|l| l.duration_ms);
        let base = match open {
            Some(duration_ms) => duration_ms,
            None => {
                // The expanded node has left the frontier already.
                let nodes_at_start = ctx.frontier.len() + 1;
                stats.levels.push(LevelStatistics::start(expanded.level(), nodes_at_start));
                self.clock = None;
                0
            }
        };
        if self.clock.is_none() {
            let started = self.started.take().unwrap_or_else(Instant::now);
            self.clock = Some((started, base));
        }
        let Some(level) = stats.levels.last_mut() else {
            return true;
        };
        level.expanded += 1;
        for app in expanded.applications() {
            if let Some(a) = ctx.catalog.application(*app) {
                level.applications.insert(a.iri.clone());
            }
        }
        for child in expanded.next().iter().filter_map(|c| tree.node(*c)) {
            if child.is_redundant() {
                level.filtered += 1;
            } else {
                level.kept += 1;
            }
            if let Some(t) = child.transformer().and_then(|t| ctx.catalog.transformer(t)) {
                level.transformers.insert(t.iri.clone());
            }
        }
        self.tick(level);
        true
    }

    fn level_did_end(&mut self, level: usize, ctx: &mut ListenerContext<'_>) -> bool {
        let mut stats = self.stats.inner.lock();
        if let Some(current) = stats.levels.last_mut().filter(|l| l.level == level && !l.finished) {
            self.tick(current);
            current.next_level = ctx.frontier.len();
            current.finished = true;
            tracing::info!(
                level,
                expanded = current.expanded,
                kept = current.kept,
                filtered = current.filtered,
                next_level = current.next_level,
                duration_ms = current.duration_ms,
                "Level finished"
            );
        }
        self.clock = None;
        true
    }

    fn checkpoint_key(&self) -> Option<&'static str> {
        Some(STATISTICS_KEY)
    }

    fn save_state(&self) -> Option<serde_json::Value> {
        serde_json::to_value(&*self.stats.inner.lock()).ok()
    }

    fn restore_state(&mut self, state: serde_json::Value) -> Result<(), serde_json::Error> {
        let restored: Statistics = serde_json::from_value(state)?;
        *self.stats.inner.lock() = restored;
        self.clock = None;
        self.started = None;
        Ok(())
    }
}
