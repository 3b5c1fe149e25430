//! Memory pressure handling.
//!
//! Before each node expansion the [`ResourceStrategy`] reads a
//! [`ResourceUsage`] from its [`ResourceMonitor`] and, when a stage's
//! predicate fires, moves samples from the hierarchical store's primary
//! tier to its secondary tier.
//!
//! ## Stages
//!
//! | Stage | Moves |
//! |-------|-------|
//! | [`ResourceStage::NodeSamples`] | every `Node` sample |
//! | [`ResourceStage::LargeSamples`] | `Node` samples and large `Filter` samples |
//! | [`ResourceStage::Everything`] | everything; new samples bypass the primary |
//!
//! Stages escalate one at a time: a stage is eligible only once the one
//! before it has run. When the next stage's predicate does not fire but the
//! current one does, the current stage runs again.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::{DiscoveryListener, ListenerContext};
use crate::store::{HierarchicalSampleStore, SampleGroup, SampleStore};
use crate::tree::NodeId;

/// Memory usage snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceUsage {
    /// Bytes in use.
    pub used_bytes: usize,
    /// Bytes available in total.
    pub total_bytes: usize,
}

impl ResourceUsage {
    /// Fraction of the total in use. A zero total counts as full.
    pub fn utilization(&self) -> f64 {
        if self.total_bytes == 0 {
            return 1.0;
        }
        self.used_bytes as f64 / self.total_bytes as f64
    }

    /// Bytes still free.
    pub fn free_bytes(&self) -> usize {
        self.total_bytes.saturating_sub(self.used_bytes)
    }
}

/// Source of memory usage readings.
pub trait ResourceMonitor: Send + Sync {
    /// Current usage.
    fn usage(&self) -> ResourceUsage;
}

/// Reports the bytes held by a store against a fixed budget.
pub struct StoreResourceMonitor {
    store: Arc<dyn SampleStore>,
    budget_bytes: usize,
}

impl StoreResourceMonitor {
    /// Monitor `store` (normally a hierarchical store's primary tier).
    pub fn new(store: Arc<dyn SampleStore>, budget_bytes: usize) -> Self {
        Self {
            store,
            budget_bytes,
        }
    }
}

impl ResourceMonitor for StoreResourceMonitor {
    fn usage(&self) -> ResourceUsage {
        ResourceUsage {
            used_bytes: self.store.stored_bytes(),
            total_bytes: self.budget_bytes,
        }
    }
}

impl fmt::Debug for StoreResourceMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreResourceMonitor")
            .field("budget_bytes", &self.budget_bytes)
            .finish()
    }
}

/// Monitor returning values set by the caller.
#[derive(Debug, Default)]
pub struct FixedResourceMonitor {
    used_bytes: AtomicUsize,
    total_bytes: AtomicUsize,
}

impl FixedResourceMonitor {
    /// Create a monitor with the given reading.
    pub fn new(used_bytes: usize, total_bytes: usize) -> Self {
        Self {
            used_bytes: AtomicUsize::new(used_bytes),
            total_bytes: AtomicUsize::new(total_bytes),
        }
    }

    /// Change the reading.
    pub fn set(&self, used_bytes: usize, total_bytes: usize) {
        self.used_bytes.store(used_bytes, Ordering::Relaxed);
        self.total_bytes.store(total_bytes, Ordering::Relaxed);
    }
}

impl ResourceMonitor for FixedResourceMonitor {
    fn usage(&self) -> ResourceUsage {
        ResourceUsage {
            used_bytes: self.used_bytes.load(Ordering::Relaxed),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
        }
    }
}

impl<M: ResourceMonitor + ?Sized> ResourceMonitor for Arc<M> {
    fn usage(&self) -> ResourceUsage {
        (**self).usage()
    }
}

/// Demotion stage, least to most aggressive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ResourceStage {
    /// Move every `Node` sample.
    NodeSamples,
    /// Move `Node` samples and `Filter` samples above the size threshold.
    LargeSamples,
    /// Move everything and stop using the primary tier.
    Everything,
}

impl ResourceStage {
    /// All stages in escalation order.
    pub const ALL: [ResourceStage; 3] = [Self::NodeSamples, Self::LargeSamples, Self::Everything];

    /// Lowercase name for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NodeSamples => "node_samples",
            Self::LargeSamples => "large_samples",
            Self::Everything => "everything",
        }
    }
}

type StagePredicate = Box<dyn Fn(&ResourceUsage) -> bool + Send + Sync>;

/// Default utilization thresholds of the three stages.
pub const DEFAULT_STAGE_THRESHOLDS: [f64; 3] = [0.6, 0.75, 0.9];

/// Default statement count above which a `Filter` sample counts as large.
pub const DEFAULT_LARGE_SAMPLE_STATEMENTS: usize = 64;

/// Listener demoting samples under memory pressure.
pub struct ResourceStrategy {
    store: Arc<HierarchicalSampleStore>,
    monitor: Box<dyn ResourceMonitor>,
    predicates: [StagePredicate; 3],
    large_sample_statements: usize,
    /// Index of the last stage applied.
    current: Option<usize>,
    passes: u64,
}

impl ResourceStrategy {
    /// Create a strategy with the default thresholds.
    pub fn new(store: Arc<HierarchicalSampleStore>, monitor: Box<dyn ResourceMonitor>) -> Self {
        Self::with_thresholds(store, monitor, DEFAULT_STAGE_THRESHOLDS)
    }

    /// Create a strategy whose stages fire at the given utilizations.
    pub fn with_thresholds(
        store: Arc<HierarchicalSampleStore>,
        monitor: Box<dyn ResourceMonitor>,
        thresholds: [f64; 3],
    ) -> Self {
        let at = |t: f64| -> StagePredicate { Box::new(move |u: &ResourceUsage| u.utilization() >= t) };
        Self {
            store,
            monitor,
            predicates: [at(thresholds[0]), at(thresholds[1]), at(thresholds[2])],
            large_sample_statements: DEFAULT_LARGE_SAMPLE_STATEMENTS,
            current: None,
            passes: 0,
        }
    }

    /// Replace the predicate gating `stage`.
    pub fn with_predicate<F>(mut self, stage: ResourceStage, predicate: F) -> Self
    where
        F: Fn(&ResourceUsage) -> bool + Send + Sync + 'static,
    {
        self.predicates[stage as usize] = Box::new(predicate);
        self
    }

    /// Set the statement count above which a `Filter` sample is large.
    pub fn with_large_sample_statements(mut self, statements: usize) -> Self {
        self.large_sample_statements = statements;
        self
    }

    /// Last stage applied.
    pub fn current_stage(&self) -> Option<ResourceStage> {
        self.current.map(|i| ResourceStage::ALL[i])
    }

    /// Number of optimize passes run.
    pub fn passes(&self) -> u64 {
        self.passes
    }

    /// Pick the stage to run for `usage`, if any.
    fn select(&self, usage: &ResourceUsage) -> Option<usize> {
        let next = self.current.map_or(0, |c| c + 1);
        if next < self.predicates.len() && (self.predicates[next])(usage) {
            return Some(next);
        }
        self.current.filter(|c| (self.predicates[*c])(usage))
    }

    fn apply(&self, stage: ResourceStage) -> Result<usize, crate::store::StoreError> {
        let large = self.large_sample_statements;
        match stage {
            ResourceStage::NodeSamples => self.store.optimize(&|group, _| group != SampleGroup::Node),
            ResourceStage::LargeSamples => self.store.optimize(&|group, sample| match group {
                SampleGroup::Root => true,
                SampleGroup::Filter => sample.len() <= large,
                SampleGroup::Node => false,
            }),
            ResourceStage::Everything => {
                let moved = self.store.optimize(&|_, _| false)?;
                self.store.set_use_primary(false);
                Ok(moved)
            }
        }
    }

    /// Check usage and run a stage if one fires. Returns `false` if a stage
    /// failed.
    pub fn check(&mut self) -> bool {
        let usage = self.monitor.usage();
        let Some(index) = self.select(&usage) else {
            return true;
        };
        let stage = ResourceStage::ALL[index];
        let moved = match self.apply(stage) {
            Ok(moved) => moved,
            Err(e) => {
                tracing::error!(stage = stage.as_str(), error = %e, "Resource stage failed");
                return false;
            }
        };
        self.current = Some(index);
        self.passes += 1;

        let after = self.monitor.usage();
        tracing::info!(
            stage = stage.as_str(),
            moved,
            before = usage.utilization(),
            after = after.utilization(),
            free_bytes = after.free_bytes(),
            "Applied resource stage"
        );
        true
    }
}

impl fmt::Debug for ResourceStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceStrategy")
            .field("current", &self.current_stage())
            .field("passes", &self.passes)
            .field("large_sample_statements", &self.large_sample_statements)
            .finish()
    }
}

impl DiscoveryListener for ResourceStrategy {
    fn name(&self) -> &'static str {
        "resource_strategy"
    }

    fn node_will_expand(&mut self, _node: NodeId, _ctx: &mut ListenerContext<'_>) -> bool {
        self.check()
    }
}
