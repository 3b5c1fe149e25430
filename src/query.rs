//! Graph query capability.
//!
//! The kernel never evaluates queries itself. It hands every descriptor and
//! configuration-template query to a [`QueryEngine`], which loads a sample
//! into its own ephemeral store, answers boolean queries against it and
//! produces rewritten samples.
//!
//! [`RegisteredQueryEngine`] is a closure registry: each query string is
//! bound to a Rust function. It is the engine used by the test suite and is
//! suitable for embedding callers that precompile their queries.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::types::Sample;

/// Error type for query evaluation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    /// No evaluator is registered for this query.
    #[error("Unknown query: {0}")]
    UnknownQuery(String),
    /// The engine failed to load a sample.
    #[error("Failed to load sample: {0}")]
    Load(String),
    /// Evaluation failed.
    #[error("Query evaluation failed for {query}: {message}")]
    Evaluation {
        /// Query text.
        query: String,
        /// Engine message.
        message: String,
    },
}

/// Graph query engine used by the expansion driver.
///
/// `Store` is whatever queryable representation the engine builds from a
/// sample. The driver creates one per node and drops it when the node is
/// done; stores are never shared between nodes.
pub trait QueryEngine: Send + Sync {
    /// Ephemeral queryable store.
    type Store;

    /// Load a sample into a fresh store.
    fn load(&self, sample: &Sample) -> Result<Self::Store, QueryError>;

    /// Evaluate a boolean query.
    fn ask(&self, store: &Self::Store, query: &str) -> Result<bool, QueryError>;

    /// Evaluate a rewrite query, producing a new sample.
    fn rewrite(&self, store: &Self::Store, query: &str) -> Result<Sample, QueryError>;
}

type AskFn = Arc<dyn Fn(&Sample) -> Result<bool, String> + Send + Sync>;
type RewriteFn = Arc<dyn Fn(&Sample) -> Result<Sample, String> + Send + Sync>;

/// Query engine that dispatches query strings to registered closures.
///
/// The store is the sample itself.
#[derive(Clone, Default)]
pub struct RegisteredQueryEngine {
    asks: BTreeMap<String, AskFn>,
    rewrites: BTreeMap<String, RewriteFn>,
}

impl RegisteredQueryEngine {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a boolean query.
    pub fn with_ask<F>(mut self, query: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Sample) -> bool + Send + Sync + 'static,
    {
        self.asks.insert(query.into(), Arc::new(move |s| Ok(f(s))));
        self
    }

    /// Register a boolean query that can fail.
    pub fn with_fallible_ask<F>(mut self, query: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Sample) -> Result<bool, String> + Send + Sync + 'static,
    {
        self.asks.insert(query.into(), Arc::new(f));
        self
    }

    /// Register a rewrite query.
    pub fn with_rewrite<F>(mut self, query: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Sample) -> Sample + Send + Sync + 'static,
    {
        self.rewrites.insert(query.into(), Arc::new(move |s| Ok(f(s))));
        self
    }

    /// Register a rewrite query that can fail.
    pub fn with_fallible_rewrite<F>(mut self, query: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Sample) -> Result<Sample, String> + Send + Sync + 'static,
    {
        self.rewrites.insert(query.into(), Arc::new(f));
        self
    }

    /// Number of registered queries.
    pub fn len(&self) -> usize {
        self.asks.len() + self.rewrites.len()
    }

    /// Check if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for RegisteredQueryEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredQueryEngine")
            .field("asks", &self.asks.keys().collect::<Vec<_>>())
            .field("rewrites", &self.rewrites.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl QueryEngine for RegisteredQueryEngine {
    type Store = Sample;

    fn load(&self, sample: &Sample) -> Result<Sample, QueryError> {
        Ok(sample.clone())
    }

    fn ask(&self, store: &Sample, query: &str) -> Result<bool, QueryError> {
        let f = self
            .asks
            .get(query)
            .ok_or_else(|| QueryError::UnknownQuery(query.to_string()))?;
        f(store).map_err(|message| QueryError::Evaluation {
            query: query.to_string(),
            message,
        })
    }

    fn rewrite(&self, store: &Sample, query: &str) -> Result<Sample, QueryError> {
        let f = self
            .rewrites
            .get(query)
            .ok_or_else(|| QueryError::UnknownQuery(query.to_string()))?;
        f(store).map_err(|message| QueryError::Evaluation {
            query: query.to_string(),
            message,
        })
    }
}
